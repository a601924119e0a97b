//! Per-field dictionary
//!
//! Ordered mapping from term to posting-list reference, keyed by the term
//! bytes behind each [`TermRef`]. Readers work against an immutable
//! published snapshot; the inserter merges sorted batches into a working
//! copy that is published at commit, so a reader under a generation guard
//! keeps exactly the state it resolved.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

use crate::index::posting::PostingRef;
use crate::store::word_store::WordStoreView;
use crate::store::{TermRef, WordStore};
use crate::types::MemoryUsage;

/// One dictionary entry: interned term plus posting-list reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DictEntry {
    pub term_ref: TermRef,
    pub posting: PostingRef,
}

/// Immutable dictionary snapshot. Term order is strictly increasing by
/// byte sequence.
pub struct DictSnapshot {
    entries: Vec<DictEntry>,
    words: WordStoreView,
}

impl DictSnapshot {
    fn empty(words: WordStoreView) -> Self {
        Self {
            entries: Vec::new(),
            words,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[DictEntry] {
        &self.entries
    }

    pub fn term(&self, entry: &DictEntry) -> &[u8] {
        self.words.word(entry.term_ref)
    }

    /// Binary search for an exact term.
    pub fn lookup(&self, term: &[u8]) -> Option<&DictEntry> {
        self.entries
            .binary_search_by(|e| self.term(e).cmp(term))
            .ok()
            .map(|i| &self.entries[i])
    }

    /// Entries in term order together with their term bytes.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &DictEntry)> {
        self.entries.iter().map(move |e| (self.term(e), e))
    }
}

/// The dictionary: a published snapshot plus the working copy the
/// inserter mutates between flush and commit.
pub struct Dictionary {
    published: RwLock<Arc<DictSnapshot>>,
    working: Mutex<Option<Vec<DictEntry>>>,
}

impl Dictionary {
    pub fn new(words: &WordStore) -> Self {
        Self {
            published: RwLock::new(Arc::new(DictSnapshot::empty(words.view()))),
            working: Mutex::new(None),
        }
    }

    /// The snapshot readers resolve under their guard.
    pub fn snapshot(&self) -> Arc<DictSnapshot> {
        self.published.read().clone()
    }

    /// Run `f` over the working entry vector, creating it from the
    /// published snapshot on first use since the last publish.
    pub fn with_working<R>(&self, f: impl FnOnce(&mut Vec<DictEntry>) -> R) -> R {
        let mut working = self.working.lock();
        if working.is_none() {
            *working = Some(self.published.read().entries.clone());
        }
        f(working.as_mut().unwrap())
    }

    /// Publish the working copy, if any, as the new frozen snapshot.
    /// `words` must cover every term the working copy references.
    pub fn freeze(&self, words: WordStoreView) {
        let mut working = self.working.lock();
        if let Some(entries) = working.take() {
            *self.published.write() = Arc::new(DictSnapshot { entries, words });
        }
    }

    /// Number of entries with a non-null posting reference in the
    /// current working state.
    pub fn num_live_entries(&self) -> usize {
        let working = self.working.lock();
        match working.as_ref() {
            Some(entries) => entries.iter().filter(|e| e.posting != 0).count(),
            None => self
                .published
                .read()
                .entries
                .iter()
                .filter(|e| e.posting != 0)
                .count(),
        }
    }

    pub fn memory_usage(&self) -> MemoryUsage {
        let entry = std::mem::size_of::<DictEntry>();
        let published = self.published.read();
        let working = self.working.lock();
        let working_cap = working.as_ref().map(|w| w.capacity()).unwrap_or(0);
        let working_len = working.as_ref().map(|w| w.len()).unwrap_or(0);
        let allocated = (published.entries.capacity() + working_cap) * entry;
        let used = (published.entries.len() + working_len) * entry;
        MemoryUsage::new(allocated, used, 0, 0)
    }
}

/// Find the insertion point for `term` at or after `hint`, galloping
/// forward before the binary search so a sorted batch of lookups walks
/// the dictionary in amortised constant descents.
pub fn seek_from(
    entries: &[DictEntry],
    term_of: &mut impl FnMut(TermRef) -> Vec<u8>,
    hint: usize,
    term: &[u8],
) -> (usize, bool) {
    let mut low = hint.min(entries.len());
    // Gallop: double the step until we pass the term.
    let mut step = 1usize;
    let mut high = low;
    while high < entries.len() && term_of(entries[high].term_ref).as_slice() < term {
        low = high + 1;
        high += step;
        step *= 2;
    }
    let high = high.min(entries.len());
    let slice = &entries[low..high];
    match slice.binary_search_by(|e| term_of(e.term_ref).as_slice().cmp(term)) {
        Ok(i) => (low + i, true),
        Err(i) => (low + i, false),
    }
}
