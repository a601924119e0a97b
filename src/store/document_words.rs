//! Per-document words record
//!
//! For each `(field, doc)` pair inserted into a field index, a compact
//! serialised list of the term references the insert contributed. Used at
//! removal time to regenerate the `(term, doc)` pairs whose posting
//! entries must be deleted. Only the field's push thread touches it.

use ahash::AHashMap;

use crate::error::{IndexError, Result};
use crate::store::TermRef;
use crate::types::{DocId, MemoryUsage};

/// Records are packed back to back in a `u32` arena as
/// `[num_words, term_ref...]`.
pub struct DocumentWordsStore {
    docs: AHashMap<DocId, u32>,
    words: Vec<u32>,
    dead: usize,
}

impl Default for DocumentWordsStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentWordsStore {
    pub fn new() -> Self {
        Self {
            docs: AHashMap::new(),
            words: Vec::new(),
            dead: 0,
        }
    }

    /// Record the term refs contributed by one document insert. A record
    /// for a doc that already has one indicates a programming error
    /// upstream.
    pub fn insert(&mut self, doc_id: DocId, term_refs: &[TermRef]) -> Result<()> {
        if self.docs.contains_key(&doc_id) {
            return Err(IndexError::DuplicateRemoveInfo(doc_id));
        }
        let offset = self.words.len() as u32;
        self.words.push(term_refs.len() as u32);
        self.words.extend(term_refs.iter().map(|r| r.raw()));
        self.docs.insert(doc_id, offset);
        Ok(())
    }

    /// The term refs recorded for a document, if any.
    pub fn get(&self, doc_id: DocId) -> Option<impl Iterator<Item = TermRef> + '_> {
        self.docs.get(&doc_id).map(|&offset| {
            let offset = offset as usize;
            let len = self.words[offset] as usize;
            self.words[offset + 1..offset + 1 + len]
                .iter()
                .map(|raw| TermRef::from_raw(*raw))
        })
    }

    /// Drop the record for a document. The arena bytes become dead and
    /// are compacted away by [`reclaim_memory`].
    pub fn remove(&mut self, doc_id: DocId) {
        if let Some(offset) = self.docs.remove(&doc_id) {
            let len = self.words[offset as usize] as usize;
            self.dead += len + 1;
        }
    }

    pub fn has_record(&self, doc_id: DocId) -> bool {
        self.docs.contains_key(&doc_id)
    }

    pub fn num_docs(&self) -> usize {
        self.docs.len()
    }

    /// Compact the arena once at least half of it is dead. Safe at any
    /// generation: records are only resolved by the owning push thread.
    pub fn reclaim_memory(&mut self, _oldest_used: u64) {
        if self.dead * 2 < self.words.len() {
            return;
        }
        let mut packed = Vec::with_capacity(self.words.len() - self.dead);
        for offset in self.docs.values_mut() {
            let old = *offset as usize;
            let len = self.words[old] as usize;
            *offset = packed.len() as u32;
            packed.extend_from_slice(&self.words[old..old + 1 + len]);
        }
        self.words = packed;
        self.dead = 0;
    }

    pub fn memory_usage(&self) -> MemoryUsage {
        let allocated = self.words.capacity() * 4 + self.docs.capacity() * 16;
        let used = self.words.len() * 4 + self.docs.len() * 16;
        MemoryUsage::new(allocated, used, self.dead * 4, 0)
    }
}
