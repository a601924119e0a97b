//! Term store
//!
//! Content store for unique term bytes. Always appends a fresh copy; the
//! per-field dictionary is what coalesces duplicates. Entries are
//! length-prefixed and 4-byte aligned so references stay taggable.

use std::sync::atomic::{AtomicU64, Ordering};

use super::{ChunkDirectory, ChunkView, TermRef};
use crate::types::MemoryUsage;

pub struct WordStore {
    dir: ChunkDirectory,
    num_words: AtomicU64,
}

impl Default for WordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl WordStore {
    pub fn new() -> Self {
        Self {
            dir: ChunkDirectory::new(),
            num_words: AtomicU64::new(0),
        }
    }

    /// Append a term and return its reference. No deduplication.
    pub fn add(&self, word: &[u8]) -> TermRef {
        let len = (word.len() as u32).to_le_bytes();
        let mut entry = Vec::with_capacity(4 + word.len());
        entry.extend_from_slice(&len);
        entry.extend_from_slice(word);
        self.num_words.fetch_add(1, Ordering::Relaxed);
        self.dir.append(&entry, 0)
    }

    pub fn num_words(&self) -> u64 {
        self.num_words.load(Ordering::Relaxed)
    }

    /// Snapshot for resolving references off the writer thread.
    pub fn view(&self) -> WordStoreView {
        WordStoreView {
            view: self.dir.view(),
        }
    }

    /// Resolve a reference to owned bytes. Convenience for cold paths;
    /// hot paths hold a [`WordStoreView`].
    pub fn word(&self, r: TermRef) -> Vec<u8> {
        self.view().word(r).to_vec()
    }

    pub fn memory_usage(&self) -> MemoryUsage {
        self.dir.memory_usage()
    }
}

/// Immutable snapshot of the term store.
#[derive(Clone)]
pub struct WordStoreView {
    view: ChunkView,
}

impl WordStoreView {
    /// Borrowed term bytes, valid for the lifetime of the view.
    pub fn word(&self, r: TermRef) -> &[u8] {
        self.try_word(r)
            .expect("term reference resolved after reclamation")
    }

    /// `None` when the view predates the referenced term.
    pub fn try_word(&self, r: TermRef) -> Option<&[u8]> {
        let slice = self.view.slice(r)?;
        let len = u32::from_le_bytes(slice[..4].try_into().unwrap()) as usize;
        slice.get(4..4 + len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_lookup() {
        let store = WordStore::new();
        let a = store.add(b"alpha");
        let b = store.add(b"beta");
        let view = store.view();
        assert_eq!(view.word(a), b"alpha");
        assert_eq!(view.word(b), b"beta");
        assert_eq!(store.num_words(), 2);
    }

    #[test]
    fn test_no_dedup_fresh_refs() {
        let store = WordStore::new();
        let a = store.add(b"same");
        let b = store.add(b"same");
        assert_ne!(a, b);
        let view = store.view();
        assert_eq!(view.word(a), view.word(b));
    }

    #[test]
    fn test_references_are_aligned() {
        let store = WordStore::new();
        for len in 0..32usize {
            let word = vec![b'x'; len];
            let r = store.add(&word);
            assert_eq!(r.byte_offset() & 3, 0);
            assert_eq!(store.view().word(r), &word[..]);
        }
    }

    #[test]
    fn test_view_survives_growth() {
        let store = WordStore::new();
        let first = store.add(b"first");
        let view = store.view();
        for i in 0..50_000 {
            store.add(format!("word{}", i).as_bytes());
        }
        assert_eq!(view.word(first), b"first");
        assert_eq!(store.view().word(first), b"first");
    }
}
