//! Document remover and insert listener
//!
//! The inserter reports every `(term_ref, doc)` pair it adds; at flush
//! the pairs are sorted by doc id, grouped, and stored in the
//! per-document words record. Removing a document replays its recorded
//! terms as `remove(term, doc)` operations through the listener.

use tracing::error;

use crate::store::word_store::WordStoreView;
use crate::store::{DocumentWordsStore, TermRef};
use crate::types::{DocId, MemoryUsage};

/// Receiver of the `(term, doc)` pairs regenerated for a document
/// removal. Implemented by the field inverter.
pub trait RemoveListener {
    fn remove(&mut self, word: &[u8], doc_id: DocId);
}

pub struct FieldIndexRemover {
    store: DocumentWordsStore,
    word_doc_tuples: Vec<(TermRef, DocId)>,
}

impl Default for FieldIndexRemover {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldIndexRemover {
    pub fn new() -> Self {
        Self {
            store: DocumentWordsStore::new(),
            word_doc_tuples: Vec::new(),
        }
    }

    /// Insert-listener hook: one `(term_ref, doc)` pair per posting added.
    pub fn insert(&mut self, term_ref: TermRef, doc_id: DocId) {
        self.word_doc_tuples.push((term_ref, doc_id));
    }

    /// Group the recorded pairs per doc id and store them in the words
    /// record. Idempotent when nothing was recorded.
    pub fn flush(&mut self) {
        if self.word_doc_tuples.is_empty() {
            return;
        }
        self.word_doc_tuples.sort_unstable_by_key(|(_, doc)| *doc);
        let tuples = std::mem::take(&mut self.word_doc_tuples);
        let mut start = 0usize;
        while start < tuples.len() {
            let doc_id = tuples[start].1;
            let mut end = start;
            while end < tuples.len() && tuples[end].1 == doc_id {
                end += 1;
            }
            let refs: Vec<TermRef> = tuples[start..end].iter().map(|(r, _)| *r).collect();
            if let Err(e) = self.store.insert(doc_id, &refs) {
                error!("failed inserting remove info: {}", e);
                panic!("{}", e);
            }
            start = end;
        }
    }

    /// Replay the recorded terms of `doc_id` into `listener` and drop the
    /// record.
    pub fn remove(&mut self, doc_id: DocId, words: &WordStoreView, listener: &mut dyn RemoveListener) {
        let collected: Option<Vec<TermRef>> = self.store.get(doc_id).map(|refs| refs.collect());
        if let Some(refs) = collected {
            for term_ref in refs {
                listener.remove(words.word(term_ref), doc_id);
            }
            self.store.remove(doc_id);
        }
    }

    pub fn has_record(&self, doc_id: DocId) -> bool {
        self.store.has_record(doc_id)
    }

    pub fn num_recorded_docs(&self) -> usize {
        self.store.num_docs()
    }

    pub fn reclaim_memory(&mut self, oldest_used: u64) {
        self.store.reclaim_memory(oldest_used);
    }

    pub fn memory_usage(&self) -> MemoryUsage {
        self.store.memory_usage()
    }
}
