//! Ordered field index inserter
//!
//! Collects one push batch of `(next_word, add | remove)` operations in
//! strict `(term, doc)` order, then merges it into the dictionary and
//! posting lists at `flush`. Features are encoded eagerly at `add`;
//! guard bytes are written before the first dictionary mutation so the
//! decoder's over-read never touches unpublished bytes.

use std::sync::atomic::{AtomicU64, Ordering};

use super::dictionary::{seek_from, DictEntry, Dictionary};
use super::posting::{PostingEntry, PostingStore, PostingVariant, NULL_POSTING};
use super::remover::FieldIndexRemover;
use crate::generation::Generation;
use crate::store::{FeatureStore, TermRef, WordStore};
use crate::types::{DocId, DocIdAndFeatures, FieldId};

/// Streaming contract the field inverter drives during its push walk.
/// Operations must arrive in strictly increasing `(term, doc)` order;
/// a remove directly followed by an add for the same doc is the
/// overwrite case.
pub trait OrderedInserter {
    fn set_next_word(&mut self, word: &[u8]);
    fn add(&mut self, doc_id: DocId, features: &DocIdAndFeatures);
    fn remove(&mut self, doc_id: DocId);
    fn flush(&mut self);
    fn rewind(&mut self);
}

struct WordBatch {
    word: Vec<u8>,
    num_adds: usize,
    num_removes: usize,
}

/// Reusable inserter buffers, owned by the field index writer state.
pub struct InserterState<P: PostingVariant> {
    word: Vec<u8>,
    prev_doc: DocId,
    prev_add: bool,
    batches: Vec<WordBatch>,
    adds: Vec<(DocId, PostingEntry<P>)>,
    removes: Vec<DocId>,
    adds_offset: usize,
    removes_offset: usize,
}

impl<P: PostingVariant> Default for InserterState<P> {
    fn default() -> Self {
        Self {
            word: Vec::new(),
            prev_doc: 0,
            prev_add: false,
            batches: Vec::new(),
            adds: Vec::new(),
            removes: Vec::new(),
            adds_offset: 0,
            removes_offset: 0,
        }
    }
}

/// One push session against a field index: the inserter state borrowed
/// together with the stores it publishes into.
pub struct FieldIndexInserter<'a, P: PostingVariant> {
    pub(crate) field_id: FieldId,
    pub(crate) word_store: &'a WordStore,
    pub(crate) feature_store: &'a FeatureStore,
    pub(crate) posting_store: &'a PostingStore<P>,
    pub(crate) dict: &'a Dictionary,
    pub(crate) generation: Generation,
    pub(crate) live_words: &'a AtomicU64,
    pub(crate) remover: &'a mut FieldIndexRemover,
    pub(crate) state: &'a mut InserterState<P>,
}

impl<'a, P: PostingVariant> FieldIndexInserter<'a, P> {
    fn flush_word(&mut self) {
        let state = &mut *self.state;
        let num_adds = state.adds.len() - state.adds_offset;
        let num_removes = state.removes.len() - state.removes_offset;
        if num_adds == 0 && num_removes == 0 {
            return;
        }
        state.batches.push(WordBatch {
            word: state.word.clone(),
            num_adds,
            num_removes,
        });
        state.adds_offset = state.adds.len();
        state.removes_offset = state.removes.len();
    }
}

impl<'a, P: PostingVariant> OrderedInserter for FieldIndexInserter<'a, P> {
    fn set_next_word(&mut self, word: &[u8]) {
        self.flush_word();
        assert!(
            self.state.word.as_slice() < word,
            "inserter words must be strictly increasing"
        );
        self.state.word.clear();
        self.state.word.extend_from_slice(word);
        self.state.prev_doc = 0;
        self.state.prev_add = false;
    }

    fn add(&mut self, doc_id: DocId, features: &DocIdAndFeatures) {
        assert!(doc_id != 0);
        assert!(
            self.state.prev_doc < doc_id || (self.state.prev_doc == doc_id && !self.state.prev_add),
            "inserter docs must be strictly increasing per word"
        );
        debug_assert!(features.num_occs() <= features.field_length());
        let (feature_ref, _bits) = self.feature_store.encode_and_store(self.field_id, features);
        self.state.adds.push((
            doc_id,
            PostingEntry::new(feature_ref, features.num_occs(), features.field_length()),
        ));
        self.state.prev_doc = doc_id;
        self.state.prev_add = true;
    }

    fn remove(&mut self, doc_id: DocId) {
        assert!(doc_id != 0);
        assert!(
            self.state.prev_doc < doc_id,
            "inserter docs must be strictly increasing per word"
        );
        self.state.removes.push(doc_id);
        self.state.prev_doc = doc_id;
        self.state.prev_add = false;
    }

    fn flush(&mut self) {
        self.flush_word();
        if self.state.batches.is_empty() {
            self.remover.flush();
            return;
        }
        if !self.state.adds.is_empty() {
            // Guard bytes precede any dictionary mutation.
            self.feature_store.write_guard_bytes();
        }

        let mut word_view = self.word_store.view();
        let word_store = self.word_store;
        let posting_store = self.posting_store;
        let generation = self.generation;
        let live_words = self.live_words;
        let state = &mut *self.state;
        let remover = &mut *self.remover;

        self.dict.with_working(|entries| {
            let mut term_of = |r: TermRef| match word_view.try_word(r) {
                Some(word) => word.to_vec(),
                None => {
                    word_view = word_store.view();
                    word_view.word(r).to_vec()
                }
            };
            let mut hint = 0usize;
            let mut adds_offset = 0usize;
            let mut removes_offset = 0usize;
            for batch in &state.batches {
                let (idx, found) = seek_from(entries, &mut term_of, hint, &batch.word);
                if !found {
                    let term_ref = word_store.add(&batch.word);
                    entries.insert(
                        idx,
                        DictEntry {
                            term_ref,
                            posting: NULL_POSTING,
                        },
                    );
                }
                hint = idx;

                let adds = &state.adds[adds_offset..adds_offset + batch.num_adds];
                let removes = &state.removes[removes_offset..removes_offset + batch.num_removes];
                for (doc_id, _) in adds {
                    remover.insert(entries[idx].term_ref, *doc_id);
                }

                let ref_in = entries[idx].posting;
                let ref_out = posting_store.apply(ref_in, adds.to_vec(), removes, generation);
                if ref_out != ref_in {
                    if ref_in == NULL_POSTING {
                        live_words.fetch_add(1, Ordering::Relaxed);
                    } else if ref_out == NULL_POSTING {
                        live_words.fetch_sub(1, Ordering::Relaxed);
                    }
                    entries[idx].posting = ref_out;
                }
                adds_offset += batch.num_adds;
                removes_offset += batch.num_removes;
            }
            debug_assert_eq!(adds_offset, state.adds.len());
            debug_assert_eq!(removes_offset, state.removes.len());
        });

        state.batches.clear();
        state.adds.clear();
        state.removes.clear();
        state.adds_offset = 0;
        state.removes_offset = 0;
        remover.flush();
    }

    fn rewind(&mut self) {
        debug_assert!(self.state.adds.is_empty() && self.state.removes.is_empty());
        self.state.word.clear();
        self.state.prev_doc = 0;
        self.state.prev_add = false;
    }
}
