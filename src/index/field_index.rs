//! Per-field memory index
//!
//! One field's dictionary, posting lists, term store and feature store,
//! glued to the generation handler that makes concurrent reads safe.
//! The posting entry shape (plain or interleaved) is a compile-time
//! parameter; [`IFieldIndex`] is the object-safe surface the pipeline
//! and the facade work through.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::dictionary::Dictionary;
use super::inserter::{FieldIndexInserter, InserterState};
use super::iterator::{PostingIterator, PostingSearch};
use super::posting::{PostingStore, PostingVariant};
use super::remover::FieldIndexRemover;
use super::{FieldLengthCalculator, FieldLengthInfo, IndexBuilder};
use crate::generation::{GenerationGuard, GenerationHandler};
use crate::invert::field_inverter::FieldInverter;
use crate::schema::Schema;
use crate::store::{FeatureStore, WordStore};
use crate::types::{DocIdAndFeatures, FieldId, MemoryUsage};

/// Object-safe surface of a per-field index.
pub trait IFieldIndex: Send + Sync {
    fn field_id(&self) -> FieldId;
    fn has_interleaved_features(&self) -> bool;

    /// Replay pending removes recorded by the inverter.
    fn apply_removes(&self, inverter: &mut FieldInverter);

    /// Drive the inverter's sorted push walk into this index.
    fn push_documents(&self, inverter: &mut FieldInverter);

    /// Flush the remover, freeze the current state, advance the
    /// generation and reclaim memory past the oldest guard.
    fn commit(&self);

    /// Relocate every live feature blob and retire the old buffers.
    fn compact_features(&self);

    /// Emit every term in order with its decoded posting entries.
    fn dump(&self, builder: &mut dyn IndexBuilder);

    /// Number of dictionary entries with a non-null posting list.
    fn num_unique_words(&self) -> u64;

    fn memory_usage(&self) -> MemoryUsage;
    fn field_length_info(&self) -> FieldLengthInfo;
    fn calculator(&self) -> Arc<FieldLengthCalculator>;
    fn take_guard(&self) -> GenerationGuard;

    /// Posting iterator for `term` under a fresh generation guard, or
    /// `None` when the term has no postings.
    fn make_search(self: Arc<Self>, term: &[u8]) -> Option<Box<dyn PostingSearch>>;
}

struct WriterState<P: PostingVariant> {
    inserter: InserterState<P>,
    remover: FieldIndexRemover,
}

pub struct FieldIndex<P: PostingVariant> {
    field_id: FieldId,
    word_store: WordStore,
    feature_store: FeatureStore,
    posting_store: PostingStore<P>,
    dict: Dictionary,
    generations: GenerationHandler,
    calculator: Arc<FieldLengthCalculator>,
    live_words: AtomicU64,
    writer: Mutex<WriterState<P>>,
}

impl<P: PostingVariant> FieldIndex<P> {
    pub fn new(schema: &Schema, field_id: FieldId, info: FieldLengthInfo) -> Self {
        let word_store = WordStore::new();
        let dict = Dictionary::new(&word_store);
        Self {
            field_id,
            feature_store: FeatureStore::new(schema),
            posting_store: PostingStore::new(),
            dict,
            word_store,
            generations: GenerationHandler::new(),
            calculator: Arc::new(FieldLengthCalculator::new(info)),
            live_words: AtomicU64::new(0),
            writer: Mutex::new(WriterState {
                inserter: InserterState::default(),
                remover: FieldIndexRemover::new(),
            }),
        }
    }

    pub(crate) fn dictionary(&self) -> &Dictionary {
        &self.dict
    }

    pub(crate) fn posting_store(&self) -> &PostingStore<P> {
        &self.posting_store
    }

    pub(crate) fn feature_store(&self) -> &FeatureStore {
        &self.feature_store
    }

    pub(crate) fn generation_handler(&self) -> &GenerationHandler {
        &self.generations
    }
}

impl<P: PostingVariant> IFieldIndex for FieldIndex<P> {
    fn field_id(&self) -> FieldId {
        self.field_id
    }

    fn has_interleaved_features(&self) -> bool {
        P::INTERLEAVED
    }

    fn apply_removes(&self, inverter: &mut FieldInverter) {
        let mut writer = self.writer.lock();
        let words = self.word_store.view();
        inverter.apply_removes(&mut writer.remover, &words);
    }

    fn push_documents(&self, inverter: &mut FieldInverter) {
        let mut writer = self.writer.lock();
        let writer = &mut *writer;
        let mut session = FieldIndexInserter {
            field_id: self.field_id,
            word_store: &self.word_store,
            feature_store: &self.feature_store,
            posting_store: &self.posting_store,
            dict: &self.dict,
            generation: self.generations.current_generation(),
            live_words: &self.live_words,
            remover: &mut writer.remover,
            state: &mut writer.inserter,
        };
        inverter.push_documents(&mut session);
    }

    fn commit(&self) {
        let mut writer = self.writer.lock();
        writer.remover.flush();
        self.dict.freeze(self.word_store.view());
        self.generations.inc_generation();
        let oldest_used = self.generations.oldest_used_generation();
        self.posting_store.reclaim_memory(oldest_used);
        self.feature_store.reclaim_memory(oldest_used);
        writer.remover.reclaim_memory(oldest_used);
    }

    fn compact_features(&self) {
        let _writer = self.writer.lock();
        let to_hold = self.feature_store.start_compact();
        let snapshot = self.dict.snapshot();
        for entry in snapshot.entries() {
            let Some(list) = self.posting_store.resolve(entry.posting) else {
                continue;
            };
            for (_, posting_entry) in list.iter() {
                let old_ref = posting_entry.features();
                let bit_len = self.feature_store.bit_size(self.field_id, old_ref);
                let new_ref = self.feature_store.relocate(self.field_id, old_ref, bit_len);
                // The relocated bytes precede the release store.
                posting_entry.update_features(new_ref);
            }
        }
        let generation = self.generations.current_generation();
        self.feature_store.finish_compact(to_hold, generation);
    }

    fn dump(&self, builder: &mut dyn IndexBuilder) {
        let snapshot = self.dict.snapshot();
        let features_view = self.feature_store.view();
        let mut features = DocIdAndFeatures::default();
        for (word, entry) in snapshot.iter() {
            let Some(list) = self.posting_store.resolve(entry.posting) else {
                continue;
            };
            builder.start_word(word);
            for (doc_id, posting_entry) in list.iter() {
                features.clear(doc_id);
                self.feature_store.decode_with_view(
                    &features_view,
                    self.field_id,
                    posting_entry.features(),
                    &mut features,
                );
                if P::INTERLEAVED {
                    features.set_num_occs(posting_entry.num_occs() as u32);
                    features.set_field_length(posting_entry.field_length() as u32);
                }
                builder.add_document(&features);
            }
            builder.end_word();
        }
    }

    fn num_unique_words(&self) -> u64 {
        self.live_words.load(Ordering::Relaxed)
    }

    fn memory_usage(&self) -> MemoryUsage {
        let mut usage = self.word_store.memory_usage();
        usage.merge(self.feature_store.memory_usage());
        usage.merge(self.posting_store.memory_usage());
        usage.merge(self.dict.memory_usage());
        usage.merge(self.writer.lock().remover.memory_usage());
        usage
    }

    fn field_length_info(&self) -> FieldLengthInfo {
        self.calculator.info()
    }

    fn calculator(&self) -> Arc<FieldLengthCalculator> {
        Arc::clone(&self.calculator)
    }

    fn take_guard(&self) -> GenerationGuard {
        self.generations.take_guard()
    }

    fn make_search(self: Arc<Self>, term: &[u8]) -> Option<Box<dyn PostingSearch>> {
        let guard = self.generations.take_guard();
        let snapshot = self.dict.snapshot();
        let entry = snapshot.lookup(term)?;
        let list = self.posting_store.resolve(entry.posting)?;
        Some(Box::new(PostingIterator::new(self, guard, list)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{FieldValue, StringValue};
    use crate::index::posting::{InterleavedPosting, PlainPosting};
    use crate::schema::CollectionType;
    use crate::types::DocId;

    fn schema() -> Schema {
        let mut schema = Schema::new();
        schema.add_text_field("f0", CollectionType::Single, false);
        schema.add_text_field("f1", CollectionType::Array, true);
        schema
    }

    fn push_text(inverter: &mut FieldInverter, doc_id: DocId, text: &str) {
        inverter
            .invert_field(doc_id, Some(&FieldValue::String(StringValue::tokenized(text))))
            .unwrap();
    }

    fn commit_batch(index: &Arc<FieldIndex<PlainPosting>>, inverter: &mut FieldInverter) {
        index.apply_removes(inverter);
        index.push_documents(inverter);
        index.commit();
    }

    fn docs_for(index: &Arc<FieldIndex<PlainPosting>>, term: &str) -> Vec<DocId> {
        let Some(mut search) = Arc::clone(index).make_search(term.as_bytes()) else {
            return Vec::new();
        };
        search.init_range(1, DocId::MAX);
        let mut docs = Vec::new();
        let mut doc = search.doc_id();
        while let Some(d) = doc {
            docs.push(d);
            doc = search.seek(d + 1);
        }
        docs
    }

    #[test]
    fn test_push_commit_search_cycle() {
        let schema = schema();
        let index = Arc::new(FieldIndex::<PlainPosting>::new(&schema, 0, FieldLengthInfo::default()));
        let mut inverter = FieldInverter::new(
            0,
            "f0",
            CollectionType::Single,
            index.calculator(),
        );

        push_text(&mut inverter, 1, "red green");
        push_text(&mut inverter, 2, "green blue");
        commit_batch(&index, &mut inverter);

        assert_eq!(docs_for(&index, "green"), vec![1, 2]);
        assert_eq!(docs_for(&index, "red"), vec![1]);
        assert_eq!(docs_for(&index, "blue"), vec![2]);
        assert_eq!(index.num_unique_words(), 3);

        // Overwrite doc 1; its old terms disappear.
        push_text(&mut inverter, 1, "blue");
        commit_batch(&index, &mut inverter);

        assert_eq!(docs_for(&index, "green"), vec![2]);
        assert_eq!(docs_for(&index, "red"), Vec::<DocId>::new());
        assert_eq!(docs_for(&index, "blue"), vec![1, 2]);
        assert_eq!(index.num_unique_words(), 2);
    }

    #[test]
    fn test_retired_posting_slots_recycle_after_guards() {
        let schema = schema();
        let index = Arc::new(FieldIndex::<PlainPosting>::new(&schema, 0, FieldLengthInfo::default()));
        let mut inverter = FieldInverter::new(
            0,
            "f0",
            CollectionType::Single,
            index.calculator(),
        );

        push_text(&mut inverter, 1, "term");
        commit_batch(&index, &mut inverter);

        // A pinned reader keeps the retired list resolvable across the
        // next mutation's commit.
        let mut pinned = Arc::clone(&index).make_search(b"term").unwrap();
        pinned.init_range(1, DocId::MAX);

        push_text(&mut inverter, 2, "term");
        commit_batch(&index, &mut inverter);
        assert_eq!(pinned.seek(1), Some(1));
        assert_eq!(pinned.seek(2), None);
        drop(pinned);

        // With no guards left, another commit reclaims the hold list.
        commit_batch(&index, &mut inverter);
        assert_eq!(docs_for(&index, "term"), vec![1, 2]);
    }

    #[test]
    fn test_variant_selection() {
        let schema = schema();
        let plain: Arc<dyn IFieldIndex> =
            Arc::new(FieldIndex::<PlainPosting>::new(&schema, 0, FieldLengthInfo::default()));
        let interleaved: Arc<dyn IFieldIndex> = Arc::new(FieldIndex::<InterleavedPosting>::new(
            &schema,
            1,
            FieldLengthInfo::default(),
        ));
        assert!(!plain.has_interleaved_features());
        assert!(interleaved.has_interleaved_features());
        assert_eq!(plain.num_unique_words(), 0);
    }

    #[test]
    fn test_commit_advances_generation() {
        let schema = schema();
        let index = FieldIndex::<PlainPosting>::new(&schema, 0, FieldLengthInfo::default());
        let before = index.generation_handler().current_generation();
        index.commit();
        assert_eq!(index.generation_handler().current_generation(), before + 1);
    }
}
