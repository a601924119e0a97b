//! Memory index facade
//!
//! The top-level index over all schema fields: document ingest through
//! the two-stage pipeline, commit with completion callback, freeze,
//! dump, blueprint creation for the query layer, and statistics.

use parking_lot::Mutex;
use roaring::RoaringBitmap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use tracing::warn;

use crate::document::{Document, LidVector};
use crate::error::IndexError;
use crate::executor::SequencedTaskExecutor;
use crate::index::iterator::TermBlueprint;
use crate::index::{
    FieldIndexCollection, FieldLengthInfo, FieldLengthInspector, IndexBuilder,
};
use crate::invert::{
    CommitCallback, CommitStatus, DocumentInverterCollection, DocumentInverterContext,
};
use crate::schema::Schema;
use crate::types::{DocId, MemoryUsage};

const DEFAULT_MAX_INVERTERS: u32 = 4;

pub struct MemoryIndex {
    schema: Arc<Schema>,
    invert_executor: Arc<dyn SequencedTaskExecutor>,
    field_indexes: Arc<FieldIndexCollection>,
    inverters: Mutex<DocumentInverterCollection>,
    frozen: AtomicBool,
    max_doc_id: AtomicU32,
    num_docs: AtomicU32,
    indexed_docs: Mutex<RoaringBitmap>,
    pruned_schema: Mutex<Option<Arc<Schema>>>,
    hidden_fields: Mutex<Vec<bool>>,
}

impl MemoryIndex {
    pub fn new(
        schema: Arc<Schema>,
        inspector: &dyn FieldLengthInspector,
        invert_executor: Arc<dyn SequencedTaskExecutor>,
        push_executor: Arc<dyn SequencedTaskExecutor>,
    ) -> Self {
        let field_indexes = Arc::new(FieldIndexCollection::new(&schema, inspector));
        let context = Arc::new(DocumentInverterContext::new(
            Arc::clone(&schema),
            Arc::clone(&invert_executor),
            push_executor,
            Arc::clone(&field_indexes),
        ));
        let inverters = Mutex::new(DocumentInverterCollection::new(
            context,
            DEFAULT_MAX_INVERTERS,
        ));
        let num_fields = schema.num_fields();
        Self {
            schema,
            invert_executor,
            field_indexes,
            inverters,
            frozen: AtomicBool::new(false),
            max_doc_id: AtomicU32::new(0),
            num_docs: AtomicU32::new(0),
            indexed_docs: Mutex::new(RoaringBitmap::new()),
            pruned_schema: Mutex::new(None),
            hidden_fields: Mutex::new(vec![false; num_fields]),
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Enqueue inversion of one document. Dropped with a warning after
    /// `freeze`.
    pub fn insert_document(&self, doc_id: DocId, doc: &Document) {
        if self.frozen.load(Ordering::Acquire) {
            warn!(
                "{}",
                IndexError::Frozen(format!("ignoring insert of document {}", doc_id))
            );
            return;
        }
        self.max_doc_id.fetch_max(doc_id, Ordering::Relaxed);
        if self.indexed_docs.lock().insert(doc_id) {
            self.num_docs.fetch_add(1, Ordering::Relaxed);
        }
        self.inverters.lock().active_inverter().invert_document(doc_id, doc);
    }

    /// Enqueue removal of a batch of documents. Dropped with a warning
    /// after `freeze`.
    pub fn remove_documents(&self, lids: LidVector) {
        if self.frozen.load(Ordering::Acquire) {
            warn!(
                "{}",
                IndexError::Frozen(format!("ignoring remove of {} documents", lids.len()))
            );
            return;
        }
        {
            let mut indexed = self.indexed_docs.lock();
            for lid in &lids {
                if indexed.remove(*lid) {
                    self.num_docs.fetch_sub(1, Ordering::Relaxed);
                }
            }
        }
        self.inverters.lock().active_inverter().remove_documents(lids);
    }

    /// Start the push stage for everything inverted so far. `on_done`
    /// is released when every per-field push task has completed; its
    /// status carries the per-document errors of this batch.
    pub fn commit_with(&self, on_done: Arc<CommitCallback>) {
        // Push may only start after the invert stage has drained.
        self.invert_executor.sync_all();
        let mut inverters = self.inverters.lock();
        inverters.active_inverter().push_documents(on_done);
        inverters.switch_active_inverter();
    }

    /// Commit and wait for completion.
    pub fn commit(&self) -> CommitStatus {
        let (on_done, done_rx) = CommitCallback::channel();
        self.commit_with(on_done);
        done_rx.recv().unwrap_or_default()
    }

    /// Latch the frozen flag; subsequent mutating calls are dropped.
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    /// Emit the whole index, field by field in schema order.
    pub fn dump(&self, builder: &mut dyn IndexBuilder) {
        self.field_indexes.dump(builder);
    }

    /// Blueprint for one `(field, term)` pair. Unknown and hidden
    /// fields yield the empty blueprint.
    pub fn create_blueprint(&self, field_name: &str, term: &str) -> TermBlueprint {
        let Some(field_id) = self.schema.field_id(field_name) else {
            return TermBlueprint::empty();
        };
        if self.hidden_fields.lock()[field_id as usize] {
            return TermBlueprint::empty();
        }
        TermBlueprint::new(
            Some(Arc::clone(self.field_indexes.get(field_id))),
            term.as_bytes(),
        )
    }

    /// Relocate every field's feature blobs, retiring the old buffers
    /// to their generation hold lists. Intended to run between commits.
    pub fn compact_memory(&self) {
        for index in self.field_indexes.iter() {
            index.compact_features();
        }
    }

    /// Hide fields absent from the intersection of the active schema
    /// with `schema`.
    pub fn prune_removed_fields(&self, schema: &Schema) {
        let mut pruned = self.pruned_schema.lock();
        let next = match pruned.as_ref() {
            None => {
                let next = self.schema.intersect(schema);
                if next == *self.schema {
                    return;
                }
                Arc::new(next)
            }
            Some(current) => {
                let next = current.intersect(schema);
                if next == **current {
                    return;
                }
                Arc::new(next)
            }
        };
        let mut hidden = self.hidden_fields.lock();
        for (i, field) in self.schema.fields().iter().enumerate() {
            hidden[i] = !next.contains_field(field);
        }
        *pruned = Some(next);
    }

    pub fn pruned_schema(&self) -> Option<Arc<Schema>> {
        self.pruned_schema.lock().clone()
    }

    /// Live documents. Advisory: maintained with relaxed atomics.
    pub fn num_docs(&self) -> u32 {
        self.num_docs.load(Ordering::Relaxed)
    }

    pub fn max_doc_id(&self) -> u32 {
        self.max_doc_id.load(Ordering::Relaxed)
    }

    pub fn num_unique_words(&self) -> u64 {
        self.field_indexes.num_unique_words()
    }

    pub fn field_indexes(&self) -> &Arc<FieldIndexCollection> {
        &self.field_indexes
    }

    pub fn get_field_length_info(&self, field_name: &str) -> FieldLengthInfo {
        match self.schema.field_id(field_name) {
            Some(field_id) => self.field_indexes.get(field_id).field_length_info(),
            None => FieldLengthInfo::default(),
        }
    }

    pub fn memory_usage(&self) -> MemoryUsage {
        self.field_indexes.memory_usage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Annotation, FieldValue, Span, SpanTree, StringValue, LINGUISTICS_TREE};
    use crate::executor::ThreadedSequencedExecutor;
    use crate::index::iterator::TermFieldMatchData;
    use crate::index::EmptyFieldLengthInspector;
    use crate::invert::{HOSTNAME_BEGIN, HOSTNAME_END};
    use crate::schema::CollectionType;
    use crate::types::DocIdAndFeatures;
    use std::collections::{BTreeMap, BTreeSet};

    fn make_index(schema: Schema) -> MemoryIndex {
        MemoryIndex::new(
            Arc::new(schema),
            &EmptyFieldLengthInspector,
            Arc::new(ThreadedSequencedExecutor::new(2, "invert")),
            Arc::new(ThreadedSequencedExecutor::new(2, "push")),
        )
    }

    fn single_field_schema() -> Schema {
        let mut schema = Schema::new();
        schema.add_text_field("f0", CollectionType::Single, false);
        schema
    }

    fn text_doc(field: &str, text: &str) -> Document {
        let mut doc = Document::new();
        doc.set(field, FieldValue::String(StringValue::tokenized(text)));
        doc
    }

    fn search_docs(index: &MemoryIndex, field: &str, term: &str) -> Vec<DocId> {
        let blueprint = index.create_blueprint(field, term);
        let Some(mut search) = blueprint.search() else {
            return Vec::new();
        };
        let mut docs = Vec::new();
        let mut doc = search.doc_id();
        while let Some(d) = doc {
            docs.push(d);
            doc = search.seek(d + 1);
        }
        docs
    }

    fn unpack(index: &MemoryIndex, field: &str, term: &str, doc_id: DocId) -> TermFieldMatchData {
        let blueprint = index.create_blueprint(field, term);
        let mut search = blueprint.search().expect("term not found");
        let doc = search.seek(doc_id).expect("doc not found");
        assert_eq!(doc, doc_id);
        let mut match_data = TermFieldMatchData::default();
        search.unpack(doc_id, &mut match_data);
        match_data
    }

    /// Dump sink collecting the full index structure for comparisons.
    #[derive(Debug, Default, Clone, PartialEq)]
    struct CollectedIndex {
        // field -> term -> docs with decoded features
        fields: BTreeMap<u32, BTreeMap<Vec<u8>, Vec<DocIdAndFeatures>>>,
    }

    #[derive(Default)]
    struct CollectingBuilder {
        collected: CollectedIndex,
        current_field: u32,
        current_word: Vec<u8>,
    }

    impl IndexBuilder for CollectingBuilder {
        fn start_field(&mut self, field_id: u32) {
            self.current_field = field_id;
            self.collected.fields.entry(field_id).or_default();
        }

        fn start_word(&mut self, word: &[u8]) {
            self.current_word = word.to_vec();
        }

        fn add_document(&mut self, features: &DocIdAndFeatures) {
            self.collected
                .fields
                .get_mut(&self.current_field)
                .unwrap()
                .entry(self.current_word.clone())
                .or_default()
                .push(features.clone());
        }

        fn end_word(&mut self) {}

        fn end_field(&mut self) {}
    }

    fn collect(index: &MemoryIndex) -> CollectedIndex {
        let mut builder = CollectingBuilder::default();
        index.dump(&mut builder);
        builder.collected
    }

    fn field_terms(collected: &CollectedIndex, field_id: u32) -> Vec<String> {
        collected.fields[&field_id]
            .keys()
            .map(|t| String::from_utf8_lossy(t).into_owned())
            .collect()
    }

    fn assert_invariants(collected: &CollectedIndex) {
        for terms in collected.fields.values() {
            // Dictionary order is strictly increasing by construction of
            // the BTreeMap; posting and feature order is checked here.
            for postings in terms.values() {
                let docs: Vec<u32> = postings.iter().map(|f| f.doc_id).collect();
                assert!(docs.windows(2).all(|w| w[0] < w[1]));
                for features in postings {
                    let elems: Vec<u32> =
                        features.elements.iter().map(|e| e.element_id).collect();
                    assert!(elems.windows(2).all(|w| w[0] < w[1]));
                    let mut last: Option<(u32, u32)> = None;
                    for pos in &features.word_positions {
                        let key = (pos.element_index, pos.word_pos);
                        if let Some(last) = last {
                            assert!(last < key, "positions must strictly increase");
                        }
                        last = Some(key);
                    }
                }
            }
        }
    }

    #[test]
    fn test_single_insert_single_term() {
        let index = make_index(single_field_schema());
        index.insert_document(1, &text_doc("f0", "hello"));
        let status = index.commit();
        assert!(status.is_ok());

        let collected = collect(&index);
        assert_eq!(field_terms(&collected, 0), vec!["hello"]);
        assert_eq!(search_docs(&index, "f0", "hello"), vec![1]);
        assert_eq!(index.num_docs(), 1);
        assert_eq!(index.max_doc_id(), 1);
        assert_eq!(index.num_unique_words(), 1);

        let match_data = unpack(&index, "f0", "hello", 1);
        assert_eq!(match_data.positions.len(), 1);
        assert_eq!(match_data.positions[0].position, 0);
        assert_eq!(match_data.positions[0].element_id, 0);
        assert_eq!(match_data.positions[0].element_length, 1);
        assert_invariants(&collected);
    }

    #[test]
    fn test_duplicate_insert_coalesces() {
        let index = make_index(single_field_schema());
        index.insert_document(1, &text_doc("f0", "a a b"));
        index.commit();

        let collected = collect(&index);
        assert_eq!(field_terms(&collected, 0), vec!["a", "b"]);

        let a = unpack(&index, "f0", "a", 1);
        let positions: Vec<u32> = a.positions.iter().map(|p| p.position).collect();
        assert_eq!(positions, vec![0, 1]);

        let b = unpack(&index, "f0", "b", 1);
        let positions: Vec<u32> = b.positions.iter().map(|p| p.position).collect();
        assert_eq!(positions, vec![2]);
        assert_invariants(&collected);
    }

    #[test]
    fn test_overwrite_replaces_old_terms() {
        let index = make_index(single_field_schema());
        index.insert_document(1, &text_doc("f0", "x"));
        index.commit();
        index.insert_document(1, &text_doc("f0", "y"));
        index.commit();

        assert_eq!(search_docs(&index, "f0", "x"), Vec::<DocId>::new());
        assert_eq!(search_docs(&index, "f0", "y"), vec![1]);
        assert_eq!(index.num_docs(), 1);
        assert_eq!(index.num_unique_words(), 1);
    }

    #[test]
    fn test_array_field_interleaved_counters() {
        let mut schema = Schema::new();
        schema.add_text_field("f1", CollectionType::Array, true);
        let index = make_index(schema);

        let mut doc = Document::new();
        doc.set(
            "f1",
            FieldValue::Array(vec![
                StringValue::tokenized("foo bar"),
                StringValue::tokenized("foo"),
            ]),
        );
        index.insert_document(7, &doc);
        index.commit();

        let foo = unpack(&index, "f1", "foo", 7);
        assert_eq!(foo.num_occs, 2);
        assert_eq!(foo.field_length, 3);
        let bar = unpack(&index, "f1", "bar", 7);
        assert_eq!(bar.num_occs, 1);
        assert_eq!(bar.field_length, 3);
    }

    #[test]
    fn test_url_field_streams() {
        let mut schema = Schema::new();
        schema.add_uri_field("u", CollectionType::Single);
        let index = make_index(schema);

        let mut doc = Document::new();
        doc.set(
            "u",
            FieldValue::String(StringValue::plain("http://host.example:80/p?q#f")),
        );
        index.insert_document(3, &doc);
        let status = index.commit();
        assert!(status.is_ok(), "unexpected errors: {:?}", status.errors);

        assert_eq!(search_docs(&index, "u.scheme", "http"), vec![3]);
        assert_eq!(search_docs(&index, "u.host", "host"), vec![3]);
        assert_eq!(search_docs(&index, "u.host", "example"), vec![3]);
        // Default ports are not indexed.
        assert_eq!(search_docs(&index, "u.port", "80"), Vec::<DocId>::new());
        assert_eq!(search_docs(&index, "u.path", "p"), vec![3]);
        assert_eq!(search_docs(&index, "u.query", "q"), vec![3]);
        assert_eq!(search_docs(&index, "u.fragment", "f"), vec![3]);

        for token in ["http", "host", "example", "p", "q", "f"] {
            assert_eq!(search_docs(&index, "u.all", token), vec![3], "token {}", token);
        }
        assert_eq!(search_docs(&index, "u.all", "80"), Vec::<DocId>::new());

        // The hostname stream is sandwiched by the sentinel markers.
        let begin = unpack(&index, "u.hostname", HOSTNAME_BEGIN, 3);
        let end = unpack(&index, "u.hostname", HOSTNAME_END, 3);
        let host = unpack(&index, "u.hostname", "host", 3);
        let example = unpack(&index, "u.hostname", "example", 3);
        assert_eq!(begin.positions[0].position, 0);
        assert_eq!(host.positions[0].position, 1);
        assert_eq!(example.positions[0].position, 2);
        assert_eq!(end.positions[0].position, 3);
    }

    #[test]
    fn test_remove_then_insert_same_doc() {
        let index = make_index(single_field_schema());
        index.insert_document(5, &text_doc("f0", "alpha"));
        index.commit();
        index.remove_documents(vec![5]);
        index.commit();
        index.insert_document(5, &text_doc("f0", "beta"));
        index.commit();

        assert_eq!(search_docs(&index, "f0", "alpha"), Vec::<DocId>::new());
        assert_eq!(search_docs(&index, "f0", "beta"), vec![5]);
        assert_eq!(index.num_docs(), 1);
    }

    #[test]
    fn test_insert_then_remove_restores_dictionary() {
        let index = make_index(single_field_schema());
        index.insert_document(1, &text_doc("f0", "keep"));
        index.commit();
        let before = collect(&index);

        index.insert_document(2, &text_doc("f0", "extra words here"));
        index.commit();
        index.remove_documents(vec![2]);
        index.commit();

        // Dump skips entries whose posting list is gone, so the visible
        // dictionary matches the pre-insert state.
        let after = collect(&index);
        assert_eq!(before, after);
        assert_eq!(index.num_unique_words(), 1);
    }

    #[test]
    fn test_multi_field_document() {
        let mut schema = Schema::new();
        schema.add_text_field("title", CollectionType::Single, false);
        schema.add_text_field("body", CollectionType::Single, true);
        let index = make_index(schema);

        let mut doc = Document::new();
        doc.set("title", FieldValue::String(StringValue::tokenized("rust index")));
        doc.set("body", FieldValue::String(StringValue::tokenized("index engines in rust")));
        index.insert_document(9, &doc);
        index.commit();

        assert_eq!(search_docs(&index, "title", "rust"), vec![9]);
        assert_eq!(search_docs(&index, "body", "rust"), vec![9]);
        assert_eq!(search_docs(&index, "title", "engines"), Vec::<DocId>::new());
        assert_eq!(search_docs(&index, "body", "engines"), vec![9]);
    }

    #[test]
    fn test_weighted_set_field() {
        let mut schema = Schema::new();
        schema.add_text_field("tags", CollectionType::WeightedSet, true);
        let index = make_index(schema);

        let mut doc = Document::new();
        doc.set(
            "tags",
            FieldValue::WeightedSet(vec![
                (StringValue::tokenized("red"), 10),
                (StringValue::tokenized("blue"), -3),
            ]),
        );
        index.insert_document(4, &doc);
        index.commit();

        let red = unpack(&index, "tags", "red", 4);
        assert_eq!(red.positions[0].element_weight, 10);
        let blue = unpack(&index, "tags", "blue", 4);
        assert_eq!(blue.positions[0].element_weight, -3);
        assert_eq!(blue.positions[0].element_id, 1);
    }

    #[test]
    fn test_schema_mismatch_reported_in_status() {
        let mut schema = Schema::new();
        schema.add_text_field("present", CollectionType::Single, false);
        schema.add_text_field("absent", CollectionType::Single, false);
        let index = make_index(schema);

        index.insert_document(1, &text_doc("present", "word"));
        let status = index.commit();
        assert_eq!(
            status.errors,
            vec![IndexError::SchemaMismatch("absent".to_string())]
        );
        // The present field is indexed regardless.
        assert_eq!(search_docs(&index, "present", "word"), vec![1]);
    }

    #[test]
    fn test_type_mismatch_reported_in_status() {
        let index = make_index(single_field_schema());
        let mut doc = Document::new();
        doc.set("f0", FieldValue::Int(42));
        index.insert_document(1, &doc);
        let status = index.commit();
        assert_eq!(status.errors.len(), 1);
        assert!(matches!(
            status.errors[0],
            IndexError::TypeMismatch { .. }
        ));
    }

    #[test]
    fn test_frozen_index_drops_mutations() {
        let index = make_index(single_field_schema());
        index.insert_document(1, &text_doc("f0", "before"));
        index.commit();
        index.freeze();
        assert!(index.is_frozen());

        index.insert_document(2, &text_doc("f0", "after"));
        index.remove_documents(vec![1]);
        index.commit();

        assert_eq!(search_docs(&index, "f0", "before"), vec![1]);
        assert_eq!(search_docs(&index, "f0", "after"), Vec::<DocId>::new());
        assert_eq!(index.num_docs(), 1);
    }

    #[test]
    fn test_reader_keeps_pre_commit_state() {
        let index = make_index(single_field_schema());
        index.insert_document(1, &text_doc("f0", "stable"));
        index.commit();

        let blueprint = index.create_blueprint("f0", "stable");
        let mut old_search = blueprint.search().unwrap();

        index.insert_document(2, &text_doc("f0", "stable"));
        index.commit();

        // The iterator created before the commit sees exactly the old
        // posting list.
        assert_eq!(old_search.seek(1), Some(1));
        assert_eq!(old_search.seek(2), None);
        assert_eq!(search_docs(&index, "f0", "stable"), vec![1, 2]);
    }

    #[test]
    fn test_reader_survives_compaction_and_reclaim() {
        let index = make_index(single_field_schema());
        index.insert_document(1, &text_doc("f0", "durable data"));
        index.commit();

        let blueprint = index.create_blueprint("f0", "durable");
        let mut search = blueprint.search().unwrap();
        assert_eq!(search.seek(1), Some(1));

        // Relocate all features and reclaim the old buffers.
        index.compact_memory();
        index.commit();
        index.commit();

        let mut match_data = TermFieldMatchData::default();
        search.unpack(1, &mut match_data);
        assert_eq!(match_data.positions.len(), 1);
        assert_eq!(match_data.positions[0].position, 0);
    }

    #[test]
    fn test_compaction_preserves_contents() {
        let index = make_index(single_field_schema());
        for doc in 1..=20u32 {
            index.insert_document(doc, &text_doc("f0", "common words appear here"));
        }
        index.commit();
        let before = collect(&index);

        index.compact_memory();
        index.commit();
        index.commit();

        let after = collect(&index);
        assert_eq!(before, after);
    }

    #[test]
    fn test_pruned_fields_get_empty_blueprints() {
        let mut schema = Schema::new();
        schema.add_text_field("keep", CollectionType::Single, false);
        schema.add_text_field("drop", CollectionType::Single, false);
        let index = make_index(schema);

        let mut doc = Document::new();
        doc.set("keep", FieldValue::String(StringValue::tokenized("k")));
        doc.set("drop", FieldValue::String(StringValue::tokenized("d")));
        index.insert_document(1, &doc);
        index.commit();

        let mut remaining = Schema::new();
        remaining.add_text_field("keep", CollectionType::Single, false);
        index.prune_removed_fields(&remaining);

        assert!(index.pruned_schema().is_some());
        assert_eq!(search_docs(&index, "keep", "k"), vec![1]);
        assert!(index.create_blueprint("drop", "d").search().is_none());
        assert!(index.create_blueprint("unknown", "d").search().is_none());
    }

    #[test]
    fn test_field_length_info() {
        let index = make_index(single_field_schema());
        index.insert_document(1, &text_doc("f0", "one two three four"));
        index.insert_document(2, &text_doc("f0", "one two"));
        index.commit();

        let info = index.get_field_length_info("f0");
        assert_eq!(info.num_samples, 2);
        assert_eq!(info.average_field_length, 3.0);
    }

    #[test]
    fn test_memory_usage_reports_hold_after_compaction() {
        let index = make_index(single_field_schema());
        for doc in 1..=50u32 {
            index.insert_document(doc, &text_doc("f0", "some repeated content"));
        }
        index.commit();
        let baseline = index.memory_usage();
        assert!(baseline.used > 0);

        let blueprint = index.create_blueprint("f0", "repeated");
        let _pinned = blueprint.search().unwrap();
        index.compact_memory();
        // The guard held by the iterator keeps the retired buffers on
        // hold through the next commit.
        index.commit();
        assert!(index.memory_usage().on_hold > 0);
    }

    /// Rebuild documents from dumped features and verify the rebuilt
    /// index dumps identically.
    #[test]
    fn test_dump_rebuild_round_trip() {
        let mut schema = Schema::new();
        schema.add_text_field("body", CollectionType::Array, true);
        let index = make_index(schema.clone());

        let docs: Vec<(DocId, Vec<&str>)> = vec![
            (1, vec!["the quick brown fox", "jumps over"]),
            (3, vec!["the lazy dog"]),
            (8, vec!["quick quick quick"]),
        ];
        for (doc_id, elements) in &docs {
            let mut doc = Document::new();
            doc.set(
                "body",
                FieldValue::Array(elements.iter().map(|e| StringValue::tokenized(e)).collect()),
            );
            index.insert_document(*doc_id, &doc);
        }
        index.commit();
        let dumped = collect(&index);
        assert_invariants(&dumped);

        // Transpose term -> doc -> positions back into documents.
        let mut rebuilt_docs: BTreeMap<DocId, BTreeMap<(u32, u32), Vec<String>>> = BTreeMap::new();
        for (term, postings) in &dumped.fields[&0] {
            for features in postings {
                let doc = rebuilt_docs.entry(features.doc_id).or_default();
                for pos in &features.word_positions {
                    let element = &features.elements[pos.element_index as usize];
                    doc.entry((element.element_id, pos.word_pos))
                        .or_default()
                        .push(String::from_utf8(term.clone()).unwrap());
                }
            }
        }

        let rebuilt = make_index(schema);
        for (doc_id, words_at) in &rebuilt_docs {
            let max_elem = words_at.keys().map(|(e, _)| *e).max().unwrap();
            let mut elements = Vec::new();
            for elem in 0..=max_elem {
                let mut text = String::new();
                let mut annotations = Vec::new();
                let mut positions: Vec<(u32, &Vec<String>)> = words_at
                    .iter()
                    .filter(|((e, _), _)| *e == elem)
                    .map(|((_, p), words)| (*p, words))
                    .collect();
                positions.sort_by_key(|(p, _)| *p);
                for (_, words) in positions {
                    if !text.is_empty() {
                        text.push(' ');
                    }
                    let start = text.len() as u32;
                    text.push_str(&words[0]);
                    let span = Span::new(start, words[0].len() as u32);
                    for word in words {
                        annotations.push(Annotation::term_with_value(span, word));
                    }
                }
                elements.push(StringValue {
                    text,
                    trees: vec![SpanTree {
                        name: LINGUISTICS_TREE.to_string(),
                        annotations,
                    }],
                });
            }
            let mut doc = Document::new();
            doc.set("body", FieldValue::Array(elements));
            rebuilt.insert_document(*doc_id, &doc);
        }
        rebuilt.commit();

        assert_eq!(collect(&rebuilt), dumped);
    }

    #[test]
    fn test_randomized_against_model() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(0x5eed);
        let vocabulary = ["ant", "bee", "cat", "dog", "elk", "fox", "gnu", "hen"];
        let index = make_index(single_field_schema());
        let mut model: BTreeMap<String, BTreeSet<DocId>> = BTreeMap::new();
        let mut live: BTreeMap<DocId, Vec<String>> = BTreeMap::new();

        for round in 0..5 {
            for doc_id in 1..=40u32 {
                if rng.gen_bool(0.5) {
                    let words: Vec<String> = (0..rng.gen_range(1..6))
                        .map(|_| vocabulary[rng.gen_range(0..vocabulary.len())].to_string())
                        .collect();
                    index.insert_document(doc_id, &text_doc("f0", &words.join(" ")));
                    live.insert(doc_id, words);
                } else if round > 0 && rng.gen_bool(0.3) {
                    index.remove_documents(vec![doc_id]);
                    live.remove(&doc_id);
                }
            }
            index.commit();

            model.clear();
            for (doc_id, words) in &live {
                for word in words {
                    model.entry(word.clone()).or_default().insert(*doc_id);
                }
            }
            for word in vocabulary {
                let expected: Vec<DocId> =
                    model.get(word).map(|s| s.iter().copied().collect()).unwrap_or_default();
                assert_eq!(search_docs(&index, "f0", word), expected, "term {}", word);
            }
            assert_invariants(&collect(&index));
        }
    }
}
