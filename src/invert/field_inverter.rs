//! Field inverter
//!
//! Converts a batch of documents' content for one field into a sorted
//! stream of add/remove operations against the field index. Content is
//! staged as `(word, doc, element, position)` tuples in private buffers,
//! sorted at push time, and driven through the ordered inserter.

use ahash::AHashMap;
use tracing::{error, warn};

use crate::document::{AnnotationKind, FieldValue, Span, SpanNode, StringValue, LINGUISTICS_TREE};
use crate::error::{IndexError, Result};
use crate::index::inserter::OrderedInserter;
use crate::index::remover::{FieldIndexRemover, RemoveListener};
use crate::index::FieldLengthCalculator;
use crate::schema::CollectionType;
use crate::store::word_store::WordStoreView;
use crate::types::{DocId, DocIdAndFeatures, FieldId};
use std::sync::Arc;

/// Tokens longer than this are truncated before insertion.
pub const MAX_TERM_LENGTH: usize = 1024;

const ELEM_REMOVED: u32 = u32::MAX;

/// One staged occurrence. `word` holds a word reference until
/// `sort_words` replaces it with the dense word number.
#[derive(Debug, Clone, Copy)]
struct PosInfo {
    word: u32,
    doc_id: DocId,
    elem_id: u32,
    word_pos: u32,
    elem_ref: u32,
}

impl PosInfo {
    fn removed(word: u32, doc_id: DocId) -> Self {
        Self {
            word,
            doc_id,
            elem_id: ELEM_REMOVED,
            word_pos: 0,
            elem_ref: 0,
        }
    }

    fn is_removed(&self) -> bool {
        self.elem_id == ELEM_REMOVED
    }
}

fn pos_cmp(a: &PosInfo, b: &PosInfo) -> std::cmp::Ordering {
    use std::cmp::Ordering::*;
    a.word
        .cmp(&b.word)
        .then(a.doc_id.cmp(&b.doc_id))
        .then_with(|| match (a.is_removed(), b.is_removed()) {
            // Removes order before adds at the same (word, doc).
            (true, false) => Less,
            (false, true) => Greater,
            _ => a.elem_id.cmp(&b.elem_id),
        })
        .then(a.word_pos.cmp(&b.word_pos))
}

#[derive(Debug, Clone, Copy)]
struct ElemInfo {
    weight: i32,
    len: u32,
    field_length: u32,
}

fn word_at<'a>(words: &'a [u8], spans: &[(u32, u32)], word_ref: u32) -> &'a [u8] {
    let (off, len) = spans[(word_ref - 1) as usize];
    &words[off as usize..(off + len) as usize]
}

pub struct FieldInverter {
    field_id: FieldId,
    field_name: String,
    collection: CollectionType,

    // Current document state.
    elem: u32,
    wpos: u32,
    doc_id: DocId,
    old_pos_size: u32,
    doc_elems_start: usize,

    // Staging buffers, private to this inverter.
    words: Vec<u8>,
    word_spans: Vec<(u32, u32)>,
    word_nums: Vec<u32>,
    word_order: Vec<u32>,
    elems: Vec<ElemInfo>,
    positions: Vec<PosInfo>,
    features: DocIdAndFeatures,

    aborted_docs: Vec<(u32, u32)>,
    pending_docs: AHashMap<DocId, (u32, u32)>,
    remove_docs: Vec<DocId>,

    calculator: Arc<FieldLengthCalculator>,
}

impl FieldInverter {
    pub fn new(
        field_id: FieldId,
        field_name: &str,
        collection: CollectionType,
        calculator: Arc<FieldLengthCalculator>,
    ) -> Self {
        Self {
            field_id,
            field_name: field_name.to_string(),
            collection,
            elem: 0,
            wpos: 0,
            doc_id: 0,
            old_pos_size: 0,
            doc_elems_start: 0,
            words: Vec::new(),
            word_spans: Vec::new(),
            word_nums: Vec::new(),
            word_order: Vec::new(),
            elems: Vec::new(),
            positions: Vec::new(),
            features: DocIdAndFeatures::default(),
            aborted_docs: Vec::new(),
            pending_docs: AHashMap::new(),
            remove_docs: Vec::new(),
            calculator,
        }
    }

    pub fn field_id(&self) -> FieldId {
        self.field_id
    }

    /// Invert one document's value for this field. An absent value
    /// schedules removal of any previous version.
    pub fn invert_field(&mut self, doc_id: DocId, value: Option<&FieldValue>) -> Result<()> {
        match value {
            Some(value) => {
                self.start_doc(doc_id);
                match self.invert_value(value) {
                    Ok(()) => {
                        self.end_doc();
                        Ok(())
                    }
                    Err(e) => {
                        self.abort_current_doc();
                        Err(e)
                    }
                }
            }
            None => {
                self.remove_document(doc_id);
                Ok(())
            }
        }
    }

    fn invert_value(&mut self, value: &FieldValue) -> Result<()> {
        match (self.collection, value) {
            (CollectionType::Single, FieldValue::String(s)) => {
                self.start_element(1);
                self.process_annotations(s);
                self.end_element();
                Ok(())
            }
            (CollectionType::Array, FieldValue::Array(items)) => {
                for item in items {
                    self.start_element(1);
                    self.process_annotations(item);
                    self.end_element();
                }
                Ok(())
            }
            (CollectionType::WeightedSet, FieldValue::WeightedSet(items)) => {
                for (item, weight) in items {
                    self.start_element(*weight);
                    self.process_annotations(item);
                    self.end_element();
                }
                Ok(())
            }
            _ => Err(IndexError::TypeMismatch {
                field: self.field_name.clone(),
                expected: match self.collection {
                    CollectionType::Single => "string",
                    CollectionType::Array => "array",
                    CollectionType::WeightedSet => "weighted_set",
                },
                actual: value.kind(),
            }),
        }
    }

    pub fn start_doc(&mut self, doc_id: DocId) {
        assert_eq!(self.doc_id, 0, "document already in progress");
        assert_ne!(doc_id, 0);
        self.abort_pending_doc(doc_id);
        self.remove_docs.push(doc_id);
        self.doc_id = doc_id;
        self.elem = 0;
        self.wpos = 0;
        self.doc_elems_start = self.elems.len();
    }

    pub fn end_doc(&mut self) {
        let mut field_length = 0u32;
        if self.elem > 0 {
            let start = self.elems.len() - self.elem as usize;
            for elem in &self.elems[start..] {
                field_length += elem.len;
            }
            for elem in &mut self.elems[start..] {
                elem.field_length = field_length;
            }
        }
        self.calculator.add_field_length(field_length);
        let new_pos_size = self.positions.len() as u32;
        self.pending_docs
            .insert(self.doc_id, (self.old_pos_size, new_pos_size - self.old_pos_size));
        self.doc_id = 0;
        self.old_pos_size = new_pos_size;
    }

    pub fn start_element(&mut self, weight: i32) {
        self.elems.push(ElemInfo {
            weight,
            len: 0,
            field_length: 0,
        });
    }

    pub fn end_element(&mut self) {
        self.elems.last_mut().unwrap().len = self.wpos;
        self.wpos = 0;
        self.elem += 1;
    }

    /// Schedule removal of a document's previous content.
    pub fn remove_document(&mut self, doc_id: DocId) {
        self.abort_pending_doc(doc_id);
        self.remove_docs.push(doc_id);
    }

    /// Walk the text's annotation tree and stage one occurrence per
    /// annotated span. Without a tree the whole text is one word.
    pub fn process_annotations(&mut self, value: &StringValue) {
        let Some(tree) = value.tree(LINGUISTICS_TREE) else {
            if !value.text.is_empty() {
                self.add_word(value.text.as_bytes());
            }
            return;
        };
        let text = value.text.as_bytes();
        let mut terms: Vec<(Span, Option<&str>)> = tree
            .annotations
            .iter()
            .filter_map(|a| {
                if a.kind != AnnotationKind::Term {
                    return None;
                }
                let SpanNode::Simple(span) = &a.span else {
                    return None;
                };
                if span.len == 0 {
                    return None;
                }
                Some((*span, a.value.as_deref()))
            })
            .collect();
        terms.sort_by_key(|(span, _)| (span.from, span.len));

        let mut i = 0;
        while i < terms.len() {
            let group_span = terms[i].0;
            let mut stepped = false;
            while i < terms.len() && terms[i].0 == group_span {
                let word: Option<&[u8]> = match terms[i].1 {
                    Some(value) => Some(value.as_bytes()),
                    None => {
                        let from = group_span.from as usize;
                        text.get(from..from + group_span.len as usize)
                    }
                };
                if let Some(word) = word {
                    let word_ref = self.save_word(word);
                    if word_ref != 0 {
                        self.add(word_ref);
                        stepped = true;
                    }
                }
                i += 1;
            }
            if stepped {
                self.wpos += 1;
            }
        }
    }

    /// Stage a single word at the current position.
    pub fn add_word(&mut self, word: &[u8]) {
        let word_ref = self.save_word(word);
        if word_ref != 0 {
            self.add(word_ref);
            self.wpos += 1;
        }
    }

    /// Replay pending removes: each removed doc's recorded terms come
    /// back through [`RemoveListener::remove`] into the staging buffers.
    pub fn apply_removes(&mut self, remover: &mut FieldIndexRemover, words: &WordStoreView) {
        let docs = std::mem::take(&mut self.remove_docs);
        for doc_id in docs {
            remover.remove(doc_id, words, self);
        }
    }

    /// Sort the staged tuples and drive the inserter. Consumes the
    /// batch and resets all buffers.
    pub fn push_documents(&mut self, inserter: &mut dyn OrderedInserter) {
        self.trim_aborted_docs();
        if self.positions.is_empty() {
            self.reset();
            return;
        }
        self.sort_words();
        self.positions.sort_unstable_by(pos_cmp);

        let positions = std::mem::take(&mut self.positions);
        let mut last_word = 0u32;
        let mut last_doc = 0 as DocId;
        let mut last_elem = u32::MAX;
        let mut last_wpos = u32::MAX;
        let mut empty_features = true;

        inserter.rewind();
        for p in &positions {
            if last_word != p.word || last_doc != p.doc_id {
                if !empty_features {
                    self.features
                        .set_num_occs(self.features.word_positions.len() as u32);
                    inserter.add(last_doc, &self.features);
                    empty_features = true;
                }
                if last_word != p.word {
                    last_word = p.word;
                    let word_ref = self.word_order[p.word as usize];
                    let (off, len) = self.word_spans[(word_ref - 1) as usize];
                    inserter.set_next_word(&self.words[off as usize..(off + len) as usize]);
                }
                last_doc = p.doc_id;
                if p.is_removed() {
                    inserter.remove(last_doc);
                    continue;
                }
            }
            if empty_features {
                if p.is_removed() {
                    // Duplicate remove for the same (word, doc).
                    continue;
                }
                empty_features = false;
                self.features.clear(last_doc);
                last_elem = u32::MAX;
                last_wpos = u32::MAX;
                self.features
                    .set_field_length(self.elems[p.elem_ref as usize].field_length);
            } else {
                debug_assert!(!p.is_removed());
            }
            if p.word_pos != last_wpos || p.elem_id != last_elem {
                let elem = self.elems[p.elem_ref as usize];
                self.features
                    .add_occurrence(p.elem_id, p.word_pos, elem.weight, elem.len);
                last_elem = p.elem_id;
                last_wpos = p.word_pos;
            }
            // Duplicate annotations at the same position coalesce.
        }
        if !empty_features {
            self.features
                .set_num_occs(self.features.word_positions.len() as u32);
            inserter.add(last_doc, &self.features);
        }
        inserter.flush();
        self.reset();
    }

    fn add(&mut self, word_ref: u32) {
        self.positions.push(PosInfo {
            word: word_ref,
            doc_id: self.doc_id,
            elem_id: self.elem,
            word_pos: self.wpos,
            elem_ref: self.elems.len() as u32 - 1,
        });
    }

    fn save_word(&mut self, word: &[u8]) -> u32 {
        let mut len = word.len();
        if let Some(nul) = word.iter().position(|&b| b == 0) {
            error!(
                field = %self.field_name,
                doc_id = self.doc_id,
                "NUL byte in word, length reduced from {} to {}",
                word.len(),
                nul
            );
            len = nul;
        }
        if len > MAX_TERM_LENGTH {
            warn!(
                field = %self.field_name,
                doc_id = self.doc_id,
                "term of length {} exceeds maximum {}, truncated",
                len,
                MAX_TERM_LENGTH
            );
            len = MAX_TERM_LENGTH;
        }
        if len == 0 {
            return 0;
        }
        let offset = self.words.len() as u32;
        self.words.extend_from_slice(&word[..len]);
        self.word_spans.push((offset, len as u32));
        self.word_nums.push(0);
        self.word_spans.len() as u32
    }

    fn abort_pending_doc(&mut self, doc_id: DocId) {
        if let Some((start, len)) = self.pending_docs.remove(&doc_id) {
            if len != 0 {
                self.aborted_docs.push((start, len));
            }
        }
    }

    pub(crate) fn abort_current_doc(&mut self) {
        self.positions.truncate(self.old_pos_size as usize);
        self.elems.truncate(self.doc_elems_start);
        self.doc_id = 0;
        self.elem = 0;
        self.wpos = 0;
    }

    fn trim_aborted_docs(&mut self) {
        if self.aborted_docs.is_empty() {
            return;
        }
        self.aborted_docs.sort_unstable();
        let mut kept = Vec::with_capacity(self.positions.len());
        let mut src = 0usize;
        for (start, len) in &self.aborted_docs {
            kept.extend_from_slice(&self.positions[src..*start as usize]);
            src = (*start + *len) as usize;
        }
        kept.extend_from_slice(&self.positions[src..]);
        self.positions = kept;
        self.aborted_docs.clear();
    }

    /// Assign dense word numbers in byte order and substitute them into
    /// the staged tuples.
    fn sort_words(&mut self) {
        debug_assert!(!self.word_spans.is_empty());
        let words = &self.words;
        let spans = &self.word_spans;

        let mut refs: Vec<u32> = (1..=self.word_spans.len() as u32).collect();
        refs.sort_unstable_by(|a, b| word_at(words, spans, *a).cmp(word_at(words, spans, *b)));

        self.word_order.clear();
        self.word_order.push(0); // word number 0 is unused
        let mut word_num = 0u32;
        let mut last: Option<&[u8]> = None;
        for r in refs {
            let word = word_at(words, spans, r);
            if last != Some(word) {
                word_num += 1;
                self.word_order.push(r);
                last = Some(word);
            }
            self.word_nums[(r - 1) as usize] = word_num;
        }
        for p in &mut self.positions {
            p.word = self.word_nums[(p.word - 1) as usize];
        }
    }

    fn reset(&mut self) {
        self.words.clear();
        self.word_spans.clear();
        self.word_nums.clear();
        self.word_order.clear();
        self.elems.clear();
        self.positions.clear();
        self.pending_docs.clear();
        self.aborted_docs.clear();
        self.remove_docs.clear();
        self.old_pos_size = 0;
    }
}

impl RemoveListener for FieldInverter {
    fn remove(&mut self, word: &[u8], doc_id: DocId) {
        let word_ref = self.save_word(word);
        assert_ne!(word_ref, 0);
        self.positions.push(PosInfo::removed(word_ref, doc_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{FieldLengthInfo, FieldLengthCalculator};

    #[derive(Debug, PartialEq)]
    enum Op {
        Word(Vec<u8>),
        Add(DocId, u32, u32, Vec<(u32, u32)>), // doc, num_occs, field_length, (elem, pos)
        Remove(DocId),
        Flush,
    }

    #[derive(Default)]
    struct MockInserter {
        ops: Vec<Op>,
    }

    impl OrderedInserter for MockInserter {
        fn set_next_word(&mut self, word: &[u8]) {
            self.ops.push(Op::Word(word.to_vec()));
        }

        fn add(&mut self, doc_id: DocId, features: &DocIdAndFeatures) {
            let positions = features
                .word_positions
                .iter()
                .map(|p| {
                    (
                        features.elements[p.element_index as usize].element_id,
                        p.word_pos,
                    )
                })
                .collect();
            self.ops.push(Op::Add(
                doc_id,
                features.num_occs(),
                features.field_length(),
                positions,
            ));
        }

        fn remove(&mut self, doc_id: DocId) {
            self.ops.push(Op::Remove(doc_id));
        }

        fn flush(&mut self) {
            self.ops.push(Op::Flush);
        }

        fn rewind(&mut self) {}
    }

    fn inverter(collection: CollectionType) -> FieldInverter {
        FieldInverter::new(
            0,
            "f0",
            collection,
            Arc::new(FieldLengthCalculator::new(FieldLengthInfo::default())),
        )
    }

    #[test]
    fn test_single_field_push() {
        let mut inv = inverter(CollectionType::Single);
        inv.invert_field(1, Some(&FieldValue::String(StringValue::tokenized("b a b"))))
            .unwrap();

        let mut mock = MockInserter::default();
        inv.push_documents(&mut mock);
        assert_eq!(
            mock.ops,
            vec![
                Op::Word(b"a".to_vec()),
                Op::Add(1, 1, 3, vec![(0, 1)]),
                Op::Word(b"b".to_vec()),
                Op::Add(1, 2, 3, vec![(0, 0), (0, 2)]),
                Op::Flush,
            ]
        );
    }

    #[test]
    fn test_array_field_elements() {
        let mut inv = inverter(CollectionType::Array);
        inv.invert_field(
            7,
            Some(&FieldValue::Array(vec![
                StringValue::tokenized("foo bar"),
                StringValue::tokenized("foo"),
            ])),
        )
        .unwrap();

        let mut mock = MockInserter::default();
        inv.push_documents(&mut mock);
        assert_eq!(
            mock.ops,
            vec![
                Op::Word(b"bar".to_vec()),
                Op::Add(7, 1, 3, vec![(0, 1)]),
                Op::Word(b"foo".to_vec()),
                Op::Add(7, 2, 3, vec![(0, 0), (1, 0)]),
                Op::Flush,
            ]
        );
    }

    #[test]
    fn test_batch_is_sorted_by_term_then_doc() {
        let mut inv = inverter(CollectionType::Single);
        inv.invert_field(2, Some(&FieldValue::String(StringValue::tokenized("zebra"))))
            .unwrap();
        inv.invert_field(1, Some(&FieldValue::String(StringValue::tokenized("apple zebra"))))
            .unwrap();

        let mut mock = MockInserter::default();
        inv.push_documents(&mut mock);
        assert_eq!(
            mock.ops,
            vec![
                Op::Word(b"apple".to_vec()),
                Op::Add(1, 1, 2, vec![(0, 0)]),
                Op::Word(b"zebra".to_vec()),
                Op::Add(1, 1, 2, vec![(0, 1)]),
                Op::Add(2, 1, 1, vec![(0, 0)]),
                Op::Flush,
            ]
        );
    }

    #[test]
    fn test_reinvert_same_doc_aborts_first_version() {
        let mut inv = inverter(CollectionType::Single);
        inv.invert_field(1, Some(&FieldValue::String(StringValue::tokenized("old"))))
            .unwrap();
        inv.invert_field(1, Some(&FieldValue::String(StringValue::tokenized("new"))))
            .unwrap();

        let mut mock = MockInserter::default();
        inv.push_documents(&mut mock);
        assert_eq!(
            mock.ops,
            vec![
                Op::Word(b"new".to_vec()),
                Op::Add(1, 1, 1, vec![(0, 0)]),
                Op::Flush,
            ]
        );
    }

    #[test]
    fn test_type_mismatch_aborts_document() {
        let mut inv = inverter(CollectionType::Single);
        let err = inv.invert_field(3, Some(&FieldValue::Int(7))).unwrap_err();
        assert!(matches!(err, IndexError::TypeMismatch { .. }));

        // The next document proceeds normally.
        inv.invert_field(4, Some(&FieldValue::String(StringValue::tokenized("ok"))))
            .unwrap();
        let mut mock = MockInserter::default();
        inv.push_documents(&mut mock);
        assert_eq!(
            mock.ops,
            vec![
                Op::Word(b"ok".to_vec()),
                Op::Add(4, 1, 1, vec![(0, 0)]),
                Op::Flush,
            ]
        );
    }

    #[test]
    fn test_plain_text_without_tree_is_one_word() {
        let mut inv = inverter(CollectionType::Single);
        inv.invert_field(1, Some(&FieldValue::String(StringValue::plain("exact match"))))
            .unwrap();
        let mut mock = MockInserter::default();
        inv.push_documents(&mut mock);
        assert_eq!(
            mock.ops,
            vec![
                Op::Word(b"exact match".to_vec()),
                Op::Add(1, 1, 1, vec![(0, 0)]),
                Op::Flush,
            ]
        );
    }

    #[test]
    fn test_annotations_sharing_span_share_position() {
        let mut value = StringValue::plain("cars");
        value.trees.push(crate::document::SpanTree {
            name: LINGUISTICS_TREE.to_string(),
            annotations: vec![
                crate::document::Annotation::term(Span::new(0, 4)),
                crate::document::Annotation::term_with_value(Span::new(0, 4), "car"),
            ],
        });
        let mut inv = inverter(CollectionType::Single);
        inv.invert_field(1, Some(&FieldValue::String(value))).unwrap();

        let mut mock = MockInserter::default();
        inv.push_documents(&mut mock);
        assert_eq!(
            mock.ops,
            vec![
                Op::Word(b"car".to_vec()),
                Op::Add(1, 1, 1, vec![(0, 0)]),
                Op::Word(b"cars".to_vec()),
                Op::Add(1, 1, 1, vec![(0, 0)]),
                Op::Flush,
            ]
        );
    }

    #[test]
    fn test_long_term_is_truncated() {
        let mut inv = inverter(CollectionType::Single);
        let long = "x".repeat(MAX_TERM_LENGTH + 10);
        inv.invert_field(1, Some(&FieldValue::String(StringValue::plain(&long))))
            .unwrap();
        let mut mock = MockInserter::default();
        inv.push_documents(&mut mock);
        match &mock.ops[0] {
            Op::Word(w) => assert_eq!(w.len(), MAX_TERM_LENGTH),
            other => panic!("unexpected op {:?}", other),
        }
    }
}
