//! Posting iterator and term blueprint
//!
//! The read path: a blueprint resolves a `(field, term)` pair into a
//! strict search iterator over the term's posting list. The iterator
//! holds a generation guard for its whole lifetime, so everything it
//! borrows stays resolvable while it runs.

use std::sync::Arc;

use super::field_index::{FieldIndex, IFieldIndex};
use super::posting::{PostingList, PostingVariant};
use crate::generation::GenerationGuard;
use crate::store::{ChunkView, FeatureRef};
use crate::types::{DocId, DocIdAndFeatures};

/// Match data filled by `unpack`: the decoded occurrence positions plus
/// the two interleaved counters when the field carries them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TermFieldMatchData {
    pub doc_id: DocId,
    pub num_occs: u16,
    pub field_length: u16,
    pub positions: Vec<MatchPosition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchPosition {
    pub element_id: u32,
    pub position: u32,
    pub element_weight: i32,
    pub element_length: u32,
}

impl TermFieldMatchData {
    pub fn reset(&mut self, doc_id: DocId) {
        self.doc_id = doc_id;
        self.num_occs = 0;
        self.field_length = 1;
        self.positions.clear();
    }
}

/// Strict search iterator over one posting list.
pub trait PostingSearch: Send {
    /// Restrict the iterator to `[begin_doc, end_doc)` and position it at
    /// the first hit.
    fn init_range(&mut self, begin_doc: DocId, end_doc: DocId);

    /// Advance to the first document >= `doc_id` inside the range.
    fn seek(&mut self, doc_id: DocId) -> Option<DocId>;

    /// Current document, `None` at end.
    fn doc_id(&self) -> Option<DocId>;

    /// Decode the current document's features into `match_data`.
    fn unpack(&mut self, doc_id: DocId, match_data: &mut TermFieldMatchData);

    fn is_strict(&self) -> bool {
        true
    }
}

struct CurrentPosting {
    doc_id: DocId,
    features: FeatureRef,
    num_occs: u16,
    field_length: u16,
}

pub(crate) struct PostingIterator<P: PostingVariant> {
    index: Arc<FieldIndex<P>>,
    _guard: GenerationGuard,
    list: Arc<PostingList<P>>,
    features_view: ChunkView,
    begin: DocId,
    end: DocId,
    current: Option<CurrentPosting>,
    scratch: DocIdAndFeatures,
}

impl<P: PostingVariant> PostingIterator<P> {
    pub(crate) fn new(
        index: Arc<FieldIndex<P>>,
        guard: GenerationGuard,
        list: Arc<PostingList<P>>,
    ) -> Self {
        let features_view = index.feature_store().view();
        Self {
            index,
            _guard: guard,
            list,
            features_view,
            begin: 0,
            end: DocId::MAX,
            current: None,
            scratch: DocIdAndFeatures::default(),
        }
    }

    fn position_at(&mut self, doc_id: DocId) -> Option<DocId> {
        let target = doc_id.max(self.begin);
        self.current = self.list.lower_bound(target).and_then(|(doc, entry)| {
            if doc >= self.end {
                return None;
            }
            Some(CurrentPosting {
                doc_id: doc,
                features: entry.features(),
                num_occs: entry.num_occs(),
                field_length: entry.field_length(),
            })
        });
        self.current.as_ref().map(|c| c.doc_id)
    }
}

impl<P: PostingVariant> PostingSearch for PostingIterator<P> {
    fn init_range(&mut self, begin_doc: DocId, end_doc: DocId) {
        self.begin = begin_doc;
        self.end = end_doc;
        self.position_at(begin_doc);
    }

    fn seek(&mut self, doc_id: DocId) -> Option<DocId> {
        self.position_at(doc_id)
    }

    fn doc_id(&self) -> Option<DocId> {
        self.current.as_ref().map(|c| c.doc_id)
    }

    fn unpack(&mut self, doc_id: DocId, match_data: &mut TermFieldMatchData) {
        let current = self
            .current
            .as_ref()
            .expect("unpack called with no current document");
        debug_assert_eq!(current.doc_id, doc_id);

        match_data.reset(doc_id);
        self.scratch.clear(doc_id);
        self.index.feature_store().decode_with_view(
            &self.features_view,
            self.index.field_id(),
            current.features,
            &mut self.scratch,
        );
        for position in &self.scratch.word_positions {
            let element = &self.scratch.elements[position.element_index as usize];
            match_data.positions.push(MatchPosition {
                element_id: element.element_id,
                position: position.word_pos,
                element_weight: element.weight,
                element_length: element.element_len,
            });
        }
        if P::INTERLEAVED {
            match_data.num_occs = current.num_occs;
            match_data.field_length = current.field_length;
        }
    }
}

/// Query-layer entry point for one `(field, term)` pair. A blueprint on
/// an unknown or hidden field produces no iterator.
pub struct TermBlueprint {
    index: Option<Arc<dyn IFieldIndex>>,
    term: Vec<u8>,
}

impl TermBlueprint {
    pub(crate) fn new(index: Option<Arc<dyn IFieldIndex>>, term: &[u8]) -> Self {
        Self {
            index,
            term: term.to_vec(),
        }
    }

    pub fn empty() -> Self {
        Self {
            index: None,
            term: Vec::new(),
        }
    }

    /// Produce the search iterator, positioned over the full doc range.
    /// `None` when the field is hidden/unknown or the term has no
    /// postings.
    pub fn search(&self) -> Option<Box<dyn PostingSearch>> {
        let index = self.index.as_ref()?;
        let mut iterator = Arc::clone(index).make_search(&self.term)?;
        iterator.init_range(1, DocId::MAX);
        Some(iterator)
    }
}
