//! Shared base types
//!
//! Identifiers, the decoded per-(term, document) feature record exchanged
//! between the inverters, the feature store and the dump sink, and memory
//! accounting.

/// Local document id (32-bit). Doc id 0 is reserved.
pub type DocId = u32;

/// Index field id (position in the schema's field list).
pub type FieldId = u32;

/// Per-element features of one `(term, document)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementFeatures {
    /// Element id within the field value (array index / weighted-set slot).
    pub element_id: u32,
    /// Element weight (1 for single and array collections).
    pub weight: i32,
    /// Number of words in this element.
    pub element_len: u32,
}

/// One word occurrence inside an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WordPosition {
    /// Index into [`DocIdAndFeatures::elements`].
    pub element_index: u32,
    /// Word position within the element.
    pub word_pos: u32,
}

/// Decoded structural record describing where a `(term, document)` pair
/// matched a field. This is what the feature store encodes and decodes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocIdAndFeatures {
    pub doc_id: DocId,
    pub elements: Vec<ElementFeatures>,
    pub word_positions: Vec<WordPosition>,
    /// Total number of words in the field for this document.
    field_length: u32,
    /// Number of occurrences of the term in the field for this document.
    num_occs: u32,
}

impl DocIdAndFeatures {
    /// Reset to an empty record for the given document.
    pub fn clear(&mut self, doc_id: DocId) {
        self.doc_id = doc_id;
        self.elements.clear();
        self.word_positions.clear();
        self.field_length = 0;
        self.num_occs = 0;
    }

    pub fn set_field_length(&mut self, field_length: u32) {
        self.field_length = field_length;
    }

    pub fn field_length(&self) -> u32 {
        self.field_length
    }

    pub fn set_num_occs(&mut self, num_occs: u32) {
        self.num_occs = num_occs;
    }

    pub fn num_occs(&self) -> u32 {
        self.num_occs
    }

    /// Append an occurrence, creating a new element entry when the element
    /// id differs from the last one seen.
    pub fn add_occurrence(&mut self, element_id: u32, word_pos: u32, weight: i32, element_len: u32) {
        let need_new = match self.elements.last() {
            Some(last) => last.element_id != element_id,
            None => true,
        };
        if need_new {
            self.elements.push(ElementFeatures {
                element_id,
                weight,
                element_len,
            });
        }
        self.word_positions.push(WordPosition {
            element_index: (self.elements.len() - 1) as u32,
            word_pos,
        });
    }
}

/// Memory accounting for a store or an index.
///
/// `on_hold` covers bytes retired to a generation hold list but not yet
/// reclaimable; `dead` covers bytes no longer reachable from live
/// references but still inside allocated buffers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryUsage {
    pub allocated: usize,
    pub used: usize,
    pub dead: usize,
    pub on_hold: usize,
}

impl MemoryUsage {
    pub fn new(allocated: usize, used: usize, dead: usize, on_hold: usize) -> Self {
        Self {
            allocated,
            used,
            dead,
            on_hold,
        }
    }

    pub fn merge(&mut self, other: MemoryUsage) {
        self.allocated += other.allocated;
        self.used += other.used;
        self.dead += other.dead;
        self.on_hold += other.on_hold;
    }
}
