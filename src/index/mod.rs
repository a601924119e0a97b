//! Per-field index layer
//!
//! The dictionary, posting-list store, ordered inserter, document remover
//! and the read-side iterators for one field, plus the collection that
//! owns one field index per schema field.

pub mod collection;
pub mod dictionary;
pub mod field_index;
pub mod inserter;
pub mod iterator;
pub mod posting;
pub mod remover;

pub use collection::FieldIndexCollection;
pub use field_index::{FieldIndex, IFieldIndex};
pub use inserter::OrderedInserter;
pub use iterator::{MatchPosition, PostingSearch, TermFieldMatchData};
pub use posting::{InterleavedPosting, PlainPosting, PostingVariant, INLINE_MAX};
pub use remover::{FieldIndexRemover, RemoveListener};

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::types::{DocIdAndFeatures, FieldId};

/// Seed statistics for a field's running average length.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FieldLengthInfo {
    pub average_field_length: f64,
    pub num_samples: u32,
}

/// Collaborator seeding per-field length statistics, e.g. from an index
/// already on disk.
pub trait FieldLengthInspector {
    fn get_field_length_info(&self, field_name: &str) -> FieldLengthInfo;
}

/// Inspector with no history; every field starts from zero samples.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyFieldLengthInspector;

impl FieldLengthInspector for EmptyFieldLengthInspector {
    fn get_field_length_info(&self, _field_name: &str) -> FieldLengthInfo {
        FieldLengthInfo::default()
    }
}

/// Running average field length. Single writer (the field's invert
/// thread); readers see a consistent snapshot through the atomics.
pub struct FieldLengthCalculator {
    average: AtomicU64,
    num_samples: AtomicU32,
    max_num_samples: u32,
}

const MAX_NUM_SAMPLES: u32 = 100_000;

impl FieldLengthCalculator {
    pub fn new(info: FieldLengthInfo) -> Self {
        Self {
            average: AtomicU64::new(info.average_field_length.to_bits()),
            num_samples: AtomicU32::new(info.num_samples.min(MAX_NUM_SAMPLES)),
            max_num_samples: MAX_NUM_SAMPLES,
        }
    }

    pub fn add_field_length(&self, field_length: u32) {
        let samples = self
            .num_samples
            .load(Ordering::Relaxed)
            .saturating_add(1)
            .min(self.max_num_samples);
        self.num_samples.store(samples, Ordering::Relaxed);
        let average = f64::from_bits(self.average.load(Ordering::Relaxed));
        let updated = average + (field_length as f64 - average) / samples as f64;
        self.average.store(updated.to_bits(), Ordering::Relaxed);
    }

    pub fn info(&self) -> FieldLengthInfo {
        FieldLengthInfo {
            average_field_length: f64::from_bits(self.average.load(Ordering::Relaxed)),
            num_samples: self.num_samples.load(Ordering::Relaxed),
        }
    }
}

/// Sink consumed by `dump`: an on-disk index builder or any other
/// consumer of the full index contents in term order.
pub trait IndexBuilder {
    fn start_field(&mut self, field_id: FieldId);
    fn start_word(&mut self, word: &[u8]);
    fn add_document(&mut self, features: &DocIdAndFeatures);
    fn end_word(&mut self);
    fn end_field(&mut self);
}
