//! Field index collection
//!
//! One per-field index per schema field, with the posting-entry shape
//! chosen from the field's `interleaved_features` flag.

use std::sync::Arc;

use super::field_index::{FieldIndex, IFieldIndex};
use super::posting::{InterleavedPosting, PlainPosting};
use super::{FieldLengthInspector, IndexBuilder};
use crate::schema::Schema;
use crate::types::{FieldId, MemoryUsage};

pub struct FieldIndexCollection {
    indexes: Vec<Arc<dyn IFieldIndex>>,
}

impl FieldIndexCollection {
    pub fn new(schema: &Schema, inspector: &dyn FieldLengthInspector) -> Self {
        let mut indexes: Vec<Arc<dyn IFieldIndex>> = Vec::with_capacity(schema.num_fields());
        for (field_id, field) in schema.fields().iter().enumerate() {
            let info = inspector.get_field_length_info(&field.name);
            if field.interleaved_features {
                indexes.push(Arc::new(FieldIndex::<InterleavedPosting>::new(
                    schema,
                    field_id as FieldId,
                    info,
                )));
            } else {
                indexes.push(Arc::new(FieldIndex::<PlainPosting>::new(
                    schema,
                    field_id as FieldId,
                    info,
                )));
            }
        }
        Self { indexes }
    }

    pub fn get(&self, field_id: FieldId) -> &Arc<dyn IFieldIndex> {
        &self.indexes[field_id as usize]
    }

    pub fn num_fields(&self) -> usize {
        self.indexes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn IFieldIndex>> {
        self.indexes.iter()
    }

    /// Emit every field in schema order to the sink.
    pub fn dump(&self, builder: &mut dyn IndexBuilder) {
        for index in &self.indexes {
            builder.start_field(index.field_id());
            index.dump(builder);
            builder.end_field();
        }
    }

    pub fn num_unique_words(&self) -> u64 {
        self.indexes.iter().map(|i| i.num_unique_words()).sum()
    }

    pub fn memory_usage(&self) -> MemoryUsage {
        let mut usage = MemoryUsage::default();
        for index in &self.indexes {
            usage.merge(index.memory_usage());
        }
        usage
    }
}
