//! Document inverter context
//!
//! Schema-derived wiring shared by all document inverters: the two
//! executors, the field index collection, and the field-to-push-tag
//! mapping. Invert tasks are tagged by field id; the seven URI
//! sub-fields are bundled onto their group's `all` tag for the push
//! stage so one push thread owns the related arenas.

use std::sync::Arc;

use crate::executor::SequencedTaskExecutor;
use crate::index::FieldIndexCollection;
use crate::schema::{Schema, UriFieldGroup};
use crate::types::FieldId;

pub struct DocumentInverterContext {
    schema: Arc<Schema>,
    invert_executor: Arc<dyn SequencedTaskExecutor>,
    push_executor: Arc<dyn SequencedTaskExecutor>,
    field_indexes: Arc<FieldIndexCollection>,
    text_fields: Vec<FieldId>,
    push_tags: Vec<u32>,
}

impl DocumentInverterContext {
    pub fn new(
        schema: Arc<Schema>,
        invert_executor: Arc<dyn SequencedTaskExecutor>,
        push_executor: Arc<dyn SequencedTaskExecutor>,
        field_indexes: Arc<FieldIndexCollection>,
    ) -> Self {
        let text_fields = schema.text_field_ids();
        let mut push_tags: Vec<u32> = (0..schema.num_fields() as u32).collect();
        for group in schema.uri_groups() {
            for field_id in group.sub_field_ids() {
                push_tags[field_id as usize] = group.all;
            }
        }
        Self {
            schema,
            invert_executor,
            push_executor,
            field_indexes,
            text_fields,
            push_tags,
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn invert_executor(&self) -> &Arc<dyn SequencedTaskExecutor> {
        &self.invert_executor
    }

    pub fn push_executor(&self) -> &Arc<dyn SequencedTaskExecutor> {
        &self.push_executor
    }

    pub fn field_indexes(&self) -> &Arc<FieldIndexCollection> {
        &self.field_indexes
    }

    /// Field ids inverted as plain text (not members of a URI group).
    pub fn text_fields(&self) -> &[FieldId] {
        &self.text_fields
    }

    pub fn uri_groups(&self) -> &[UriFieldGroup] {
        self.schema.uri_groups()
    }

    pub fn push_tag(&self, field_id: FieldId) -> u32 {
        self.push_tags[field_id as usize]
    }
}
