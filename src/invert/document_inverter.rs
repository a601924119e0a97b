//! Document inverter
//!
//! Fans a document out to the per-field inverters on the invert executor
//! and, at commit, fans the push stage out to the per-field indexes on
//! the push executor. All tasks for one field id share an executor tag,
//! so effects on a field index follow submission order.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

use tracing::{error, warn};

use super::context::DocumentInverterContext;
use super::field_inverter::FieldInverter;
use super::url_inverter::UrlFieldInverter;
use super::CommitCallback;
use crate::document::{Document, FieldValue, LidVector};
use crate::error::IndexError;
use crate::executor::SequencedTaskExecutorExt;
use crate::types::DocId;

/// Monitored reference count: one increment per task that captured this
/// inverter's state, decremented on task completion.
pub(crate) struct InverterGate {
    count: Mutex<u32>,
    cv: Condvar,
}

impl InverterGate {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            count: Mutex::new(0),
            cv: Condvar::new(),
        })
    }

    fn token(self: &Arc<Self>) -> GateToken {
        *self.count.lock() += 1;
        GateToken {
            gate: Arc::clone(self),
        }
    }

    fn is_idle(&self) -> bool {
        *self.count.lock() == 0
    }

    fn wait_idle(&self) {
        let mut count = self.count.lock();
        while *count != 0 {
            self.cv.wait(&mut count);
        }
    }
}

pub(crate) struct GateToken {
    gate: Arc<InverterGate>,
}

impl Drop for GateToken {
    fn drop(&mut self) {
        let mut count = self.gate.count.lock();
        *count -= 1;
        if *count == 0 {
            self.gate.cv.notify_all();
        }
    }
}

pub struct DocumentInverter {
    context: Arc<DocumentInverterContext>,
    inverters: Vec<Arc<Mutex<FieldInverter>>>,
    url_inverters: Vec<Arc<UrlFieldInverter>>,
    gate: Arc<InverterGate>,
    errors: Arc<Mutex<Vec<IndexError>>>,
}

impl DocumentInverter {
    pub fn new(context: Arc<DocumentInverterContext>) -> Self {
        let schema = context.schema();
        let field_indexes = context.field_indexes();
        let mut inverters = Vec::with_capacity(schema.num_fields());
        for (field_id, field) in schema.fields().iter().enumerate() {
            let calculator = field_indexes.get(field_id as u32).calculator();
            inverters.push(Arc::new(Mutex::new(FieldInverter::new(
                field_id as u32,
                &field.name,
                field.collection,
                calculator,
            ))));
        }
        let url_inverters = schema
            .uri_groups()
            .iter()
            .map(|group| {
                let collection = schema.field(group.all).collection;
                Arc::new(UrlFieldInverter::new(
                    collection,
                    Arc::clone(&inverters[group.all as usize]),
                    Arc::clone(&inverters[group.scheme as usize]),
                    Arc::clone(&inverters[group.host as usize]),
                    Arc::clone(&inverters[group.port as usize]),
                    Arc::clone(&inverters[group.path as usize]),
                    Arc::clone(&inverters[group.query as usize]),
                    Arc::clone(&inverters[group.fragment as usize]),
                    Arc::clone(&inverters[group.hostname as usize]),
                ))
            })
            .collect();
        Self {
            context,
            inverters,
            url_inverters,
            gate: InverterGate::new(),
            errors: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn field_value(&self, doc: &Document, field_name: &str) -> Option<FieldValue> {
        match doc.get(field_name) {
            Some(value) => Some(value.clone()),
            None => {
                let err = IndexError::SchemaMismatch(field_name.to_string());
                error!("{}", err);
                self.errors.lock().push(err);
                None
            }
        }
    }

    /// Enqueue the invert stage for one document: one task per field on
    /// the invert executor.
    pub fn invert_document(&self, doc_id: DocId, doc: &Document) {
        let schema = Arc::clone(self.context.schema());
        let invert_executor = self.context.invert_executor();
        for &field_id in self.context.text_fields() {
            let value = self.field_value(doc, &schema.field(field_id).name);
            let inverter = Arc::clone(&self.inverters[field_id as usize]);
            let errors = Arc::clone(&self.errors);
            let token = self.gate.token();
            invert_executor.execute_fn(field_id, move || {
                if let Err(e) = inverter.lock().invert_field(doc_id, value.as_ref()) {
                    warn!("invert failed for doc {}: {}", doc_id, e);
                    errors.lock().push(e);
                }
                drop(token);
            });
        }
        for (group, url_inverter) in self.context.uri_groups().iter().zip(&self.url_inverters) {
            let value = self.field_value(doc, &group.source);
            let url_inverter = Arc::clone(url_inverter);
            let errors = Arc::clone(&self.errors);
            let token = self.gate.token();
            invert_executor.execute_fn(group.all, move || {
                if let Err(e) = url_inverter.invert_field(doc_id, value.as_ref()) {
                    warn!("invert failed for doc {}: {}", doc_id, e);
                    errors.lock().push(e);
                }
                drop(token);
            });
        }
    }

    /// Enqueue removal of a batch of documents on the invert executor.
    pub fn remove_documents(&self, lids: LidVector) {
        let invert_executor = self.context.invert_executor();
        for &field_id in self.context.text_fields() {
            let inverter = Arc::clone(&self.inverters[field_id as usize]);
            let lids = lids.clone();
            let token = self.gate.token();
            invert_executor.execute_fn(field_id, move || {
                let mut inverter = inverter.lock();
                for lid in lids {
                    inverter.remove_document(lid);
                }
                drop(token);
            });
        }
        for (group, url_inverter) in self.context.uri_groups().iter().zip(&self.url_inverters) {
            let url_inverter = Arc::clone(url_inverter);
            let lids = lids.clone();
            let token = self.gate.token();
            invert_executor.execute_fn(group.all, move || {
                for lid in &lids {
                    url_inverter.remove_document(*lid);
                }
                drop(token);
            });
        }
    }

    /// Enqueue the push stage: one task per field on the push executor.
    /// Must be called only after the invert executor has drained every
    /// task previously enqueued for these inverters.
    pub fn push_documents(&self, on_done: Arc<CommitCallback>) {
        on_done.add_errors(self.errors.lock().drain(..));
        let push_executor = self.context.push_executor();
        for (field_id, inverter) in self.inverters.iter().enumerate() {
            let field_id = field_id as u32;
            let index = Arc::clone(self.context.field_indexes().get(field_id));
            let inverter = Arc::clone(inverter);
            let token = self.gate.token();
            let on_done = Arc::clone(&on_done);
            push_executor.execute_fn(self.context.push_tag(field_id), move || {
                let mut inverter = inverter.lock();
                index.apply_removes(&mut inverter);
                index.push_documents(&mut inverter);
                index.commit();
                drop(inverter);
                drop(token);
                drop(on_done);
            });
        }
    }

    pub fn has_zero_ref_count(&self) -> bool {
        self.gate.is_idle()
    }

    pub fn wait_for_zero_ref_count(&self) {
        self.gate.wait_idle();
    }
}
