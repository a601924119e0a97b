//! Document inverter pool
//!
//! Rotates document inverters between active, inflight and free states
//! so a new batch can start inverting while the previous batch's push
//! tasks are still draining. The pool grows up to a ceiling; past it,
//! switching waits for the oldest inflight inverter to go idle.

use std::collections::VecDeque;
use std::sync::Arc;

use super::context::DocumentInverterContext;
use super::document_inverter::DocumentInverter;

pub struct DocumentInverterCollection {
    context: Arc<DocumentInverterContext>,
    free_inverters: Vec<Arc<DocumentInverter>>,
    inflight_inverters: VecDeque<Arc<DocumentInverter>>,
    active_inverter: Arc<DocumentInverter>,
    num_inverters: u32,
    max_inverters: u32,
}

impl DocumentInverterCollection {
    pub fn new(context: Arc<DocumentInverterContext>, max_inverters: u32) -> Self {
        assert!(max_inverters > 0);
        let active_inverter = Arc::new(DocumentInverter::new(Arc::clone(&context)));
        Self {
            context,
            free_inverters: Vec::new(),
            inflight_inverters: VecDeque::new(),
            active_inverter,
            num_inverters: 1,
            max_inverters,
        }
    }

    pub fn active_inverter(&self) -> &Arc<DocumentInverter> {
        &self.active_inverter
    }

    /// Retire the active inverter to the inflight queue and promote a
    /// free one, constructing a new inverter while below the ceiling.
    pub fn switch_active_inverter(&mut self) {
        self.inflight_inverters
            .push_back(Arc::clone(&self.active_inverter));
        while self
            .inflight_inverters
            .front()
            .map(|inv| inv.has_zero_ref_count())
            .unwrap_or(false)
        {
            self.free_inverters
                .push(self.inflight_inverters.pop_front().unwrap());
        }
        if let Some(free) = self.free_inverters.pop() {
            self.active_inverter = free;
            return;
        }
        if self.num_inverters >= self.max_inverters {
            let oldest = self
                .inflight_inverters
                .pop_front()
                .expect("inflight queue cannot be empty at the ceiling");
            oldest.wait_for_zero_ref_count();
            self.active_inverter = oldest;
            return;
        }
        self.active_inverter = Arc::new(DocumentInverter::new(Arc::clone(&self.context)));
        self.num_inverters += 1;
    }

    pub fn num_inverters(&self) -> u32 {
        self.num_inverters
    }

    pub fn max_inverters(&self) -> u32 {
        self.max_inverters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ThreadedSequencedExecutor;
    use crate::index::{EmptyFieldLengthInspector, FieldIndexCollection};
    use crate::schema::{CollectionType, Schema};

    fn context() -> Arc<DocumentInverterContext> {
        let mut schema = Schema::new();
        schema.add_text_field("f0", CollectionType::Single, false);
        let schema = Arc::new(schema);
        let invert = Arc::new(ThreadedSequencedExecutor::new(1, "invert"));
        let push = Arc::new(ThreadedSequencedExecutor::new(1, "push"));
        let indexes = Arc::new(FieldIndexCollection::new(
            &schema,
            &EmptyFieldLengthInspector,
        ));
        Arc::new(DocumentInverterContext::new(schema, invert, push, indexes))
    }

    #[test]
    fn test_switch_reuses_idle_inverters() {
        let mut pool = DocumentInverterCollection::new(context(), 4);
        assert_eq!(pool.num_inverters(), 1);

        // The retired inverter is idle, so the pool recycles it instead
        // of growing.
        let first = Arc::as_ptr(pool.active_inverter());
        pool.switch_active_inverter();
        assert_eq!(pool.num_inverters(), 1);
        assert_eq!(Arc::as_ptr(pool.active_inverter()), first);
    }
}
