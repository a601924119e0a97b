//! Document inversion pipeline
//!
//! The invert stage turns documents into per-field staging buffers; the
//! push stage merges those buffers into the per-field indexes. Work is
//! spread across the two sequenced executors while per-field serial
//! order is preserved.

pub mod collection;
pub mod context;
pub mod document_inverter;
pub mod field_inverter;
pub mod url;
pub mod url_inverter;

pub use collection::DocumentInverterCollection;
pub use context::DocumentInverterContext;
pub use document_inverter::DocumentInverter;
pub use field_inverter::{FieldInverter, MAX_TERM_LENGTH};
pub use url_inverter::{UrlFieldInverter, HOSTNAME_BEGIN, HOSTNAME_END};

use parking_lot::Mutex;
use std::sync::Arc;

use crate::error::IndexError;

/// Outcome of one commit: the per-document errors collected since the
/// previous commit.
#[derive(Debug, Default, Clone)]
pub struct CommitStatus {
    pub errors: Vec<IndexError>,
}

impl CommitStatus {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Callback object kept alive by every task of one commit. The wrapped
/// closure runs when the last task drops its reference, signalling
/// end-of-commit to the caller.
pub struct CommitCallback {
    status: Mutex<CommitStatus>,
    on_done: Mutex<Option<Box<dyn FnOnce(CommitStatus) + Send>>>,
}

impl CommitCallback {
    pub fn new(on_done: impl FnOnce(CommitStatus) + Send + 'static) -> Arc<Self> {
        Arc::new(Self {
            status: Mutex::new(CommitStatus::default()),
            on_done: Mutex::new(Some(Box::new(on_done))),
        })
    }

    /// A callback that discards the status.
    pub fn noop() -> Arc<Self> {
        Self::new(|_| {})
    }

    /// Callback plus a receiver resolving when the commit completes.
    pub fn channel() -> (Arc<Self>, crossbeam::channel::Receiver<CommitStatus>) {
        let (tx, rx) = crossbeam::channel::bounded(1);
        let callback = Self::new(move |status| {
            let _ = tx.send(status);
        });
        (callback, rx)
    }

    pub fn add_error(&self, error: IndexError) {
        self.status.lock().errors.push(error);
    }

    pub(crate) fn add_errors(&self, errors: impl IntoIterator<Item = IndexError>) {
        self.status.lock().errors.extend(errors);
    }
}

impl Drop for CommitCallback {
    fn drop(&mut self) {
        if let Some(on_done) = self.on_done.lock().take() {
            let status = std::mem::take(&mut *self.status.lock());
            on_done(status);
        }
    }
}
