//! URL field inverter
//!
//! Fans one URI value out to the eight sub-field inverters: per-component
//! streams, the `all` stream with every indexed token, and the hostname
//! stream sandwiched between sentinel markers. Collection semantics
//! mirror the text case.

use parking_lot::Mutex;
use std::sync::Arc;

use super::field_inverter::FieldInverter;
use super::url::{is_default_port, tokenize_url, UrlToken, UrlTokenKind};
use crate::document::{FieldValue, StringValue};
use crate::error::{IndexError, Result};
use crate::schema::CollectionType;
use crate::types::DocId;

/// Sentinel hostname tokens. Mixed case cannot collide with real tokens,
/// which are lowercased before insertion.
pub const HOSTNAME_BEGIN: &str = "HoStStArT";
pub const HOSTNAME_END: &str = "HoStEnD";

pub struct UrlFieldInverter {
    collection: CollectionType,
    all: Arc<Mutex<FieldInverter>>,
    scheme: Arc<Mutex<FieldInverter>>,
    host: Arc<Mutex<FieldInverter>>,
    port: Arc<Mutex<FieldInverter>>,
    path: Arc<Mutex<FieldInverter>>,
    query: Arc<Mutex<FieldInverter>>,
    fragment: Arc<Mutex<FieldInverter>>,
    hostname: Arc<Mutex<FieldInverter>>,
}

impl UrlFieldInverter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        collection: CollectionType,
        all: Arc<Mutex<FieldInverter>>,
        scheme: Arc<Mutex<FieldInverter>>,
        host: Arc<Mutex<FieldInverter>>,
        port: Arc<Mutex<FieldInverter>>,
        path: Arc<Mutex<FieldInverter>>,
        query: Arc<Mutex<FieldInverter>>,
        fragment: Arc<Mutex<FieldInverter>>,
        hostname: Arc<Mutex<FieldInverter>>,
    ) -> Self {
        Self {
            collection,
            all,
            scheme,
            host,
            port,
            path,
            query,
            fragment,
            hostname,
        }
    }

    fn for_each(&self, mut f: impl FnMut(&mut FieldInverter)) {
        for inverter in [
            &self.all,
            &self.scheme,
            &self.host,
            &self.port,
            &self.path,
            &self.query,
            &self.fragment,
            &self.hostname,
        ] {
            f(&mut inverter.lock());
        }
    }

    fn start_doc(&self, doc_id: DocId) {
        self.for_each(|inv| inv.start_doc(doc_id));
    }

    fn end_doc(&self) {
        self.for_each(|inv| inv.end_doc());
    }

    fn start_element(&self, weight: i32) {
        self.for_each(|inv| inv.start_element(weight));
    }

    fn end_element(&self) {
        self.for_each(|inv| inv.end_element());
    }

    fn add_token(&self, token: &UrlToken) {
        let word = token.text.as_bytes();
        match token.kind {
            UrlTokenKind::Scheme => {
                self.scheme.lock().add_word(word);
                self.all.lock().add_word(word);
            }
            UrlTokenKind::Host => {
                self.host.lock().add_word(word);
                self.hostname.lock().add_word(word);
                self.all.lock().add_word(word);
            }
            UrlTokenKind::Port => {
                if !is_default_port(&token.text) {
                    self.port.lock().add_word(word);
                    self.all.lock().add_word(word);
                }
            }
            UrlTokenKind::Path => {
                self.path.lock().add_word(word);
                self.all.lock().add_word(word);
            }
            UrlTokenKind::Query => {
                self.query.lock().add_word(word);
                self.all.lock().add_word(word);
            }
            UrlTokenKind::Fragment => {
                self.fragment.lock().add_word(word);
                self.all.lock().add_word(word);
            }
        }
    }

    fn process_url(&self, value: &StringValue) {
        self.hostname.lock().add_word(HOSTNAME_BEGIN.as_bytes());
        for token in tokenize_url(&value.text) {
            self.add_token(&token);
        }
        self.hostname.lock().add_word(HOSTNAME_END.as_bytes());
    }

    fn invert_url_value(&self, value: &FieldValue) -> Result<()> {
        match (self.collection, value) {
            (CollectionType::Single, FieldValue::String(s)) => {
                self.start_element(1);
                self.process_url(s);
                self.end_element();
                Ok(())
            }
            (CollectionType::Array, FieldValue::Array(items)) => {
                for item in items {
                    self.start_element(1);
                    self.process_url(item);
                    self.end_element();
                }
                Ok(())
            }
            (CollectionType::WeightedSet, FieldValue::WeightedSet(items)) => {
                for (item, weight) in items {
                    self.start_element(*weight);
                    self.process_url(item);
                    self.end_element();
                }
                Ok(())
            }
            _ => Err(IndexError::TypeMismatch {
                field: "uri".to_string(),
                expected: match self.collection {
                    CollectionType::Single => "string",
                    CollectionType::Array => "array",
                    CollectionType::WeightedSet => "weighted_set",
                },
                actual: value.kind(),
            }),
        }
    }

    /// Invert one document's URI value across all sub-streams. An absent
    /// value schedules removal of any previous version.
    pub fn invert_field(&self, doc_id: DocId, value: Option<&FieldValue>) -> Result<()> {
        match value {
            Some(value) => {
                self.start_doc(doc_id);
                let result = self.invert_url_value(value);
                match result {
                    Ok(()) => {
                        self.end_doc();
                        Ok(())
                    }
                    Err(e) => {
                        self.for_each(|inv| inv.abort_current_doc());
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

    pub fn remove_document(&self, doc_id: DocId) {
        self.for_each(|inv| inv.remove_document(doc_id));
    }
}
