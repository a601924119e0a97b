//! Error types for the memory index engine

use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    /// Mutation attempted after `freeze()`. Logged and dropped by the facade.
    #[error("memory index is frozen: {0}")]
    Frozen(String),

    /// A document lacks a field named in the schema. The field is treated
    /// as empty for that document.
    #[error("schema mismatch: document has no field named '{0}'")]
    SchemaMismatch(String),

    /// A field value is not of the collection/primitive variant the schema
    /// declares. Fatal for that document's field; other fields proceed.
    #[error("type mismatch for field '{field}': expected {expected}, got {actual}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// A per-document words record already exists for this doc id.
    /// Indicates a programming error upstream.
    #[error("duplicate remove info for doc {0}")]
    DuplicateRemoveInfo(u32),
}
