//! memindex — in-memory inverted index engine
//!
//! Memory index core for near-real-time indexing: documents become
//! searchable within milliseconds of ingest while queries keep running
//! against the same data without blocking writers.
//!
//! ## Architecture
//! - Store layer: interned term bytes + bit-packed feature blobs,
//!   addressed by 32-bit references into chunked arenas
//! - Index layer: per-field dictionary over posting lists (inline
//!   arrays promoted to ordered trees), ordered batch inserter,
//!   document remover
//! - Invert layer: per-field staging buffers fed by the document
//!   inverter over two sequenced executors (invert stage, push stage)
//! - Reclamation: per-field generation handler; readers pin a
//!   generation with a guard, retired memory is released once the
//!   oldest guard has passed
//!
//! ## Example
//! ```
//! use std::sync::Arc;
//! use memindex::{
//!     CollectionType, Document, EmptyFieldLengthInspector, FieldValue, MemoryIndex, Schema,
//!     StringValue, ThreadedSequencedExecutor,
//! };
//!
//! let mut schema = Schema::new();
//! schema.add_text_field("body", CollectionType::Single, false);
//!
//! let index = MemoryIndex::new(
//!     Arc::new(schema),
//!     &EmptyFieldLengthInspector,
//!     Arc::new(ThreadedSequencedExecutor::new(2, "invert")),
//!     Arc::new(ThreadedSequencedExecutor::new(2, "push")),
//! );
//!
//! let mut doc = Document::new();
//! doc.set("body", FieldValue::String(StringValue::tokenized("hello world")));
//! index.insert_document(1, &doc);
//! index.commit();
//!
//! let blueprint = index.create_blueprint("body", "hello");
//! let mut search = blueprint.search().unwrap();
//! assert_eq!(search.doc_id(), Some(1));
//! ```

pub mod document;
pub mod executor;
pub mod generation;
pub mod index;
pub mod invert;
pub mod memory_index;
pub mod schema;
pub mod store;
pub mod types;

mod error;

pub use document::{
    Annotation, AnnotationKind, Document, FieldValue, Span, SpanNode, SpanTree, StringValue,
    LINGUISTICS_TREE,
};
pub use error::{IndexError, Result};
pub use executor::{SequencedTaskExecutor, SequencedTaskExecutorExt, ThreadedSequencedExecutor};
pub use generation::{Generation, GenerationGuard, GenerationHandler};
pub use index::iterator::{MatchPosition, PostingSearch, TermBlueprint, TermFieldMatchData};
pub use index::{
    EmptyFieldLengthInspector, FieldIndexCollection, FieldLengthInfo, FieldLengthInspector,
    IFieldIndex, IndexBuilder,
};
pub use invert::{CommitCallback, CommitStatus};
pub use memory_index::MemoryIndex;
pub use schema::{CollectionType, FieldDescriptor, Schema, UriFieldGroup};
pub use types::{DocId, DocIdAndFeatures, ElementFeatures, FieldId, MemoryUsage, WordPosition};
