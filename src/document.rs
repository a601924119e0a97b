//! Document field values
//!
//! Typed field values fed to the inverters. A string value carries zero or
//! more named annotation span trees; only the tree named
//! [`LINGUISTICS_TREE`] is consulted when inverting.

use ahash::AHashMap;

use crate::types::DocId;

/// Name of the annotation tree produced by the linguistics pipeline.
pub const LINGUISTICS_TREE: &str = "linguistics";

/// A byte span within the text of a string value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Span {
    pub from: u32,
    pub len: u32,
}

impl Span {
    pub fn new(from: u32, len: u32) -> Self {
        Self { from, len }
    }
}

/// Span shape of an annotation. Term annotations over composite spans are
/// skipped by the inverter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpanNode {
    Simple(Span),
    Composite(Vec<Span>),
}

/// Kind of an annotation node. Only `Term` nodes contribute words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationKind {
    Term,
    Other,
}

/// One annotation in a span tree. `value` holds the override term (the
/// stemmed/normalised form); when absent the raw text slice is used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    pub kind: AnnotationKind,
    pub span: SpanNode,
    pub value: Option<String>,
}

impl Annotation {
    pub fn term(span: Span) -> Self {
        Self {
            kind: AnnotationKind::Term,
            span: SpanNode::Simple(span),
            value: None,
        }
    }

    pub fn term_with_value(span: Span, value: &str) -> Self {
        Self {
            kind: AnnotationKind::Term,
            span: SpanNode::Simple(span),
            value: Some(value.to_string()),
        }
    }
}

/// A named annotation tree attached to a string value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanTree {
    pub name: String,
    pub annotations: Vec<Annotation>,
}

/// A string field value with optional annotation trees.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StringValue {
    pub text: String,
    pub trees: Vec<SpanTree>,
}

impl StringValue {
    /// A raw string with no annotation tree. The inverter treats the whole
    /// text as a single word.
    pub fn plain(text: &str) -> Self {
        Self {
            text: text.to_string(),
            trees: Vec::new(),
        }
    }

    /// A string with a `linguistics` tree built from lowercased
    /// alphanumeric runs. For callers without an external linguistics
    /// pipeline.
    pub fn tokenized(text: &str) -> Self {
        let mut annotations = Vec::new();
        let bytes = text.as_bytes();
        let mut start = None;
        for (i, b) in bytes.iter().enumerate() {
            let word_byte = b.is_ascii_alphanumeric() || *b == b'_' || *b >= 0x80;
            match (word_byte, start) {
                (true, None) => start = Some(i),
                (false, Some(s)) => {
                    annotations.push(Self::token_annotation(text, s, i));
                    start = None;
                }
                _ => {}
            }
        }
        if let Some(s) = start {
            annotations.push(Self::token_annotation(text, s, bytes.len()));
        }
        Self {
            text: text.to_string(),
            trees: vec![SpanTree {
                name: LINGUISTICS_TREE.to_string(),
                annotations,
            }],
        }
    }

    fn token_annotation(text: &str, start: usize, end: usize) -> Annotation {
        let span = Span::new(start as u32, (end - start) as u32);
        let slice = &text[start..end];
        if slice.chars().any(|c| c.is_uppercase()) {
            Annotation::term_with_value(span, &slice.to_lowercase())
        } else {
            Annotation::term(span)
        }
    }

    /// The annotation tree with the given name, if attached.
    pub fn tree(&self, name: &str) -> Option<&SpanTree> {
        self.trees.iter().find(|t| t.name == name)
    }
}

/// Variant over the concrete field value kinds the engine accepts. The
/// numeric kinds exist so the inverter can reject them with a typed error.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    String(StringValue),
    Array(Vec<StringValue>),
    WeightedSet(Vec<(StringValue, i32)>),
    Int(i64),
    Float(f64),
}

impl FieldValue {
    pub fn kind(&self) -> &'static str {
        match self {
            FieldValue::String(_) => "string",
            FieldValue::Array(_) => "array",
            FieldValue::WeightedSet(_) => "weighted_set",
            FieldValue::Int(_) => "int",
            FieldValue::Float(_) => "float",
        }
    }
}

/// A typed document: a set of named field values.
#[derive(Debug, Clone, Default)]
pub struct Document {
    fields: AHashMap<String, FieldValue>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, field: &str, value: FieldValue) -> &mut Self {
        self.fields.insert(field.to_string(), value);
        self
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }
}

/// Identifier for a document remove batch.
pub type LidVector = Vec<DocId>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenized_builds_linguistics_tree() {
        let v = StringValue::tokenized("a a b");
        let tree = v.tree(LINGUISTICS_TREE).unwrap();
        assert_eq!(tree.annotations.len(), 3);
        assert_eq!(tree.annotations[0].span, SpanNode::Simple(Span::new(0, 1)));
        assert_eq!(tree.annotations[1].span, SpanNode::Simple(Span::new(2, 1)));
        assert_eq!(tree.annotations[2].span, SpanNode::Simple(Span::new(4, 1)));
        assert!(tree.annotations.iter().all(|a| a.value.is_none()));
    }

    #[test]
    fn test_tokenized_lowercases_via_override() {
        let v = StringValue::tokenized("Hello world");
        let tree = v.tree(LINGUISTICS_TREE).unwrap();
        assert_eq!(tree.annotations[0].value.as_deref(), Some("hello"));
        assert_eq!(tree.annotations[1].value, None);
    }

    #[test]
    fn test_plain_has_no_tree() {
        let v = StringValue::plain("exact match value");
        assert!(v.tree(LINGUISTICS_TREE).is_none());
    }
}
