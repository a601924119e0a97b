//! Index schema
//!
//! An ordered list of field descriptors consumed by the index engine. URI
//! fields are modeled as a group of eight sub-fields (`all`, `scheme`,
//! `host`, `port`, `path`, `query`, `fragment`, `hostname`) fed from one
//! document value.

use serde::{Deserialize, Serialize};

use crate::types::FieldId;

/// Collection type of an index field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectionType {
    Single,
    Array,
    WeightedSet,
}

/// Descriptor for one index field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub collection: CollectionType,
    /// Store the two saturating counters inline in each posting entry.
    pub interleaved_features: bool,
}

/// Field ids of the eight sub-fields backing one URI field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UriFieldGroup {
    /// Name of the document field the group is fed from.
    pub source: String,
    pub all: FieldId,
    pub scheme: FieldId,
    pub host: FieldId,
    pub port: FieldId,
    pub path: FieldId,
    pub query: FieldId,
    pub fragment: FieldId,
    pub hostname: FieldId,
}

impl UriFieldGroup {
    pub fn sub_field_ids(&self) -> [FieldId; 8] {
        [
            self.all,
            self.scheme,
            self.host,
            self.port,
            self.path,
            self.query,
            self.fragment,
            self.hostname,
        ]
    }
}

/// Ordered list of field descriptors plus URI groupings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    fields: Vec<FieldDescriptor>,
    uri_groups: Vec<UriFieldGroup>,
}

const URI_SUB_FIELDS: [&str; 8] = [
    "all", "scheme", "host", "port", "path", "query", "fragment", "hostname",
];

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plain text field and return its field id.
    pub fn add_text_field(
        &mut self,
        name: &str,
        collection: CollectionType,
        interleaved_features: bool,
    ) -> FieldId {
        let id = self.fields.len() as FieldId;
        self.fields.push(FieldDescriptor {
            name: name.to_string(),
            collection,
            interleaved_features,
        });
        id
    }

    /// Add a URI field. Creates the eight sub-fields (`<name>.all`,
    /// `<name>.scheme`, ...) and records the grouping. Returns the group.
    pub fn add_uri_field(&mut self, name: &str, collection: CollectionType) -> &UriFieldGroup {
        let mut ids = [0 as FieldId; 8];
        for (i, sub) in URI_SUB_FIELDS.iter().enumerate() {
            ids[i] = self.add_text_field(&format!("{}.{}", name, sub), collection, false);
        }
        self.uri_groups.push(UriFieldGroup {
            source: name.to_string(),
            all: ids[0],
            scheme: ids[1],
            host: ids[2],
            port: ids[3],
            path: ids[4],
            query: ids[5],
            fragment: ids[6],
            hostname: ids[7],
        });
        self.uri_groups.last().unwrap()
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    pub fn field(&self, field_id: FieldId) -> &FieldDescriptor {
        &self.fields[field_id as usize]
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn uri_groups(&self) -> &[UriFieldGroup] {
        &self.uri_groups
    }

    /// Look up a field id by name.
    pub fn field_id(&self, name: &str) -> Option<FieldId> {
        self.fields
            .iter()
            .position(|f| f.name == name)
            .map(|i| i as FieldId)
    }

    /// Field ids that are not part of any URI group, in schema order.
    pub fn text_field_ids(&self) -> Vec<FieldId> {
        let mut uri_members = vec![false; self.fields.len()];
        for group in &self.uri_groups {
            for id in group.sub_field_ids() {
                uri_members[id as usize] = true;
            }
        }
        (0..self.fields.len() as FieldId)
            .filter(|id| !uri_members[*id as usize])
            .collect()
    }

    /// Intersection of two schemas: the fields of `self` whose descriptor
    /// also appears in `other`. Field ids keep `self`'s numbering, so the
    /// result is suitable for computing hidden fields.
    pub fn intersect(&self, other: &Schema) -> Schema {
        let fields: Vec<FieldDescriptor> = self
            .fields
            .iter()
            .filter(|f| other.fields.iter().any(|o| o == *f))
            .cloned()
            .collect();
        let uri_groups = self
            .uri_groups
            .iter()
            .filter(|g| {
                g.sub_field_ids()
                    .iter()
                    .all(|id| fields.iter().any(|f| f == self.field(*id)))
            })
            .cloned()
            .collect();
        Schema { fields, uri_groups }
    }

    /// True if `other` contains a field with the same descriptor.
    pub fn contains_field(&self, descriptor: &FieldDescriptor) -> bool {
        self.fields.iter().any(|f| f == descriptor)
    }
}
