//! Row data as handed out by the source, and the immutable snapshots
//! derived from it for the shared cache.

use crate::{EntityKey, Identifier, Timestamp, Version};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Value of a single mapped field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(Timestamp),
    Uuid(Uuid),
    /// Foreign-key reference to another entity.
    Reference(EntityKey),
    /// Ids of an eagerly fetched collection. Never stored in a snapshot.
    Collection(Vec<Identifier>),
}

impl FieldValue {
    /// True for values that may be stored in an [`EntitySnapshot`].
    pub fn is_scalar(&self) -> bool {
        !matches!(self, FieldValue::Collection(_))
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            FieldValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Int(value as i64)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<EntityKey> for FieldValue {
    fn from(value: EntityKey) -> Self {
        FieldValue::Reference(value)
    }
}

/// Field name to value mapping for one row.
pub type FieldMap = BTreeMap<String, FieldValue>;

/// Raw row returned by a [`crate::Loader`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityRow {
    pub fields: FieldMap,
    pub version: Option<Version>,
}

impl EntityRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }
}

/// Immutable scalar copy of a row, safe to share between units of work.
///
/// Holds values and foreign-key ids only; collection fields are dropped
/// when the snapshot is taken. Cloning shares the underlying field map.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySnapshot {
    fields: Arc<FieldMap>,
    version: Option<Version>,
}

impl EntitySnapshot {
    /// Build a snapshot from a full field map, keeping scalar fields only.
    pub fn from_fields(fields: &FieldMap, version: Option<Version>) -> Self {
        let scalars = fields
            .iter()
            .filter(|(_, value)| value.is_scalar())
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        Self {
            fields: Arc::new(scalars),
            version,
        }
    }

    pub fn from_row(row: &EntityRow) -> Self {
        Self::from_fields(&row.fields, row.version)
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    pub fn version(&self) -> Option<Version> {
        self.version
    }

    /// Copy the fields out for a live instance.
    pub fn to_field_map(&self) -> FieldMap {
        self.fields.as_ref().clone()
    }

    /// True when both snapshots point at the same stored field data.
    pub fn shares_data_with(&self, other: &EntitySnapshot) -> bool {
        Arc::ptr_eq(&self.fields, &other.fields)
    }
}

/// Child ids of one association instance, in source order without duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IdSet(Arc<[Identifier]>);

impl IdSet {
    pub fn new(ids: impl IntoIterator<Item = Identifier>) -> Self {
        let mut seen = std::collections::HashSet::new();
        let ids: Vec<Identifier> = ids
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect();
        Self(ids.into())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, id: &Identifier) -> bool {
        self.0.contains(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Identifier> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Identifier] {
        &self.0
    }
}

impl FromIterator<Identifier> for IdSet {
    fn from_iter<I: IntoIterator<Item = Identifier>>(iter: I) -> Self {
        IdSet::new(iter)
    }
}
