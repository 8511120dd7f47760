//! Live entity instances handed out by a unit of work.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use stowage_core::{
    CacheError, CacheResult, EntityKey, EntitySnapshot, FieldMap, FieldValue, Version,
};

#[derive(Debug)]
struct EntityState {
    fields: FieldMap,
    version: Option<Version>,
    dirty: BTreeSet<String>,
}

struct ManagedInner {
    key: EntityKey,
    read_only: bool,
    state: RwLock<EntityState>,
}

/// Handle to the one live instance of a key within a unit of work.
///
/// Clones are the same instance; use [`ManagedEntity::same_instance`] to
/// compare identity. Instances are never shared between units of work.
#[derive(Clone)]
pub struct ManagedEntity(Arc<ManagedInner>);

impl ManagedEntity {
    pub(crate) fn new(
        key: EntityKey,
        fields: FieldMap,
        version: Option<Version>,
        read_only: bool,
    ) -> Self {
        Self(Arc::new(ManagedInner {
            key,
            read_only,
            state: RwLock::new(EntityState {
                fields,
                version,
                dirty: BTreeSet::new(),
            }),
        }))
    }

    pub(crate) fn from_snapshot(key: EntityKey, snapshot: &EntitySnapshot, read_only: bool) -> Self {
        Self::new(key, snapshot.to_field_map(), snapshot.version(), read_only)
    }

    pub fn key(&self) -> &EntityKey {
        &self.0.key
    }

    /// True if both handles point at the same live instance.
    pub fn same_instance(&self, other: &ManagedEntity) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn get(&self, field: &str) -> Option<FieldValue> {
        self.0.state.read().fields.get(field).cloned()
    }

    pub fn fields(&self) -> FieldMap {
        self.0.state.read().fields.clone()
    }

    pub fn version(&self) -> Option<Version> {
        self.0.state.read().version
    }

    /// Whether the instance came from a `read_only` region.
    pub fn is_read_only(&self) -> bool {
        self.0.read_only
    }

    /// Change a field. Rejected for instances of read-only cached types.
    pub fn set(&self, field: impl Into<String>, value: impl Into<FieldValue>) -> CacheResult<()> {
        if self.0.read_only {
            return Err(CacheError::ReadOnlyViolation {
                key: self.0.key.clone(),
            });
        }

        let field = field.into();
        let value = value.into();
        let mut state = self.0.state.write();
        if state.fields.get(&field) != Some(&value) {
            state.fields.insert(field.clone(), value);
            state.dirty.insert(field);
        }
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        !self.0.state.read().dirty.is_empty()
    }

    pub fn dirty_fields(&self) -> Vec<String> {
        self.0.state.read().dirty.iter().cloned().collect()
    }

    /// Record a successful commit: take the new version and clear dirty state.
    pub(crate) fn mark_committed(&self, version: Option<Version>) {
        let mut state = self.0.state.write();
        state.version = version;
        state.dirty.clear();
    }
}

impl fmt::Debug for ManagedEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.0.state.read();
        f.debug_struct("ManagedEntity")
            .field("key", &self.0.key)
            .field("version", &state.version)
            .field("fields", &state.fields)
            .field("dirty", &state.dirty)
            .finish()
    }
}
