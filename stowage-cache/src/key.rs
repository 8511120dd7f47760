//! Region keys and values.
//!
//! A region holds either entity snapshots keyed by [`EntityKey`] or
//! association id lists keyed by [`AssociationKey`]. The two are wrapped in
//! one key type so every region shares the same storage and eviction code.

use std::fmt;

use stowage_core::{AssociationKey, EntityKey, EntitySnapshot, IdSet, Version};

/// Key of one region entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Entity(EntityKey),
    Association(AssociationKey),
}

impl CacheKey {
    /// Entity type the entry belongs to. For associations this is the owner type.
    pub fn type_name(&self) -> &str {
        match self {
            CacheKey::Entity(key) => key.type_name(),
            CacheKey::Association(key) => key.owner().type_name(),
        }
    }

    pub fn as_entity(&self) -> Option<&EntityKey> {
        match self {
            CacheKey::Entity(key) => Some(key),
            CacheKey::Association(_) => None,
        }
    }

    pub fn as_association(&self) -> Option<&AssociationKey> {
        match self {
            CacheKey::Association(key) => Some(key),
            CacheKey::Entity(_) => None,
        }
    }
}

impl From<EntityKey> for CacheKey {
    fn from(key: EntityKey) -> Self {
        CacheKey::Entity(key)
    }
}

impl From<AssociationKey> for CacheKey {
    fn from(key: AssociationKey) -> Self {
        CacheKey::Association(key)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Entity(key) => key.fmt(f),
            CacheKey::Association(key) => key.fmt(f),
        }
    }
}

/// Value of one region entry.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedValue {
    Entity(EntitySnapshot),
    Collection(IdSet),
}

impl CachedValue {
    /// Version carried by the value. Collections are unversioned.
    pub fn version(&self) -> Option<Version> {
        match self {
            CachedValue::Entity(snapshot) => snapshot.version(),
            CachedValue::Collection(_) => None,
        }
    }

    pub fn into_snapshot(self) -> Option<EntitySnapshot> {
        match self {
            CachedValue::Entity(snapshot) => Some(snapshot),
            CachedValue::Collection(_) => None,
        }
    }

    pub fn into_ids(self) -> Option<IdSet> {
        match self {
            CachedValue::Collection(ids) => Some(ids),
            CachedValue::Entity(_) => None,
        }
    }
}
