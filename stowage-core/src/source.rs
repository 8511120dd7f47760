//! Collaborator traits for the backing store.
//!
//! The cache never talks to durable storage directly. Point lookups and
//! association queries go through a [`Loader`]; committed changes go through a
//! [`SourceWriter`]. Timeouts and retries are the implementation's business
//! and surface as [`crate::CacheError::SourceUnavailable`].

use async_trait::async_trait;

use crate::{AssociationKey, CacheResult, EntityKey, EntityRow, FieldMap, Identifier, Version};

/// Read side of the backing store.
#[async_trait]
pub trait Loader: Send + Sync {
    /// Load one row by key.
    ///
    /// Returns `Ok(None)` when no row exists for the key.
    async fn load(&self, key: &EntityKey) -> CacheResult<Option<EntityRow>>;

    /// Load the child ids of one association instance.
    async fn load_association(&self, key: &AssociationKey) -> CacheResult<Vec<Identifier>>;
}

/// Write side of the backing store.
///
/// Each call is one committed change. Implementations enforce optimistic
/// versioning and return [`crate::CacheError::StaleWrite`] on conflict.
#[async_trait]
pub trait SourceWriter: Send + Sync {
    /// Persist new field values for an existing row.
    ///
    /// Returns the row's version after the write.
    async fn update(
        &self,
        key: &EntityKey,
        fields: &FieldMap,
        expected: Option<Version>,
    ) -> CacheResult<Option<Version>>;

    /// Insert a new row.
    async fn insert(&self, key: &EntityKey, fields: &FieldMap) -> CacheResult<Option<Version>>;

    /// Delete a row.
    async fn delete(&self, key: &EntityKey, expected: Option<Version>) -> CacheResult<()>;
}

/// A store that can both load and write.
pub trait EntitySource: Loader + SourceWriter {}

impl<T: Loader + SourceWriter> EntitySource for T {}
