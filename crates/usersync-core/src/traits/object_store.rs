// # Object Store Trait
//
// Defines the interface to the store holding `ManagedUser` objects.
//
// ## Purpose
//
// The store is the engine's only durable memory. Finalizers and status are
// the progress markers that let a pass be re-run from scratch.
//
// ## Write model
//
// - `update` replaces metadata and spec; the stored status is left untouched
// - `update_status` replaces status only
//
// The two writes are independent: the first may land while the second fails.
//
// ## Implementations
//
// - In-memory: `MemoryObjectStore`
// - File-based: `FileObjectStore`

use async_trait::async_trait;

use crate::model::{ManagedUser, ObjectRef};

/// Trait for object store implementations
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks.
///
/// # Conflicts
///
/// Writes are full replacements with last-write-wins semantics. Every write
/// bumps `metadata.resource_version`; `metadata.generation` is bumped when the
/// spec changes. Both are owned by the store: values on the submitted object
/// are ignored.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch the current object
    ///
    /// # Returns
    ///
    /// - `Ok(Some(ManagedUser))`: The stored object
    /// - `Ok(None)`: No such object
    /// - `Err(Error)`: Storage error
    async fn get(&self, object_ref: &ObjectRef) -> Result<Option<ManagedUser>, crate::Error>;

    /// Replace metadata and spec
    ///
    /// # Returns
    ///
    /// - `Ok(ManagedUser)`: The object as stored after the write
    /// - `Err(Error::NotFound)`: The object no longer exists
    /// - `Err(Error)`: Storage error
    async fn update(&self, user: &ManagedUser) -> Result<ManagedUser, crate::Error>;

    /// Replace the status sub-resource
    ///
    /// # Returns
    ///
    /// - `Ok(ManagedUser)`: The object as stored after the write
    /// - `Err(Error::NotFound)`: The object no longer exists
    /// - `Err(Error)`: Storage error
    async fn update_status(&self, user: &ManagedUser) -> Result<ManagedUser, crate::Error>;

    /// List references of every object in `cluster`, or all clusters if `None`
    async fn list(&self, cluster: Option<&str>) -> Result<Vec<ObjectRef>, crate::Error>;

    /// Persist any pending changes
    async fn flush(&self) -> Result<(), crate::Error>;
}

/// Helper trait for constructing object stores from configuration
#[async_trait]
pub trait ObjectStoreFactory: Send + Sync {
    /// Create an ObjectStore instance from configuration
    async fn create(
        &self,
        config: &crate::config::ObjectStoreConfig,
    ) -> Result<Box<dyn ObjectStore>, crate::Error>;
}
