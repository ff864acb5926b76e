// # Memory Object Store
//
// In-memory implementation of ObjectStore.
//
// ## Purpose
//
// Provides a simple, fast store that doesn't persist across restarts.
// Besides the ObjectStore contract it exposes the owner/platform side
// (`insert`, `request_deletion`, `remove`) so tests and embedders can drive
// the full object lifecycle.
//
// ## Garbage collection
//
// Like the platform it stands in for, the store drops an object as soon as
// deletion has been requested and its finalizer set is empty.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::config::ObjectStoreConfig;
use crate::model::{ManagedUser, ObjectRef};
use crate::traits::object_store::{ObjectStore, ObjectStoreFactory};

#[derive(Debug, Default)]
struct Inner {
    objects: HashMap<ObjectRef, ManagedUser>,
    last_version: u64,
}

impl Inner {
    fn next_version(&mut self) -> u64 {
        self.last_version += 1;
        self.last_version
    }
}

/// In-memory object store implementation
///
/// # Example
///
/// ```rust,no_run
/// use usersync_core::model::{ManagedUser, ObjectRef, UserSpec};
/// use usersync_core::store::MemoryObjectStore;
/// use usersync_core::traits::ObjectStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryObjectStore::new();
///     let object_ref = ObjectRef::new("root", "default", "alice");
///
///     store.insert(ManagedUser::new(&object_ref, UserSpec::default())).await;
///     assert!(store.get(&object_ref).await?.is_some());
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryObjectStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryObjectStore {
    /// Create a new empty memory object store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of objects in the store
    pub async fn len(&self) -> usize {
        self.inner.read().await.objects.len()
    }

    /// Check if the store is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.objects.is_empty()
    }

    /// Create or replace an object as its owner would
    ///
    /// Unlike `update`, this writes status too and starts generation at 1.
    pub async fn insert(&self, mut user: ManagedUser) -> ManagedUser {
        let mut guard = self.inner.write().await;
        user.metadata.resource_version = guard.next_version();
        if user.metadata.generation == 0 {
            user.metadata.generation = 1;
        }
        guard.objects.insert(user.object_ref(), user.clone());
        user
    }

    /// Request deletion as the platform would
    ///
    /// Returns `true` while the object lingers behind finalizers.
    pub async fn request_deletion(&self, object_ref: &ObjectRef) -> bool {
        let mut guard = self.inner.write().await;
        let version = guard.next_version();
        let Some(user) = guard.objects.get_mut(object_ref) else {
            return false;
        };

        if user.metadata.deletion_timestamp.is_none() {
            user.metadata.deletion_timestamp = Some(Utc::now());
            user.metadata.generation += 1;
        }
        user.metadata.resource_version = version;

        if super::is_collectable(user) {
            guard.objects.remove(object_ref);
            return false;
        }
        true
    }

    /// Drop an object unconditionally
    pub async fn remove(&self, object_ref: &ObjectRef) -> Option<ManagedUser> {
        self.inner.write().await.objects.remove(object_ref)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, object_ref: &ObjectRef) -> Result<Option<ManagedUser>, Error> {
        let guard = self.inner.read().await;
        Ok(guard.objects.get(object_ref).cloned())
    }

    async fn update(&self, user: &ManagedUser) -> Result<ManagedUser, Error> {
        let object_ref = user.object_ref();
        let mut guard = self.inner.write().await;
        let version = guard.next_version();

        let stored = guard
            .objects
            .get(&object_ref)
            .ok_or_else(|| Error::not_found(format!("object {}", object_ref)))?;
        let next = super::apply_update(stored, user, version);

        if super::is_collectable(&next) {
            guard.objects.remove(&object_ref);
        } else {
            guard.objects.insert(object_ref, next.clone());
        }
        Ok(next)
    }

    async fn update_status(&self, user: &ManagedUser) -> Result<ManagedUser, Error> {
        let object_ref = user.object_ref();
        let mut guard = self.inner.write().await;
        let version = guard.next_version();

        let stored = guard
            .objects
            .get(&object_ref)
            .ok_or_else(|| Error::not_found(format!("object {}", object_ref)))?;
        let next = super::apply_status(stored, user, version);
        guard.objects.insert(object_ref, next.clone());
        Ok(next)
    }

    async fn list(&self, cluster: Option<&str>) -> Result<Vec<ObjectRef>, Error> {
        let guard = self.inner.read().await;
        let mut refs: Vec<ObjectRef> = guard
            .objects
            .keys()
            .filter(|r| cluster.is_none_or(|c| r.cluster == c))
            .cloned()
            .collect();
        refs.sort();
        Ok(refs)
    }

    async fn flush(&self) -> Result<(), Error> {
        // Nothing buffered
        Ok(())
    }
}

/// Factory for creating memory object stores
pub struct MemoryObjectStoreFactory;

#[async_trait]
impl ObjectStoreFactory for MemoryObjectStoreFactory {
    async fn create(&self, config: &ObjectStoreConfig) -> Result<Box<dyn ObjectStore>, Error> {
        match config {
            ObjectStoreConfig::Memory => Ok(Box::new(MemoryObjectStore::new())),
            _ => Err(Error::config("Invalid config for memory object store")),
        }
    }
}
