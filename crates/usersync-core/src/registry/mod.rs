//! Plugin-based registry
//!
//! The registry is built once at startup and handed to whoever needs it. It
//! holds three things:
//!
//! - directory client factories, keyed by directory type name
//! - object store factories, keyed by store type name
//! - the resource kinds the engine accepts
//!
//! ## Usage
//!
//! ```rust,ignore
//! use usersync_core::registry::Registry;
//! use usersync_core::config::DirectoryConfig;
//!
//! let registry = Registry::with_builtin();
//!
//! // Provider crates register themselves
//! usersync_directory_cognito::register(&registry);
//!
//! let directory = registry.create_directory(&config).await?;
//! ```

use crate::config::{DirectoryConfig, ObjectStoreConfig};
use crate::directory::MemoryDirectoryFactory;
use crate::error::{Error, Result};
use crate::model::TypeMeta;
use crate::store::{FileObjectStoreFactory, MemoryObjectStoreFactory};
use crate::traits::{DirectoryClient, DirectoryClientFactory, ObjectStore, ObjectStoreFactory};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

/// Registry of factories and known resource kinds
///
/// ## Thread Safety
///
/// The registry uses interior mutability with RwLock, allowing concurrent
/// reads and exclusive writes. Locks are never held across an `.await`.
#[derive(Default)]
pub struct Registry {
    /// Registered directory client factories
    directories: RwLock<HashMap<String, Arc<dyn DirectoryClientFactory>>>,

    /// Registered object store factories
    object_stores: RwLock<HashMap<String, Arc<dyn ObjectStoreFactory>>>,

    /// Resource kinds the engine reconciles
    kinds: RwLock<HashSet<TypeMeta>>,
}

impl Registry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the in-crate implementations registered
    ///
    /// Registers the `User` kind, the `memory` and `file` object stores and
    /// the `memory` directory.
    pub fn with_builtin() -> Self {
        let registry = Self::new();
        registry.register_kind(TypeMeta::user());
        registry.register_object_store("memory", Box::new(MemoryObjectStoreFactory));
        registry.register_object_store("file", Box::new(FileObjectStoreFactory));
        registry.register_directory("memory", Box::new(MemoryDirectoryFactory));
        registry
    }

    /// Register a directory client factory
    ///
    /// # Parameters
    ///
    /// - `name`: Directory type name (e.g., "cognito", "memory")
    /// - `factory`: Factory object for creating clients
    pub fn register_directory(
        &self,
        name: impl Into<String>,
        factory: Box<dyn DirectoryClientFactory>,
    ) {
        let mut directories = self
            .directories
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        directories.insert(name.into(), Arc::from(factory));
    }

    /// Register an object store factory
    pub fn register_object_store(
        &self,
        name: impl Into<String>,
        factory: Box<dyn ObjectStoreFactory>,
    ) {
        let mut stores = self
            .object_stores
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        stores.insert(name.into(), Arc::from(factory));
    }

    /// Register a resource kind
    pub fn register_kind(&self, type_meta: TypeMeta) {
        self.kinds
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(type_meta);
    }

    /// Create a directory client from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn DirectoryClient>)`: Created client
    /// - `Err(Error)`: If the type is not registered or creation fails
    pub async fn create_directory(
        &self,
        config: &DirectoryConfig,
    ) -> Result<Box<dyn DirectoryClient>> {
        let directory_type = config.type_name();
        let factory = self
            .directories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(directory_type)
            .cloned()
            .ok_or_else(|| Error::config(format!("Unknown directory type: {}", directory_type)))?;

        factory.create(config).await
    }

    /// Create an object store from configuration
    pub async fn create_object_store(
        &self,
        config: &ObjectStoreConfig,
    ) -> Result<Box<dyn ObjectStore>> {
        let store_type = config.type_name();
        let factory = self
            .object_stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(store_type)
            .cloned()
            .ok_or_else(|| {
                Error::config(format!("Unknown object store type: {}", store_type))
            })?;

        factory.create(config).await
    }

    /// Reject objects of a kind nobody registered
    ///
    /// Returns [`Error::SchemeMismatch`] for an unknown kind.
    pub fn check_kind(&self, type_meta: &TypeMeta) -> Result<()> {
        let kinds = self.kinds.read().unwrap_or_else(PoisonError::into_inner);
        if kinds.contains(type_meta) {
            Ok(())
        } else {
            Err(Error::scheme_mismatch(format!(
                "{} is not a registered kind",
                type_meta
            )))
        }
    }

    /// List all registered directory types
    pub fn list_directories(&self) -> Vec<String> {
        let directories = self
            .directories
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = directories.keys().cloned().collect();
        names.sort();
        names
    }

    /// List all registered object store types
    pub fn list_object_stores(&self) -> Vec<String> {
        let stores = self
            .object_stores
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = stores.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a directory type is registered
    pub fn has_directory(&self, name: &str) -> bool {
        self.directories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Check if an object store type is registered
    pub fn has_object_store(&self, name: &str) -> bool {
        self.object_stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }
}
