// # usersync-core
//
// Core library keeping declared `User` resources in sync with accounts in an
// external user pool.
//
// ## Architecture Overview
//
// - **DirectoryClient**: Trait for managing accounts in the user pool
// - **ObjectStore**: Trait for reading and writing `ManagedUser` objects
// - **TriggerSource**: Trait for delivering reconciliation requests
// - **UserReconciler**: One convergence pass for one resource
// - **Controller**: Concurrent, per-key serialized passes with retries
// - **Registry**: Factories and known resource kinds, built once at startup
//
// ## Design Principles
//
// 1. **Level-triggered**: Every pass re-fetches the object; triggers carry no
//    trusted payload
// 2. **Finalizer first**: The cleanup finalizer is persisted before any
//    directory mutation
// 3. **Plugin-Based**: Directory bindings and stores register with the
//    registry, no hard-coded if-else
// 4. **Library-First**: All core functionality can be used as a library

pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
pub mod finalizer;
pub mod model;
pub mod registry;
pub mod status;
pub mod store;
pub mod traits;

// Re-export core types for convenience
pub use config::{ControllerConfig, DirectoryConfig, ObjectStoreConfig, SyncConfig, UserPoolRef};
pub use directory::MemoryDirectory;
pub use engine::{
    ChannelTriggerSource, Controller, ControllerEvent, ResyncTriggerSource, UserReconciler,
};
pub use error::{Error, ReconcileError, Result};
pub use model::{ManagedUser, ObjectRef, UserSpec, UserStatus};
pub use registry::Registry;
pub use store::{FileObjectStore, MemoryObjectStore};
pub use traits::{DirectoryAccount, DirectoryClient, ObjectStore, TriggerSource};
