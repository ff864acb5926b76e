//! Core traits for the usersync system
//!
//! These are the seams between the engine and its collaborators.
//!
//! - [`DirectoryClient`]: Manage accounts in the external user pool
//! - [`ObjectStore`]: Read and write `ManagedUser` objects
//! - [`TriggerSource`]: Deliver reconciliation requests

pub mod directory_client;
pub mod object_store;
pub mod trigger_source;

pub use directory_client::{DirectoryAccount, DirectoryClient, DirectoryClientFactory};
pub use object_store::{ObjectStore, ObjectStoreFactory};
pub use trigger_source::{TriggerSource, TriggerStream};
