// # Object Store Implementations
//
// This module provides implementations of the ObjectStore trait for
// different persistence strategies, plus the write rules they share.

pub mod file;
pub mod memory;

pub use file::{FileObjectStore, FileObjectStoreFactory};
pub use memory::{MemoryObjectStore, MemoryObjectStoreFactory};

use crate::model::ManagedUser;

/// Merge a metadata/spec write into the stored object
///
/// Status, the deletion marker and the version counters stay store-owned.
pub(crate) fn apply_update(
    stored: &ManagedUser,
    incoming: &ManagedUser,
    resource_version: u64,
) -> ManagedUser {
    let mut next = incoming.clone();
    next.status = stored.status.clone();
    next.metadata.deletion_timestamp = stored.metadata.deletion_timestamp;
    next.metadata.generation = if incoming.spec != stored.spec {
        stored.metadata.generation + 1
    } else {
        stored.metadata.generation
    };
    next.metadata.resource_version = resource_version;
    next
}

/// Merge a status write into the stored object
pub(crate) fn apply_status(
    stored: &ManagedUser,
    incoming: &ManagedUser,
    resource_version: u64,
) -> ManagedUser {
    let mut next = stored.clone();
    next.status = incoming.status.clone();
    next.metadata.resource_version = resource_version;
    next
}

/// Whether the platform may drop the object: deletion requested, no finalizers
pub(crate) fn is_collectable(user: &ManagedUser) -> bool {
    user.is_deleting() && user.metadata.finalizers.is_empty()
}
