//! Contract Test: Sync Pass
//!
//! Verifies how a pass converges the directory account on the spec.
//!
//! Constraints verified:
//! - Missing account → create, status records sub / CONFIRMED / sync time
//! - Drifted account → exactly one full update, never a create
//! - Matching account → no mutation, sync time still advances
//! - Directory failure → retryable error with the fixed hint, status untouched
//! - Lookup prefers the stored subject id over email and name
//! - A linked account deleted out of band → retryable conflict, no create,
//!   sync time stays stale
//! - An adopted account that differs from the spec is updated on create
//! - Owner edits to a file store between passes are synchronized

mod common;

use common::*;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};
use usersync_core::config::ControllerConfig;
use usersync_core::model::STATUS_CONFIRMED;
use usersync_core::registry::Registry;
use usersync_core::store::{FileObjectStore, MemoryObjectStore};
use usersync_core::traits::{DirectoryClient, ObjectStore};
use usersync_core::{ReconcileError, UserReconciler};

#[tokio::test]
async fn missing_account_is_created_and_linked() {
    let store = MemoryObjectStore::new();
    store.insert(declared_user("alice", "a@x.com", true)).await;

    let directory = RecordingDirectory::new();
    let reconciler = reconciler(
        Arc::new(store.clone()),
        Some(RecordingDirectory::sharing_counters_with(&directory)),
    );

    assert_ok!(reconciler.reconcile(&user_ref("alice")).await);

    assert_eq!(directory.create_calls(), 1);
    assert_eq!(directory.update_calls(), 0);

    let user = store.get(&user_ref("alice")).await.unwrap().unwrap();
    assert_eq!(user.status.sub, "sub-1");
    assert_eq!(user.status.user_pool_status, STATUS_CONFIRMED);
    assert!(user.status.last_sync_time.is_some());
    assert_eq!(user.status.observed_generation, user.metadata.generation);

    let account = directory.account("alice").unwrap();
    assert_eq!(account.email, "a@x.com");
    assert!(account.enabled);
}

#[tokio::test]
async fn drifted_account_is_updated_once() {
    let store = MemoryObjectStore::new();
    store
        .insert(linked_user("alice", "new@x.com", true, "sub-1"))
        .await;

    let directory = RecordingDirectory::new();
    directory.seed("alice", "old@x.com", true, "sub-1");
    let reconciler = reconciler(
        Arc::new(store.clone()),
        Some(RecordingDirectory::sharing_counters_with(&directory)),
    );

    reconciler.reconcile(&user_ref("alice")).await.unwrap();

    assert_eq!(directory.create_calls(), 0);
    assert_eq!(directory.update_calls(), 1);
    let updates = directory.updates();
    assert_eq!(updates[0].email, "new@x.com");
    assert!(updates[0].enabled);
    assert_eq!(updates[0].identifier(), "sub-1");

    let user = store.get(&user_ref("alice")).await.unwrap().unwrap();
    assert_eq!(user.status.sub, "sub-1");
    assert!(user.status.last_sync_time.is_some());
}

#[tokio::test]
async fn enabled_flag_drift_triggers_update() {
    let store = MemoryObjectStore::new();
    store
        .insert(linked_user("alice", "a@x.com", false, "sub-1"))
        .await;

    let directory = RecordingDirectory::new();
    directory.seed("alice", "a@x.com", true, "sub-1");
    let reconciler = reconciler(
        Arc::new(store),
        Some(RecordingDirectory::sharing_counters_with(&directory)),
    );

    reconciler.reconcile(&user_ref("alice")).await.unwrap();

    assert_eq!(directory.update_calls(), 1);
    assert!(!directory.account("alice").unwrap().enabled);
}

#[tokio::test]
async fn matching_account_is_left_alone_but_sync_time_advances() {
    let store = MemoryObjectStore::new();
    store
        .insert(linked_user("alice", "a@x.com", true, "sub-1"))
        .await;

    let directory = RecordingDirectory::new();
    directory.seed("alice", "a@x.com", true, "sub-1");
    let reconciler = reconciler(
        Arc::new(store.clone()),
        Some(RecordingDirectory::sharing_counters_with(&directory)),
    );

    reconciler.reconcile(&user_ref("alice")).await.unwrap();
    let first = store
        .get(&user_ref("alice"))
        .await
        .unwrap()
        .unwrap()
        .status
        .last_sync_time
        .unwrap();

    tokio::time::sleep(Duration::from_millis(10)).await;
    reconciler.reconcile(&user_ref("alice")).await.unwrap();
    let second = store
        .get(&user_ref("alice"))
        .await
        .unwrap()
        .unwrap()
        .status
        .last_sync_time
        .unwrap();

    assert_eq!(directory.create_calls(), 0);
    assert_eq!(directory.update_calls(), 0);
    assert!(second > first, "sync time should advance on a no-op pass");
}

#[tokio::test]
async fn create_failure_is_retryable_with_fixed_hint() {
    let store = MemoryObjectStore::new();
    store.insert(declared_user("alice", "a@x.com", true)).await;

    let directory = RecordingDirectory::new();
    directory.fail_next_creates(1);
    let reconciler = UserReconciler::new(
        Arc::new(store.clone()),
        Some(Arc::new(RecordingDirectory::sharing_counters_with(&directory)) as Arc<dyn DirectoryClient>),
        Arc::new(Registry::with_builtin()),
        &ControllerConfig::default(),
    );

    let err = assert_err!(reconciler.reconcile(&user_ref("alice")).await);
    assert!(matches!(err, ReconcileError::Retryable { .. }));
    assert_eq!(err.requeue_after(), Some(Duration::from_secs(300)));

    let user = store.get(&user_ref("alice")).await.unwrap().unwrap();
    assert!(user.status.sub.is_empty(), "status.sub must stay empty");
    assert!(user.status.last_sync_time.is_none());
    assert!(user.status.conditions.is_empty(), "status must be untouched");
    // Metadata was still persisted
    assert!(user.has_cleanup_finalizer());
    assert!(user.last_reconciled_at().is_some());
}

#[tokio::test]
async fn update_failure_does_not_advance_sync_time() {
    let store = MemoryObjectStore::new();
    store
        .insert(linked_user("alice", "new@x.com", true, "sub-1"))
        .await;

    let directory = RecordingDirectory::new();
    directory.seed("alice", "old@x.com", true, "sub-1");
    directory.fail_next_updates(1);
    let reconciler = reconciler(
        Arc::new(store.clone()),
        Some(RecordingDirectory::sharing_counters_with(&directory)),
    );

    let err = assert_err!(reconciler.reconcile(&user_ref("alice")).await);
    assert!(matches!(err, ReconcileError::Retryable { .. }));

    let user = store.get(&user_ref("alice")).await.unwrap().unwrap();
    assert!(user.status.last_sync_time.is_none());
    assert_eq!(directory.account("alice").unwrap().email, "old@x.com");
}

#[tokio::test]
async fn transient_lookup_failure_does_not_create() {
    let store = MemoryObjectStore::new();
    store.insert(declared_user("alice", "a@x.com", true)).await;

    let directory = RecordingDirectory::new();
    directory.fail_next_gets(1);
    let reconciler = reconciler(
        Arc::new(store),
        Some(RecordingDirectory::sharing_counters_with(&directory)),
    );

    let err = assert_err!(reconciler.reconcile(&user_ref("alice")).await);
    assert!(matches!(err, ReconcileError::Retryable { .. }));
    assert_eq!(directory.create_calls(), 0);
}

#[tokio::test]
async fn lookup_uses_subject_id_after_email_change() {
    // The account is found by sub even though the new email matches nothing
    let store = MemoryObjectStore::new();
    store
        .insert(linked_user("alice", "renamed@x.com", true, "sub-9"))
        .await;

    let directory = RecordingDirectory::new();
    directory.seed("alice", "a@x.com", true, "sub-9");
    let reconciler = reconciler(
        Arc::new(store),
        Some(RecordingDirectory::sharing_counters_with(&directory)),
    );

    reconciler.reconcile(&user_ref("alice")).await.unwrap();

    assert_eq!(directory.create_calls(), 0);
    assert_eq!(directory.update_calls(), 1);
    assert_eq!(directory.account_count(), 1);
    assert_eq!(directory.account("alice").unwrap().email, "renamed@x.com");
}

#[tokio::test]
async fn found_account_backfills_missing_sub() {
    let store = MemoryObjectStore::new();
    store.insert(declared_user("alice", "a@x.com", true)).await;

    let directory = RecordingDirectory::new();
    directory.seed("alice", "a@x.com", true, "sub-42");
    let reconciler = reconciler(
        Arc::new(store.clone()),
        Some(RecordingDirectory::sharing_counters_with(&directory)),
    );

    reconciler.reconcile(&user_ref("alice")).await.unwrap();

    let user = store.get(&user_ref("alice")).await.unwrap().unwrap();
    assert_eq!(user.status.sub, "sub-42");
    assert_eq!(directory.create_calls(), 0);
}

#[tokio::test]
async fn no_directory_skips_sync_pass() {
    let store = MemoryObjectStore::new();
    store.insert(declared_user("alice", "a@x.com", true)).await;
    let reconciler = reconciler(Arc::new(store.clone()), None);

    reconciler.reconcile(&user_ref("alice")).await.unwrap();

    let user = store.get(&user_ref("alice")).await.unwrap().unwrap();
    assert!(user.has_cleanup_finalizer());
    assert!(user.last_reconciled_at().is_some());
    assert!(user.status.sub.is_empty());
    assert!(user.status.last_sync_time.is_none());
}

#[tokio::test]
async fn deleted_linked_account_is_not_recreated() {
    let store = MemoryObjectStore::new();
    store
        .insert(linked_user("alice", "a@x.com", true, "sub-gone"))
        .await;

    let directory = RecordingDirectory::new();
    let reconciler = reconciler(
        Arc::new(store.clone()),
        Some(RecordingDirectory::sharing_counters_with(&directory)),
    );

    let err = assert_err!(reconciler.reconcile(&user_ref("alice")).await);
    assert!(matches!(err, ReconcileError::Retryable { .. }));
    assert_eq!(directory.create_calls(), 0);
    assert_eq!(directory.account_count(), 0);

    // An email change does not unstick it either
    let mut edited = store.get(&user_ref("alice")).await.unwrap().unwrap();
    edited.spec.email = "b@x.com".to_string();
    store.update(&edited).await.unwrap();
    assert_err!(reconciler.reconcile(&user_ref("alice")).await);

    assert_eq!(directory.create_calls(), 0);
    let user = store.get(&user_ref("alice")).await.unwrap().unwrap();
    assert_eq!(user.status.sub, "sub-gone");
    assert!(user.status.last_sync_time.is_none(), "sync time must stay stale");
    assert!(user.status.user_pool_status.is_empty());
}

#[tokio::test]
async fn adopted_account_is_brought_in_line_with_spec() {
    let store = MemoryObjectStore::new();
    store.insert(declared_user("alice", "a@x.com", false)).await;

    // Same username, but neither email nor enabled match
    let directory = RecordingDirectory::new();
    directory.seed("alice", "old@x.com", true, "sub-7");
    let reconciler = reconciler(
        Arc::new(store.clone()),
        Some(RecordingDirectory::sharing_counters_with(&directory)),
    );

    assert_ok!(reconciler.reconcile(&user_ref("alice")).await);

    assert_eq!(directory.create_calls(), 1);
    assert_eq!(directory.update_calls(), 1);
    assert_eq!(directory.updates()[0].identifier(), "sub-7");
    let account = directory.account("alice").unwrap();
    assert_eq!(account.email, "a@x.com");
    assert!(!account.enabled);

    let user = store.get(&user_ref("alice")).await.unwrap().unwrap();
    assert_eq!(user.status.sub, "sub-7");
    assert!(user.status.last_sync_time.is_some());
}

#[tokio::test]
async fn adopted_account_update_failure_leaves_status_untouched() {
    let store = MemoryObjectStore::new();
    store.insert(declared_user("alice", "a@x.com", true)).await;

    let directory = RecordingDirectory::new();
    directory.seed("alice", "old@x.com", true, "sub-7");
    directory.fail_next_updates(1);
    let reconciler = reconciler(
        Arc::new(store.clone()),
        Some(RecordingDirectory::sharing_counters_with(&directory)),
    );

    let err = assert_err!(reconciler.reconcile(&user_ref("alice")).await);
    assert!(matches!(err, ReconcileError::Retryable { .. }));

    let user = store.get(&user_ref("alice")).await.unwrap().unwrap();
    assert!(user.status.sub.is_empty());
    assert!(user.status.last_sync_time.is_none());
}

#[tokio::test]
async fn file_store_edits_between_passes_are_synchronized() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("users.json");
    let store = Arc::new(FileObjectStore::new(&path).await.unwrap());
    store
        .insert(declared_user("alice", "a@x.com", true))
        .await
        .unwrap();

    let directory = RecordingDirectory::new();
    let reconciler = reconciler(
        store.clone(),
        Some(RecordingDirectory::sharing_counters_with(&directory)),
    );
    assert_ok!(reconciler.reconcile(&user_ref("alice")).await);
    assert_eq!(directory.create_calls(), 1);

    // The owner changes the email and declares a second user in the file
    let mut document: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    document["objects"][0]["spec"]["email"] = "alice.renamed@x.com".into();
    let bob = serde_json::to_value(declared_user("bob", "bob@x.com", true)).unwrap();
    document["objects"].as_array_mut().unwrap().push(bob);
    std::fs::write(&path, serde_json::to_string_pretty(&document).unwrap()).unwrap();

    assert_ok!(reconciler.reconcile(&user_ref("alice")).await);
    assert_eq!(directory.update_calls(), 1);
    assert_eq!(directory.account("alice").unwrap().email, "alice.renamed@x.com");

    let alice = store.get(&user_ref("alice")).await.unwrap().unwrap();
    assert_eq!(alice.status.observed_generation, alice.metadata.generation);
    assert!(alice.metadata.generation > 1, "spec edit bumps the generation");

    // The engine's writes kept the owner's edits
    let reopened = FileObjectStore::new(&path).await.unwrap();
    assert_eq!(
        reopened.list(None).await.unwrap(),
        vec![user_ref("alice"), user_ref("bob")]
    );
    let persisted = reopened.get(&user_ref("alice")).await.unwrap().unwrap();
    assert_eq!(persisted.spec.email, "alice.renamed@x.com");
    assert_eq!(persisted.status.sub, "sub-1");
}
