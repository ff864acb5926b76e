//! Test doubles and common utilities for contract tests
//!
//! The doubles count every call and can be told to fail, so tests can assert
//! exactly which collaborator calls a pass made.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use usersync_core::config::ControllerConfig;
use usersync_core::error::{Error, Result};
use usersync_core::model::{CLEANUP_FINALIZER, ManagedUser, ObjectRef, UserSpec};
use usersync_core::registry::Registry;
use usersync_core::store::MemoryObjectStore;
use usersync_core::traits::{DirectoryAccount, DirectoryClient, ObjectStore};
use usersync_core::UserReconciler;

/// A directory double that records calls and supports failure injection
///
/// Accounts are keyed by username. Subject ids are `sub-1`, `sub-2`, ...
pub struct RecordingDirectory {
    accounts: Arc<Mutex<BTreeMap<String, DirectoryAccount>>>,
    issued: Arc<AtomicUsize>,

    get_calls: Arc<AtomicUsize>,
    create_calls: Arc<AtomicUsize>,
    update_calls: Arc<AtomicUsize>,
    delete_calls: Arc<AtomicUsize>,

    /// Payloads passed to update()
    updates: Arc<Mutex<Vec<DirectoryAccount>>>,

    /// Remaining failures per operation
    fail_get: Arc<AtomicUsize>,
    fail_create: Arc<AtomicUsize>,
    fail_update: Arc<AtomicUsize>,
    fail_delete: Arc<AtomicUsize>,

    /// Store and reference to probe for the cleanup finalizer on mutation
    probe: Option<(MemoryObjectStore, ObjectRef)>,
    mutations_without_finalizer: Arc<AtomicUsize>,

    /// Delay applied to get()
    get_delay: Duration,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl RecordingDirectory {
    pub fn new() -> Self {
        Self {
            accounts: Arc::new(Mutex::new(BTreeMap::new())),
            issued: Arc::new(AtomicUsize::new(0)),
            get_calls: Arc::new(AtomicUsize::new(0)),
            create_calls: Arc::new(AtomicUsize::new(0)),
            update_calls: Arc::new(AtomicUsize::new(0)),
            delete_calls: Arc::new(AtomicUsize::new(0)),
            updates: Arc::new(Mutex::new(Vec::new())),
            fail_get: Arc::new(AtomicUsize::new(0)),
            fail_create: Arc::new(AtomicUsize::new(0)),
            fail_update: Arc::new(AtomicUsize::new(0)),
            fail_delete: Arc::new(AtomicUsize::new(0)),
            probe: None,
            mutations_without_finalizer: Arc::new(AtomicUsize::new(0)),
            get_delay: Duration::ZERO,
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Create a RecordingDirectory that shares state and counters with `other`
    pub fn sharing_counters_with(other: &Self) -> Self {
        Self {
            accounts: Arc::clone(&other.accounts),
            issued: Arc::clone(&other.issued),
            get_calls: Arc::clone(&other.get_calls),
            create_calls: Arc::clone(&other.create_calls),
            update_calls: Arc::clone(&other.update_calls),
            delete_calls: Arc::clone(&other.delete_calls),
            updates: Arc::clone(&other.updates),
            fail_get: Arc::clone(&other.fail_get),
            fail_create: Arc::clone(&other.fail_create),
            fail_update: Arc::clone(&other.fail_update),
            fail_delete: Arc::clone(&other.fail_delete),
            probe: other.probe.clone(),
            mutations_without_finalizer: Arc::clone(&other.mutations_without_finalizer),
            get_delay: other.get_delay,
            in_flight: Arc::clone(&other.in_flight),
            max_in_flight: Arc::clone(&other.max_in_flight),
        }
    }

    /// Check the stored object for the cleanup finalizer on every mutation
    pub fn probing(mut self, store: &MemoryObjectStore, object_ref: &ObjectRef) -> Self {
        self.probe = Some((store.clone(), object_ref.clone()));
        self
    }

    /// Delay every get() by `delay`
    pub fn with_get_delay(mut self, delay: Duration) -> Self {
        self.get_delay = delay;
        self
    }

    /// Seed an existing account
    pub fn seed(&self, username: &str, email: &str, enabled: bool, sub: &str) {
        self.accounts.lock().unwrap().insert(
            username.to_string(),
            DirectoryAccount {
                username: username.to_string(),
                email: email.to_string(),
                enabled,
                sub: sub.to_string(),
                status: Some("CONFIRMED".to_string()),
            },
        );
    }

    pub fn fail_next_gets(&self, n: usize) {
        self.fail_get.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_creates(&self, n: usize) {
        self.fail_create.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_updates(&self, n: usize) {
        self.fail_update.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_deletes(&self, n: usize) {
        self.fail_delete.store(n, Ordering::SeqCst);
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> Vec<DirectoryAccount> {
        self.updates.lock().unwrap().clone()
    }

    pub fn account_count(&self) -> usize {
        self.accounts.lock().unwrap().len()
    }

    pub fn account(&self, username: &str) -> Option<DirectoryAccount> {
        self.accounts.lock().unwrap().get(username).cloned()
    }

    pub fn mutations_without_finalizer(&self) -> usize {
        self.mutations_without_finalizer.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    async fn check_probe(&self) {
        if let Some((store, object_ref)) = &self.probe {
            let present = store
                .get(object_ref)
                .await
                .unwrap()
                .is_some_and(|u| u.has_cleanup_finalizer());
            if !present {
                self.mutations_without_finalizer
                    .fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn find(&self, identifier: &str) -> Option<DirectoryAccount> {
        let accounts = self.accounts.lock().unwrap();
        accounts.get(identifier).cloned().or_else(|| {
            accounts
                .values()
                .find(|a| a.sub == identifier || a.email == identifier)
                .cloned()
        })
    }
}

#[async_trait]
impl DirectoryClient for RecordingDirectory {
    async fn create(&self, account: &DirectoryAccount) -> Result<DirectoryAccount> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.check_probe().await;
        if Self::take_failure(&self.fail_create) {
            return Err(Error::directory("create failed: service unavailable"));
        }

        if let Some(existing) = self.find(&account.username) {
            return Ok(existing);
        }

        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let created = DirectoryAccount {
            sub: format!("sub-{}", n),
            status: Some("CONFIRMED".to_string()),
            ..account.clone()
        };
        self.accounts
            .lock()
            .unwrap()
            .insert(created.username.clone(), created.clone());
        Ok(created)
    }

    async fn get(&self, identifier: &str) -> Result<DirectoryAccount> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.get_delay.is_zero() {
            tokio::time::sleep(self.get_delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if Self::take_failure(&self.fail_get) {
            return Err(Error::http("connection reset"));
        }
        self.find(identifier)
            .ok_or_else(|| Error::not_found(format!("account {}", identifier)))
    }

    async fn update(&self, account: &DirectoryAccount) -> Result<()> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        self.check_probe().await;
        self.updates.lock().unwrap().push(account.clone());
        if Self::take_failure(&self.fail_update) {
            return Err(Error::directory("update failed: throttled"));
        }

        let existing = self
            .find(account.identifier())
            .ok_or_else(|| Error::not_found(account.identifier().to_string()))?;
        let mut accounts = self.accounts.lock().unwrap();
        if let Some(stored) = accounts.get_mut(&existing.username) {
            stored.email = account.email.clone();
            stored.enabled = account.enabled;
        }
        Ok(())
    }

    async fn delete(&self, identifier: &str) -> Result<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.fail_delete) {
            return Err(Error::directory("delete failed: service unavailable"));
        }
        if let Some(existing) = self.find(identifier) {
            self.accounts.lock().unwrap().remove(&existing.username);
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<DirectoryAccount>> {
        Ok(self.accounts.lock().unwrap().values().cloned().collect())
    }

    fn directory_name(&self) -> &'static str {
        "recording"
    }
}

/// An object store wrapper that counts writes and can fail them
pub struct FlakyStore {
    inner: MemoryObjectStore,
    update_calls: Arc<AtomicUsize>,
    status_calls: Arc<AtomicUsize>,
    flush_calls: Arc<AtomicUsize>,
    fail_update: Arc<AtomicUsize>,
    fail_status: Arc<AtomicUsize>,
}

impl FlakyStore {
    pub fn new(inner: &MemoryObjectStore) -> Self {
        Self {
            inner: inner.clone(),
            update_calls: Arc::new(AtomicUsize::new(0)),
            status_calls: Arc::new(AtomicUsize::new(0)),
            flush_calls: Arc::new(AtomicUsize::new(0)),
            fail_update: Arc::new(AtomicUsize::new(0)),
            fail_status: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn sharing_counters_with(other: &Self) -> Self {
        Self {
            inner: other.inner.clone(),
            update_calls: Arc::clone(&other.update_calls),
            status_calls: Arc::clone(&other.status_calls),
            flush_calls: Arc::clone(&other.flush_calls),
            fail_update: Arc::clone(&other.fail_update),
            fail_status: Arc::clone(&other.fail_status),
        }
    }

    pub fn fail_next_updates(&self, n: usize) {
        self.fail_update.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_status_writes(&self, n: usize) {
        self.fail_status.store(n, Ordering::SeqCst);
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn flush_calls(&self) -> usize {
        self.flush_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for FlakyStore {
    async fn get(&self, object_ref: &ObjectRef) -> Result<Option<ManagedUser>> {
        self.inner.get(object_ref).await
    }

    async fn update(&self, user: &ManagedUser) -> Result<ManagedUser> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        if RecordingDirectory::take_failure(&self.fail_update) {
            return Err(Error::object_store("update refused"));
        }
        self.inner.update(user).await
    }

    async fn update_status(&self, user: &ManagedUser) -> Result<ManagedUser> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if RecordingDirectory::take_failure(&self.fail_status) {
            return Err(Error::object_store("status update refused"));
        }
        self.inner.update_status(user).await
    }

    async fn list(&self, cluster: Option<&str>) -> Result<Vec<ObjectRef>> {
        self.inner.list(cluster).await
    }

    async fn flush(&self) -> Result<()> {
        self.flush_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Reference used throughout the tests
pub fn user_ref(name: &str) -> ObjectRef {
    ObjectRef::new("root:org", "default", name)
}

/// A user as its owner would declare it
pub fn declared_user(name: &str, email: &str, enabled: bool) -> ManagedUser {
    ManagedUser::new(
        &user_ref(name),
        UserSpec {
            email: email.to_string(),
            enabled,
        },
    )
}

/// A declared user that already carries the cleanup finalizer and a subject id
pub fn linked_user(name: &str, email: &str, enabled: bool, sub: &str) -> ManagedUser {
    let mut user = declared_user(name, email, enabled);
    user.metadata.finalizers.push(CLEANUP_FINALIZER.to_string());
    user.status.sub = sub.to_string();
    user
}

/// Controller settings suitable for tests: no delays, small channel
pub fn test_config() -> ControllerConfig {
    ControllerConfig {
        requeue_after_secs: 0,
        error_backoff_secs: 0,
        reconcile_timeout_secs: 5,
        max_concurrent_reconciles: 4,
        resync_interval_secs: 3600,
        event_channel_capacity: 100,
    }
}

/// Build a reconciler over `store` with an optional directory
pub fn reconciler(
    store: Arc<dyn ObjectStore>,
    directory: Option<RecordingDirectory>,
) -> UserReconciler {
    UserReconciler::new(
        store,
        directory.map(|d| Arc::new(d) as Arc<dyn DirectoryClient>),
        Arc::new(Registry::with_builtin()),
        &test_config(),
    )
}
