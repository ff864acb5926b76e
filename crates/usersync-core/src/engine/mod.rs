//! Reconciliation engine
//!
//! [`UserReconciler`] runs one reconciliation pass for one [`ObjectRef`]. The
//! [`Controller`] feeds it references from a trigger source and decides when
//! failed passes are retried.
//!
//! ## Pass
//!
//! ```text
//!            fetch ──── absent ───────────────────────────► done
//!              │
//!      deletion marker? ── yes ─► cleanup account (best effort)
//!              │                  remove finalizer, persist ─► done
//!              no
//!              │
//!   finalizer present? ── no ──► add finalizer, persist
//!              │
//!          sync pass ──► get ── not found, no sub ─► create, update if adopted drifted
//!              │          ├──── not found, sub ────► conflict (retried)
//!              │          └──── found ─────────────► update if drifted
//!              │
//!   stamp last-reconciled, persist metadata
//!   persist status (separate write)
//! ```
//!
//! A pass keeps no state between runs: the finalizer set and the status are
//! the only progress markers, so a pass can be re-run from scratch at any
//! point.

mod controller;
mod queue;
mod triggers;

pub use controller::{Controller, ControllerEvent};
pub use triggers::{ChannelTriggerSource, ResyncTriggerSource};

use crate::config::ControllerConfig;
use crate::error::{Error, ReconcileError};
use crate::finalizer;
use crate::model::{CLEANUP_FINALIZER, LAST_RECONCILED_ANNOTATION, ManagedUser, ObjectRef};
use crate::registry::Registry;
use crate::status::{StatusWriter, SyncOutcome};
use crate::traits::{DirectoryAccount, DirectoryClient, ObjectStore};
use chrono::{SecondsFormat, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Per-resource reconciliation
///
/// Holds no per-resource state. The controller guarantees at most one
/// in-flight pass per reference, so passes take no locks of their own.
pub struct UserReconciler {
    /// Where `ManagedUser` objects live
    store: Arc<dyn ObjectStore>,

    /// User pool; `None` disables the sync pass
    directory: Option<Arc<dyn DirectoryClient>>,

    /// Known resource kinds
    registry: Arc<Registry>,

    /// Status sub-resource writes
    status_writer: StatusWriter,

    /// Fixed retry delay for directory failures
    requeue_after: Duration,
}

impl UserReconciler {
    /// Create a reconciler
    ///
    /// # Parameters
    ///
    /// - `store`: Object store holding the resources
    /// - `directory`: User pool binding, or `None` to skip synchronization
    /// - `registry`: Registry listing the accepted resource kinds
    /// - `config`: Controller configuration (retry delay)
    pub fn new(
        store: Arc<dyn ObjectStore>,
        directory: Option<Arc<dyn DirectoryClient>>,
        registry: Arc<Registry>,
        config: &ControllerConfig,
    ) -> Self {
        Self {
            status_writer: StatusWriter::new(Arc::clone(&store)),
            store,
            directory,
            registry,
            requeue_after: config.requeue_after(),
        }
    }

    /// The store this reconciler reads and writes
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Run one reconciliation pass
    ///
    /// # Returns
    ///
    /// - `Ok(())`: The pass completed; nothing further until the next trigger
    /// - `Err(ReconcileError::Retryable)`: Directory failure; metadata was
    ///   persisted, status was left untouched
    /// - `Err(ReconcileError::Store)`: Object store failure
    /// - `Err(ReconcileError::Fatal)`: Malformed reference or unknown kind
    #[instrument(
        skip(self),
        fields(
            cluster = %object_ref.cluster,
            namespace = %object_ref.namespace,
            name = %object_ref.name
        )
    )]
    pub async fn reconcile(&self, object_ref: &ObjectRef) -> Result<(), ReconcileError> {
        object_ref.validate().map_err(ReconcileError::Fatal)?;

        let Some(user) = self
            .store
            .get(object_ref)
            .await
            .map_err(ReconcileError::Store)?
        else {
            debug!("Object not found, nothing to reconcile");
            return Ok(());
        };

        self.registry
            .check_kind(&user.type_meta)
            .map_err(ReconcileError::Fatal)?;

        if user.is_deleting() {
            return self.finalize(user).await;
        }

        let user = self.ensure_finalizer(user).await?;

        let sync = match &self.directory {
            Some(directory) => self.sync(directory.as_ref(), &user).await,
            None => Ok(SyncOutcome::Skipped),
        };

        let mut next = user.clone();
        next.metadata.annotations.insert(
            LAST_RECONCILED_ANNOTATION.to_string(),
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        );
        let stored = self
            .store
            .update(&next)
            .await
            .map_err(ReconcileError::Store)?;

        match sync {
            Ok(outcome) => {
                self.status_writer
                    .write(&stored, &outcome)
                    .await
                    .map_err(ReconcileError::Store)?;
                debug!("Reconciled");
                Ok(())
            }
            Err(e) => {
                warn!("Sync with user pool failed: {}", e);
                Err(ReconcileError::retryable(e, self.requeue_after))
            }
        }
    }

    /// Add the cleanup finalizer if missing and persist it
    ///
    /// Returns the object to continue the pass with.
    async fn ensure_finalizer(&self, user: ManagedUser) -> Result<ManagedUser, ReconcileError> {
        if user.has_cleanup_finalizer() {
            return Ok(user);
        }

        let mut next = user.clone();
        next.metadata.finalizers = finalizer::add(&user.metadata.finalizers, CLEANUP_FINALIZER);
        let stored = self
            .store
            .update(&next)
            .await
            .map_err(ReconcileError::Store)?;
        info!("Added cleanup finalizer");
        Ok(stored)
    }

    /// Deletion lifecycle: best-effort cleanup, then release the object
    async fn finalize(&self, user: ManagedUser) -> Result<(), ReconcileError> {
        if !user.has_cleanup_finalizer() {
            debug!("Deletion requested but cleanup finalizer absent, nothing to do");
            return Ok(());
        }

        if let Some(directory) = &self.directory {
            self.cleanup(directory.as_ref(), &user).await;
        }

        let mut next = user.clone();
        next.metadata.finalizers = finalizer::remove(&user.metadata.finalizers, CLEANUP_FINALIZER);
        match self.store.update(&next).await {
            Ok(_) => info!("Removed cleanup finalizer"),
            Err(e) if e.is_not_found() => debug!("Object already gone"),
            Err(e) => return Err(ReconcileError::Store(e)),
        }

        Ok(())
    }

    /// Delete the directory account, logging and swallowing every failure
    async fn cleanup(&self, directory: &dyn DirectoryClient, user: &ManagedUser) {
        let mut account = None;
        for identifier in cleanup_identifiers(user) {
            match directory.get(identifier).await {
                Ok(found) => {
                    account = Some(found);
                    break;
                }
                Err(e) if e.is_not_found() => {
                    debug!(identifier, "Account not in user pool");
                }
                Err(e) => {
                    warn!(identifier, "Failed to look up account for cleanup: {}", e);
                    return;
                }
            }
        }

        let Some(account) = account else {
            if user.status.sub.is_empty() {
                info!("No unlinked account found by name or email, skipping delete");
            } else {
                debug!(sub = %user.status.sub, "Linked account already gone, skipping delete");
            }
            return;
        };

        match directory.delete(account.identifier()).await {
            Ok(()) => info!(
                username = %account.username,
                directory = directory.directory_name(),
                "Deleted account from user pool"
            ),
            Err(e) => warn!(
                username = %account.username,
                "Failed to delete account from user pool: {}",
                e
            ),
        }
    }

    /// Converge the directory account on the spec
    async fn sync(
        &self,
        directory: &dyn DirectoryClient,
        user: &ManagedUser,
    ) -> Result<SyncOutcome, Error> {
        let identifier = lookup_identifier(user);

        let found = match directory.get(identifier).await {
            Ok(found) => found,
            Err(e) if e.is_not_found() && !user.status.sub.is_empty() => {
                // A recorded sub is never replaced, so a new account could
                // never be linked
                warn!(
                    sub = %user.status.sub,
                    "Linked account no longer exists in user pool"
                );
                return Err(Error::conflict(format!(
                    "linked account {} no longer exists in the user pool; \
                     clear status.sub to create a new one",
                    user.status.sub
                )));
            }
            Err(e) if e.is_not_found() => {
                info!(identifier, "Creating account in user pool");
                let desired =
                    DirectoryAccount::desired(user.name(), &user.spec.email, user.spec.enabled);
                let created = directory.create(&desired).await?;
                info!(sub = %created.sub, "Account created in user pool");

                // create adopts an existing account as-is
                if created.differs_from(&user.spec.email, user.spec.enabled) {
                    let converged = converge(directory, user, created).await?;
                    return Ok(SyncOutcome::Created(converged));
                }
                return Ok(SyncOutcome::Created(created));
            }
            Err(e) => return Err(e),
        };

        if !found.differs_from(&user.spec.email, user.spec.enabled) {
            debug!(identifier, "Account already matches spec");
            return Ok(SyncOutcome::InSync(found));
        }

        Ok(SyncOutcome::Updated(converge(directory, user, found).await?))
    }
}

/// Push the spec onto an existing account with one full update
///
/// Returns the account as it looks after the update.
async fn converge(
    directory: &dyn DirectoryClient,
    user: &ManagedUser,
    found: DirectoryAccount,
) -> Result<DirectoryAccount, Error> {
    let mut desired =
        DirectoryAccount::desired(&found.username, &user.spec.email, user.spec.enabled);
    desired.sub = if found.sub.is_empty() {
        user.status.sub.clone()
    } else {
        found.sub.clone()
    };

    info!(username = %found.username, "Updating account in user pool");
    directory.update(&desired).await?;
    info!(username = %found.username, "Account updated in user pool");

    Ok(DirectoryAccount {
        email: desired.email,
        enabled: desired.enabled,
        ..found
    })
}

/// Identifiers cleanup tries, in order
///
/// A linked account is only ever addressed by its subject id. An unlinked
/// one (the status write after a create failed) is looked for under the
/// local name, then under the spec email that providers keyed by email use
/// as the username.
pub fn cleanup_identifiers(user: &ManagedUser) -> Vec<&str> {
    if !user.status.sub.is_empty() {
        return vec![user.status.sub.as_str()];
    }
    let mut identifiers = vec![user.name()];
    if !user.spec.email.is_empty() && user.spec.email != user.name() {
        identifiers.push(user.spec.email.as_str());
    }
    identifiers
}

/// Identifier to look the account up by
///
/// The subject id wins once known, then the spec email, then the local name.
pub fn lookup_identifier(user: &ManagedUser) -> &str {
    if !user.status.sub.is_empty() {
        &user.status.sub
    } else if !user.spec.email.is_empty() {
        &user.spec.email
    } else {
        user.name()
    }
}
