//! Status writer
//!
//! Turns the outcome of a sync pass into the observed state of a
//! [`ManagedUser`] and persists it through the store's status sub-resource,
//! separately from the metadata write.
//!
//! Two rules hold for every status write:
//!
//! - a subject id, once recorded, is never replaced by a different one
//! - `last_sync_time` only advances when the directory was confirmed to match

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::error::Result;
use crate::model::{Condition, ConditionStatus, ManagedUser, STATUS_CONFIRMED, UserStatus};
use crate::traits::{DirectoryAccount, ObjectStore};

/// Condition type summarizing the last pass
pub const READY_CONDITION: &str = "Ready";

/// What a sync pass established about the directory account
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// No directory is configured; nothing was synchronized
    Skipped,

    /// The account did not exist and was created
    Created(DirectoryAccount),

    /// The account existed with drifted attributes and was updated
    Updated(DirectoryAccount),

    /// The account existed and already matched the spec
    InSync(DirectoryAccount),
}

impl SyncOutcome {
    /// The account the outcome refers to, if any
    pub fn account(&self) -> Option<&DirectoryAccount> {
        match self {
            SyncOutcome::Skipped => None,
            SyncOutcome::Created(a) | SyncOutcome::Updated(a) | SyncOutcome::InSync(a) => Some(a),
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            SyncOutcome::Skipped => "Reconciled",
            SyncOutcome::Created(_) => "Created",
            SyncOutcome::Updated(_) => "Updated",
            SyncOutcome::InSync(_) => "Synced",
        }
    }

    fn message(&self) -> String {
        match self.account() {
            None => "directory synchronization disabled".to_string(),
            Some(a) => format!("directory account {} matches spec", a.username),
        }
    }
}

/// Apply a sync outcome to `status`
///
/// `generation` is the object generation the pass worked from.
pub fn apply_outcome(
    status: &mut UserStatus,
    outcome: &SyncOutcome,
    generation: i64,
    now: DateTime<Utc>,
) {
    if let Some(account) = outcome.account() {
        record_sub(status, &account.sub);

        match (outcome, &account.status) {
            (SyncOutcome::Created(_), _) => {
                status.user_pool_status = STATUS_CONFIRMED.to_string();
            }
            (_, Some(reported)) if !reported.is_empty() => {
                status.user_pool_status = reported.clone();
            }
            _ => {}
        }

        status.last_sync_time = Some(now);
    }

    status.observed_generation = generation;
    set_condition(
        &mut status.conditions,
        Condition {
            type_: READY_CONDITION.to_string(),
            status: ConditionStatus::True,
            reason: outcome.reason().to_string(),
            message: outcome.message(),
            last_transition_time: now,
            observed_generation: generation,
        },
    );
}

/// Record `sub` unless a different subject id is already linked
fn record_sub(status: &mut UserStatus, sub: &str) {
    if sub.is_empty() || status.sub == sub {
        return;
    }
    if status.sub.is_empty() {
        status.sub = sub.to_string();
    } else {
        tracing::warn!(
            stored = %status.sub,
            reported = %sub,
            "Directory reported a different subject id, keeping the stored one"
        );
    }
}

/// Insert or replace a condition by type
///
/// `last_transition_time` is kept when the status value did not change.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time;
            }
            *existing = condition;
        }
        None => conditions.push(condition),
    }
}

/// Persists status through the store's status sub-resource
#[derive(Clone)]
pub struct StatusWriter {
    store: Arc<dyn ObjectStore>,
}

impl StatusWriter {
    /// Create a writer over `store`
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Apply `outcome` to `user` and persist the status
    ///
    /// Returns the object as stored.
    pub async fn write(&self, user: &ManagedUser, outcome: &SyncOutcome) -> Result<ManagedUser> {
        let mut next = user.clone();
        apply_outcome(
            &mut next.status,
            outcome,
            user.metadata.generation,
            Utc::now(),
        );
        self.store.update_status(&next).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn account(sub: &str) -> DirectoryAccount {
        DirectoryAccount {
            username: "alice".to_string(),
            email: "a@x.com".to_string(),
            enabled: true,
            sub: sub.to_string(),
            status: None,
        }
    }

    #[test]
    fn test_created_sets_sub_and_confirmed() {
        let mut status = UserStatus::default();
        let now = Utc::now();
        apply_outcome(&mut status, &SyncOutcome::Created(account("sub-1")), 1, now);

        assert_eq!(status.sub, "sub-1");
        assert_eq!(status.user_pool_status, STATUS_CONFIRMED);
        assert_eq!(status.last_sync_time, Some(now));
        assert_eq!(status.observed_generation, 1);
        assert_eq!(status.conditions.len(), 1);
        assert_eq!(status.conditions[0].reason, "Created");
    }

    #[test]
    fn test_stored_sub_is_never_replaced() {
        let mut status = UserStatus {
            sub: "sub-1".to_string(),
            ..UserStatus::default()
        };
        apply_outcome(&mut status, &SyncOutcome::Created(account("sub-2")), 1, Utc::now());
        assert_eq!(status.sub, "sub-1");
    }

    #[test]
    fn test_in_sync_backfills_sub_and_reported_status() {
        let mut status = UserStatus::default();
        let mut found = account("sub-7");
        found.status = Some("FORCE_CHANGE_PASSWORD".to_string());

        apply_outcome(&mut status, &SyncOutcome::InSync(found), 3, Utc::now());
        assert_eq!(status.sub, "sub-7");
        assert_eq!(status.user_pool_status, "FORCE_CHANGE_PASSWORD");
    }

    #[test]
    fn test_skipped_does_not_stamp_sync_time() {
        let mut status = UserStatus::default();
        apply_outcome(&mut status, &SyncOutcome::Skipped, 2, Utc::now());

        assert!(status.last_sync_time.is_none());
        assert!(status.sub.is_empty());
        assert_eq!(status.observed_generation, 2);
        assert_eq!(status.conditions[0].reason, "Reconciled");
    }

    #[test]
    fn test_transition_time_kept_while_status_unchanged() {
        let mut status = UserStatus::default();
        let first = Utc::now() - Duration::minutes(10);
        apply_outcome(&mut status, &SyncOutcome::InSync(account("s")), 1, first);
        apply_outcome(&mut status, &SyncOutcome::InSync(account("s")), 1, Utc::now());

        assert_eq!(status.conditions.len(), 1);
        assert_eq!(status.conditions[0].last_transition_time, first);
    }
}
