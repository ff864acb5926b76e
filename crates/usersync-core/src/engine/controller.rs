//! Controller loop
//!
//! Drives [`UserReconciler`] passes from a [`TriggerSource`]:
//!
//! ```text
//! ┌───────────────┐            ┌───────────┐          ┌────────────────┐
//! │ TriggerSource │── refs ──► │ WorkQueue │── pop ──►│ UserReconciler │
//! └───────────────┘            └───────────┘          └────────────────┘
//!                                    ▲                        │
//!                                    └──── requeue (delay) ───┘
//! ```
//!
//! ## Retry policy
//!
//! | Pass result                 | Next pass                   |
//! |-----------------------------|-----------------------------|
//! | `Ok(())`                    | next trigger                |
//! | `Err(Retryable)`            | after the error's hint      |
//! | `Err(Store)` / timeout      | after `error_backoff_secs`  |
//! | `Err(Fatal)`                | never (logged)              |

use super::queue::WorkQueue;
use super::UserReconciler;
use crate::config::ControllerConfig;
use crate::error::{ReconcileError, Result};
use crate::model::ObjectRef;
use crate::traits::TriggerSource;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{Id, JoinSet};
use tokio::time::Instant;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

/// Events emitted by the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    /// Controller started consuming triggers
    Started {
        source: String,
    },

    /// A pass completed
    Reconciled {
        object_ref: ObjectRef,
    },

    /// A pass failed and another one is scheduled
    Requeued {
        object_ref: ObjectRef,
        after: Duration,
        error: String,
    },

    /// A pass failed and will not be retried
    Failed {
        object_ref: ObjectRef,
        error: String,
    },

    /// Controller stopped
    Stopped {
        reason: String,
    },
}

type PassResult = std::result::Result<
    std::result::Result<(), ReconcileError>,
    tokio::time::error::Elapsed,
>;

/// Reconciliation controller
///
/// ## Lifecycle
///
/// 1. Create with [`Controller::new()`]
/// 2. Start with [`Controller::run()`]
/// 3. Runs until a shutdown signal is received; in-flight passes are allowed
///    to finish, scheduled retries are dropped
///
/// ## Load Resistance
///
/// - **Bounded concurrency**: at most `max_concurrent_reconciles` passes
/// - **Per-key serialization**: one pass per reference, triggers coalesced
/// - **Bounded event channel**: events are dropped (logged) when full
pub struct Controller {
    /// Per-resource reconciliation
    reconciler: Arc<UserReconciler>,

    /// Where reconciliation requests come from
    source: Box<dyn TriggerSource>,

    /// Concurrency, timeout and backoff settings
    config: ControllerConfig,

    /// Event sender for external monitoring
    event_tx: mpsc::Sender<ControllerEvent>,
}

impl Controller {
    /// Create a new controller
    ///
    /// # Returns
    ///
    /// A tuple of (controller, event_receiver) where event_receiver yields
    /// controller events
    pub fn new(
        reconciler: UserReconciler,
        source: Box<dyn TriggerSource>,
        config: ControllerConfig,
    ) -> Result<(Self, mpsc::Receiver<ControllerEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.event_channel_capacity);

        let controller = Self {
            reconciler: Arc::new(reconciler),
            source,
            config,
            event_tx: tx,
        };

        Ok((controller, rx))
    }

    /// Run the controller until Ctrl-C
    pub async fn run(&self) -> Result<()> {
        self.run_internal(None).await
    }

    /// Run the controller until `shutdown_rx` fires
    ///
    /// With `None`, behaves like [`Controller::run()`]. Used by embedders
    /// and tests that own the shutdown signal.
    pub async fn run_with_shutdown(&self, shutdown_rx: Option<oneshot::Receiver<()>>) -> Result<()> {
        self.run_internal(shutdown_rx).await
    }

    async fn run_internal(&self, shutdown_rx: Option<oneshot::Receiver<()>>) -> Result<()> {
        self.emit_event(ControllerEvent::Started {
            source: self.source.source_name().to_string(),
        });
        info!(
            "Controller started (source={}, max_concurrent={})",
            self.source.source_name(),
            self.config.max_concurrent_reconciles
        );

        let shutdown = async move {
            match shutdown_rx {
                Some(rx) => {
                    let _ = rx.await;
                }
                None => {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        error!("Failed to listen for Ctrl-C: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
        };
        tokio::pin!(shutdown);

        let mut triggers = self.source.watch();
        let mut triggers_open = true;
        let mut queue = WorkQueue::default();
        let mut tasks: JoinSet<(ObjectRef, PassResult)> = JoinSet::new();
        let mut running: HashMap<Id, ObjectRef> = HashMap::new();

        loop {
            while queue.in_flight() < self.config.max_concurrent_reconciles {
                let Some(object_ref) = queue.pop() else { break };
                self.dispatch(&mut tasks, &mut running, object_ref);
            }

            let deadline = queue.next_deadline();

            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }

                next = triggers.next(), if triggers_open => match next {
                    Some(object_ref) => {
                        debug!("Trigger for {}", object_ref);
                        queue.add(object_ref);
                    }
                    None => {
                        debug!("Trigger source {} ended", self.source.source_name());
                        triggers_open = false;
                    }
                },

                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    queue.promote_due(Instant::now());
                }

                Some(joined) = tasks.join_next_with_id() => {
                    self.complete(&mut queue, &mut running, joined);
                }
            }
        }

        // Let in-flight passes finish; each is bounded by the pass timeout
        while let Some(joined) = tasks.join_next_with_id().await {
            self.complete(&mut queue, &mut running, joined);
        }
        if !queue.is_idle() {
            debug!("Dropping scheduled passes on shutdown");
        }

        self.emit_event(ControllerEvent::Stopped {
            reason: "Shutdown signal".to_string(),
        });

        self.reconciler.store().flush().await?;
        info!("Object store flushed, controller stopped");

        Ok(())
    }

    fn dispatch(
        &self,
        tasks: &mut JoinSet<(ObjectRef, PassResult)>,
        running: &mut HashMap<Id, ObjectRef>,
        object_ref: ObjectRef,
    ) {
        let reconciler = Arc::clone(&self.reconciler);
        let timeout = self.config.reconcile_timeout();
        let task_ref = object_ref.clone();

        let handle = tasks.spawn(async move {
            let result = tokio::time::timeout(timeout, reconciler.reconcile(&task_ref)).await;
            (task_ref, result)
        });
        running.insert(handle.id(), object_ref);
    }

    fn complete(
        &self,
        queue: &mut WorkQueue,
        running: &mut HashMap<Id, ObjectRef>,
        joined: std::result::Result<(Id, (ObjectRef, PassResult)), tokio::task::JoinError>,
    ) {
        let (object_ref, result) = match joined {
            Ok((id, (object_ref, result))) => {
                running.remove(&id);
                (object_ref, result)
            }
            Err(e) => {
                let Some(object_ref) = running.remove(&e.id()) else {
                    error!("Reconcile task failed: {}", e);
                    return;
                };
                error!("Reconcile task for {} failed: {}", object_ref, e);
                queue.done(&object_ref);
                self.requeue(queue, object_ref, self.config.error_backoff(), e.to_string());
                return;
            }
        };

        queue.done(&object_ref);

        match result {
            Ok(Ok(())) => {
                self.emit_event(ControllerEvent::Reconciled { object_ref });
            }
            Ok(Err(e)) if e.is_fatal() => {
                error!("Reconcile of {} failed permanently: {}", object_ref, e);
                self.emit_event(ControllerEvent::Failed {
                    object_ref,
                    error: e.to_string(),
                });
            }
            Ok(Err(e)) => {
                let after = e.requeue_after().unwrap_or_else(|| self.config.error_backoff());
                error!("Reconcile of {} failed: {}", object_ref, e);
                self.requeue(queue, object_ref, after, e.to_string());
            }
            Err(_) => {
                let after = self.config.error_backoff();
                warn!(
                    "Reconcile of {} timed out after {:?}",
                    object_ref,
                    self.config.reconcile_timeout()
                );
                self.requeue(queue, object_ref, after, "reconcile timed out".to_string());
            }
        }
    }

    fn requeue(&self, queue: &mut WorkQueue, object_ref: ObjectRef, after: Duration, error: String) {
        debug!("Requeueing {} in {:?}", object_ref, after);
        self.emit_event(ControllerEvent::Requeued {
            object_ref: object_ref.clone(),
            after,
            error,
        });
        queue.add_after(object_ref, after);
    }

    /// Emit a controller event
    fn emit_event(&self, event: ControllerEvent) {
        // Send event, logging warning if channel is full (backpressure)
        if self.event_tx.try_send(event).is_err() {
            warn!(
                "Event channel full, dropping event. Consider increasing event_channel_capacity."
            );
        }
    }
}
