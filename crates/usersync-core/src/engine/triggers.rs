// # Trigger Sources
//
// - `ChannelTriggerSource`: requests pushed by an embedder (watch adapters,
//   tests) through an mpsc channel
// - `ResyncTriggerSource`: every object in a store, listed at a fixed
//   interval; the periodic resync that catches drift made outside the system

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::model::ObjectRef;
use crate::traits::{ObjectStore, TriggerSource, TriggerStream};

/// Buffer between a resync listing and the controller
const RESYNC_BUFFER: usize = 1024;

/// Trigger source fed through an mpsc channel
///
/// The stream ends once every sender is dropped. Only the first `watch`
/// receives the requests; later calls get an empty stream.
pub struct ChannelTriggerSource {
    rx: Mutex<Option<mpsc::Receiver<ObjectRef>>>,
}

impl ChannelTriggerSource {
    /// Create a source and the sender feeding it
    pub fn new(capacity: usize) -> (Self, mpsc::Sender<ObjectRef>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                rx: Mutex::new(Some(rx)),
            },
            tx,
        )
    }
}

impl TriggerSource for ChannelTriggerSource {
    fn watch(&self) -> TriggerStream {
        let rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner).take();
        match rx {
            Some(rx) => Box::pin(ReceiverStream::new(rx)),
            None => {
                tracing::warn!("Channel trigger source already watched, returning empty stream");
                Box::pin(tokio_stream::empty())
            }
        }
    }

    fn source_name(&self) -> &'static str {
        "channel"
    }
}

/// Periodic resync over every stored object
///
/// Lists the store immediately, then once per interval. A failed listing is
/// logged and retried at the next tick.
pub struct ResyncTriggerSource {
    store: Arc<dyn ObjectStore>,
    interval: Duration,
    cluster: Option<String>,
}

impl ResyncTriggerSource {
    /// Resync every object in `store` each `interval`
    pub fn new(store: Arc<dyn ObjectStore>, interval: Duration) -> Self {
        Self {
            store,
            interval,
            cluster: None,
        }
    }

    /// Restrict the resync to one logical cluster
    pub fn with_cluster(mut self, cluster: impl Into<String>) -> Self {
        self.cluster = Some(cluster.into());
        self
    }
}

impl TriggerSource for ResyncTriggerSource {
    fn watch(&self) -> TriggerStream {
        let (tx, rx) = mpsc::channel(RESYNC_BUFFER);

        let store = Arc::clone(&self.store);
        let interval = self.interval;
        let cluster = self.cluster.clone();

        tokio::spawn(async move {
            tracing::info!("Starting periodic resync (interval={:?})", interval);

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = tx.closed() => break,
                }

                let refs = match store.list(cluster.as_deref()).await {
                    Ok(refs) => refs,
                    Err(e) => {
                        tracing::warn!("Resync listing failed: {}", e);
                        continue;
                    }
                };

                tracing::debug!("Resync: {} object(s)", refs.len());
                for object_ref in refs {
                    if tx.send(object_ref).await.is_err() {
                        tracing::debug!("Receiver dropped, stopping resync");
                        return;
                    }
                }
            }
        });

        Box::pin(ReceiverStream::new(rx))
    }

    fn source_name(&self) -> &'static str {
        "resync"
    }
}
