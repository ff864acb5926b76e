// # Trigger Source Trait
//
// Defines where reconciliation requests come from.
//
// A trigger is only a reference: the engine always re-fetches the object, so
// sources may deliver stale or duplicate requests freely.
//
// ## Implementations
//
// - `ChannelTriggerSource`: requests pushed through an mpsc channel
// - `ResyncTriggerSource`: every stored object, at a fixed interval

use std::pin::Pin;
use tokio_stream::Stream;

use crate::model::ObjectRef;

/// Stream of reconciliation requests
pub type TriggerStream = Pin<Box<dyn Stream<Item = ObjectRef> + Send + 'static>>;

/// Trait for reconciliation trigger sources
///
/// Delivery is at-least-once. The stream ends when the source has nothing
/// more to deliver; the controller keeps serving requeues until shutdown.
pub trait TriggerSource: Send + Sync {
    /// Watch for reconciliation requests
    ///
    /// Must be cancellation-safe: dropping the stream releases its resources.
    fn watch(&self) -> TriggerStream;

    /// Name of the source (for logging)
    fn source_name(&self) -> &'static str;
}
