//! Host-facing event plumbing.
//!
//! Discovery batches fan out from the [`DiscoveryEventSink`] to the device
//! cache, the connect orchestrator and, when someone is listening, the host
//! event channel. The [`SubscriberGate`] decides what counts as listening.

pub mod gate;
pub mod sink;

pub use gate::SubscriberGate;
pub use sink::{BridgeEvent, DiscoveryEventSink, LogRecord};
