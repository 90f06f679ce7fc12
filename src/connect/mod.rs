//! Connect-by-id orchestration and its completion primitives.

pub mod orchestrator;
pub mod slot;
pub mod timer;

pub use orchestrator::{ConnectOrchestrator, ConnectOutcome, ConnectPhase, ConnectResult};
pub use slot::{PendingRequestSlot, Settlement};
pub use timer::TimeoutHandle;
