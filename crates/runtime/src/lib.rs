//! Request runtime for Chorus.
//!
//! - **WorkQueue**: bounded-parallelism FIFO executor for generation tasks
//! - **AdmissionController**: fixed-window per-caller limits with deferred replay
//! - **Orchestrator**: admission → queue → prompt assembly → backend → persona delivery

pub mod admission;
pub mod orchestrator;
pub mod work_queue;

pub use admission::{AdmissionController, AdmissionLimits};
pub use orchestrator::{
    Caller, DeliveryOutcome, ErrorKind, FallbackReason, InferenceRequest, Orchestrator,
    OrchestratorError, OrchestratorStats, PendingOutcome,
};
pub use work_queue::{QueueError, TaskHandle, WorkQueue};
