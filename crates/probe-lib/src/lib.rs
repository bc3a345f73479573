//! Container health probing for a node agent
//!
//! This crate provides:
//! - Probe execution over exec, HTTP GET and TCP socket primitives
//! - Per-container readiness tracking
//! - Liveness failure dispatch for restart decisions
//! - Classification of provider errors for retry and backoff
//! - Probe workers, an in-memory pod store and observability

pub mod errors;
pub mod liveness;
pub mod manager;
pub mod models;
pub mod observability;
pub mod probe;
pub mod readiness;
pub mod store;
pub mod worker;

pub use errors::{
    is_not_found, is_retryable, suggests_client_delay, ErrorReason, ErrorStatus, OperationError,
};
pub use liveness::{LivenessDispatcher, LivenessUpdate, ResultUpdate};
pub use manager::ProberManager;
pub use models::*;
pub use observability::{EventRecorder, ProbeMetrics, StructuredLogger};
pub use probe::{ProbeEngine, ProbeError, ProbeOutcome, ProbeResult};
pub use readiness::{ReadinessManager, ReadinessTracker, StatusManager};
pub use store::{PodLister, PodStore};
