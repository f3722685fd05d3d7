//! Circuit breaker fabric for external service calls.
//!
//! One named breaker per external service (download, analysis, generation,
//! upload, messaging) with CLOSED/OPEN/HALF_OPEN states, a rolling failure
//! window, typed `CircuitOpen` denials carrying the time until the next
//! probe, a broadcast topic for telemetry, and a best-effort distributed
//! mirror that fails open. Also home to the failure-log suppression used
//! by continuously retrying background loops.

pub mod breaker;
pub mod distributed;
pub mod registry;
pub mod tracker;

pub use breaker::{BreakerConfig, BreakerState, CircuitBreaker, CircuitOpen, Transition};
pub use distributed::BreakerMirror;
pub use registry::{services, BreakerEvent, BreakerRegistry};
pub use tracker::FailureTracker;
