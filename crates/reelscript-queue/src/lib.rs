//! Redis-backed runtime state for the reelscript backend.
//!
//! This crate provides:
//! - The durable job queue (Redis Streams, consumer groups, stall reclaim)
//! - Ephemeral key-value primitives (counters with TTL, JSON blobs, scans)
//! - Session and variation-counter storage
//! - Per-subscriber quota windows and block flags
//! - Queue lifecycle events over Pub/Sub

pub mod error;
pub mod events;
pub mod job;
pub mod kv;
pub mod limiter;
pub mod queue;
pub mod session;

pub use error::{QueueError, QueueResult};
pub use events::{EventChannel, QueueEvent};
pub use job::ScriptJob;
pub use kv::KvStore;
pub use limiter::{
    QuotaDecision, QuotaStore, DEFAULT_BLOCK_TTL_SECS, DEFAULT_USER_LIMIT, DEFAULT_WINDOW_SECS,
};
pub use queue::{JobQueue, QueueConfig};
pub use session::{SessionStore, DEFAULT_SOFT_VARIATION_LIMIT};
