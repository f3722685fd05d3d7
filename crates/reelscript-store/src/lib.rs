//! Durable document store for the reelscript backend.
//!
//! Firestore over REST with:
//! - Token caching with refresh margin
//! - HTTP client tuning (pooling sized to worker concurrency, timeouts)
//! - Exponential backoff with jitter
//! - Bounded connection backoff at boot (five attempts, base two seconds)
//! - Typed repositories for scripts, jobs, users, reel analyses, dataset
//!   records, and user memory

pub mod analysis_repo;
pub mod client;
pub mod dataset_repo;
pub mod error;
pub mod job_repo;
pub mod memory_repo;
pub mod metrics;
pub mod retry;
pub mod script_repo;
pub mod token_cache;
pub mod types;
pub mod user_repo;

pub use analysis_repo::AnalysisRepository;
pub use client::{StoreClient, StoreConfig};
pub use dataset_repo::DatasetRepository;
pub use error::{StoreError, StoreResult};
pub use job_repo::{JobRepository, JOB_TTL_DAYS};
pub use memory_repo::MemoryRepository;
pub use retry::{with_retry, RetryConfig};
pub use script_repo::ScriptRepository;
pub use types::{Document, Filter, FromDocValue, StructuredQuery, ToDocValue, Value};
pub use user_repo::UserRepository;
