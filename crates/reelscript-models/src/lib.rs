//! Shared data models for the reelscript backend.
//!
//! This crate provides Serde-serializable types and pure domain logic:
//! - Durable records: scripts, jobs, users, reel analyses, dataset rows
//! - Ephemeral records: session context
//! - URL canonicalization and the tier-1/tier-2 cache keys
//! - Intent classification of inbound messages
//! - Script section parsing, copy-mode allocation, and the fallback script

pub mod analysis;
pub mod canonical;
pub mod dataset;
pub mod intent;
pub mod job;
pub mod script;
pub mod sections;
pub mod session;
pub mod user;

// Re-export common types
pub use analysis::{AnalysisMode, ReelAnalysis, ANALYSIS_TTL_DAYS};
pub use canonical::{
    canonicalize_url, is_supported_reel_url, normalize_idea, reel_hash, request_hash, ScriptMode,
    SUPPORTED_HOSTS,
};
pub use dataset::{
    DatasetRecord, DerivedFeatures, FeedbackEvent, SectionFeedback, VideoPerformance,
};
pub use intent::{
    extract_url, parse_message, parse_with_url, FeedbackPolarity, Intensity, IntentType,
    ParsedIntent, Tone,
};
pub use job::{JobId, JobRecord, JobStatus};
pub use script::{PublicId, ScriptRecord};
pub use sections::{
    allocate_transcript, copy_mode_script, fallback_script, split_sentences, ScriptSections,
};
pub use session::{SessionContext, SessionState, SESSION_TTL_SECS, VARIATION_TTL_SECS};
pub use user::{AccessStatus, UserMemory, UserRecord};
