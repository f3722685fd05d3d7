//! Subscriber access records and per-user memory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Beta access state of a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccessStatus {
    Active,
    #[default]
    Waitlist,
    Blocked,
}

impl AccessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessStatus::Active => "active",
            AccessStatus::Waitlist => "waitlist",
            AccessStatus::Blocked => "blocked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(AccessStatus::Active),
            "waitlist" => Some(AccessStatus::Waitlist),
            "blocked" => Some(AccessStatus::Blocked),
            _ => None,
        }
    }
}

/// A known subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub subscriber_id: String,
    pub access: AccessStatus,

    /// Ordinal registration number, set on admission. Strictly monotonic:
    /// vacated ordinals are never reused.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_number: Option<u64>,

    #[serde(default)]
    pub request_count: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_request_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    pub fn active(subscriber_id: impl Into<String>, registration_number: u64) -> Self {
        Self {
            subscriber_id: subscriber_id.into(),
            access: AccessStatus::Active,
            registration_number: Some(registration_number),
            request_count: 0,
            last_request_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn waitlisted(subscriber_id: impl Into<String>) -> Self {
        Self {
            subscriber_id: subscriber_id.into(),
            access: AccessStatus::Waitlist,
            registration_number: None,
            request_count: 0,
            last_request_at: None,
            created_at: Utc::now(),
        }
    }
}

/// Long-lived per-subscriber preferences learned from usage and feedback.
/// Consulted by the instant-flow default-idea decision tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserMemory {
    pub subscriber_id: String,

    /// Declared or inferred content niche ("fitness", "saas", ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub niche: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_tone: Option<String>,

    #[serde(default)]
    pub positive_feedback_count: u64,

    #[serde(default)]
    pub negative_feedback_count: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}
