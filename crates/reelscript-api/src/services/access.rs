//! Access and quota gate.
//!
//! A chain of sub-gates executed in order; the first failure short-circuits.
//! Beta admission and waitlist arithmetic run against the durable store;
//! block flags and quota windows run against the ephemeral store and fail
//! closed when it is unreachable.

use tracing::{info, warn};

use reelscript_models::{AccessStatus, UserRecord};
use reelscript_queue::QuotaStore;
use reelscript_store::UserRepository;

use crate::config::ApiConfig;
use crate::error::{ApiError, ApiResult};

/// A gate's backing store being unreachable denies the request (503).
fn store_unavailable(e: reelscript_store::StoreError) -> ApiError {
    ApiError::unavailable(format!("user store unreachable: {}", e))
}

/// Outcome of a successful pass through the gate chain.
#[derive(Debug, Clone)]
pub enum GateOutcome {
    /// Subscriber is admitted; quota headroom is attached for headers.
    Admitted {
        user: UserRecord,
        quota_remaining: u64,
        quota_reset_secs: u64,
    },
    /// Subscriber is (still) waitlisted at this position.
    Waitlisted { position: u64 },
}

/// The gate chain: beta admission, block flag, per-subscriber quota.
/// (The per-IP limiter runs earlier, as middleware.)
#[derive(Clone)]
pub struct AccessGate {
    users: UserRepository,
    quota: QuotaStore,
}

impl AccessGate {
    pub fn new(users: UserRepository, quota: QuotaStore) -> Self {
        Self { users, quota }
    }

    pub async fn check(&self, subscriber_id: &str, config: &ApiConfig) -> ApiResult<GateOutcome> {
        // Gate 1: beta admission.
        let user = match self.users.get(subscriber_id).await.map_err(store_unavailable)? {
            None => return self.admit_new(subscriber_id, config).await,
            Some(user) => user,
        };

        let user = match user.access {
            AccessStatus::Blocked => {
                return Err(ApiError::access_denied("Your access has been suspended."));
            }
            AccessStatus::Waitlist => match self.try_promote(&user, config).await? {
                Some(promoted) => promoted,
                None => {
                    let position = self
                        .users
                        .waitlist_position(user.created_at)
                        .await
                        .map_err(store_unavailable)?;
                    return Ok(GateOutcome::Waitlisted { position });
                }
            },
            AccessStatus::Active => user,
        };

        // Gate 2: short-term ephemeral block flag. Fail closed: an
        // unreachable flag store must not admit anyone.
        let blocked = self
            .quota
            .is_blocked(subscriber_id)
            .await
            .map_err(|e| ApiError::unavailable(format!("block-flag store unreachable: {}", e)))?;
        if blocked {
            return Err(ApiError::access_denied("You are temporarily blocked."));
        }

        // Gate 3: per-subscriber quota window. Also fail-closed: the quota
        // is an abuse control.
        let decision = self
            .quota
            .check_and_count(
                subscriber_id,
                config.user_rate_limit,
                config.user_rate_window.as_secs(),
            )
            .await
            .map_err(|e| ApiError::unavailable(format!("quota store unreachable: {}", e)))?;

        if !decision.allowed {
            warn!(subscriber_id, "Per-subscriber quota exceeded");
            return Err(ApiError::QuotaExceeded {
                retry_after_secs: decision.reset_secs,
            });
        }

        // Best-effort bookkeeping; never fails the request.
        let request_count = user.request_count + 1;
        if let Err(e) = self.users.record_request(subscriber_id, request_count).await {
            warn!(subscriber_id, "Failed to record request count: {}", e);
        }

        Ok(GateOutcome::Admitted {
            user,
            quota_remaining: decision.remaining,
            quota_reset_secs: decision.reset_secs,
        })
    }

    /// First contact: admit if a slot exists, else append to the waitlist.
    async fn admit_new(&self, subscriber_id: &str, config: &ApiConfig) -> ApiResult<GateOutcome> {
        let active = self.users.count_active().await.map_err(store_unavailable)?;
        if active < config.beta_capacity {
            let ordinal = self.users.max_registration_number().await.map_err(store_unavailable)? + 1;
            let user = UserRecord::active(subscriber_id, ordinal);
            self.users.insert(&user).await.map_err(store_unavailable)?;
            info!(subscriber_id, ordinal, "Admitted new beta user");

            let decision = self
                .quota
                .check_and_count(
                    subscriber_id,
                    config.user_rate_limit,
                    config.user_rate_window.as_secs(),
                )
                .await
                .map_err(|e| ApiError::unavailable(format!("quota store unreachable: {}", e)))?;

            return Ok(GateOutcome::Admitted {
                user,
                quota_remaining: decision.remaining,
                quota_reset_secs: decision.reset_secs,
            });
        }

        let user = UserRecord::waitlisted(subscriber_id);
        self.users.insert(&user).await.map_err(store_unavailable)?;
        let position = self
            .users
            .waitlist_position(user.created_at)
            .await
            .map_err(store_unavailable)?;
        info!(subscriber_id, position, "Waitlisted new user (beta full)");
        Ok(GateOutcome::Waitlisted { position })
    }

    /// Opportunistic promotion: recompute the active count and take a free
    /// slot if one opened. Strictly oldest-first; a younger user only moves
    /// when it is actually their turn.
    async fn try_promote(
        &self,
        user: &UserRecord,
        config: &ApiConfig,
    ) -> ApiResult<Option<UserRecord>> {
        let active = self.users.count_active().await.map_err(store_unavailable)?;
        if active >= config.beta_capacity {
            return Ok(None);
        }

        let oldest = self.users.oldest_waitlisted().await.map_err(store_unavailable)?;
        let is_next = oldest
            .as_ref()
            .map(|o| o.subscriber_id == user.subscriber_id)
            .unwrap_or(false);
        if !is_next {
            return Ok(None);
        }

        let ordinal = self.users.max_registration_number().await.map_err(store_unavailable)? + 1;
        if self.users.promote(&user.subscriber_id, ordinal).await.map_err(store_unavailable)? {
            info!(subscriber_id = %user.subscriber_id, ordinal, "Promoted from waitlist");
            let mut promoted = user.clone();
            promoted.access = AccessStatus::Active;
            promoted.registration_number = Some(ordinal);
            Ok(Some(promoted))
        } else {
            // Another instance won the race; stay waitlisted this request.
            Ok(None)
        }
    }
}
