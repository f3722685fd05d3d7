//! Per-service circuit breaker state machine.
//!
//! CLOSED allows traffic and counts consecutive failures inside a rolling
//! window; OPEN fails fast with the time until the next probe; HALF_OPEN
//! lets probes through and closes after enough successes. State reads are
//! process-local and lock-cheap.

use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Typed denial carrying the time until the breaker will probe again.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("circuit '{service}' is open, retry in {retry_after_ms}ms")]
pub struct CircuitOpen {
    pub service: String,
    pub retry_after_ms: u64,
}

/// Per-service breaker configuration.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures within the window that trip the breaker.
    pub failure_threshold: u32,
    /// How long an open breaker waits before probing.
    pub reset_timeout: Duration,
    /// Successes required in HALF_OPEN before closing.
    pub success_threshold: u32,
    /// Failures further apart than this do not count as consecutive.
    pub failure_window: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            success_threshold: 3,
            failure_window: Duration::from_secs(120),
        }
    }
}

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    HalfOpen,
    Open,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::HalfOpen => "half_open",
            BreakerState::Open => "open",
        }
    }

    /// Gauge encoding: CLOSED=0, HALF_OPEN=1, OPEN=2.
    pub fn as_gauge(&self) -> f64 {
        match self {
            BreakerState::Closed => 0.0,
            BreakerState::HalfOpen => 1.0,
            BreakerState::Open => 2.0,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "closed" => Some(BreakerState::Closed),
            "half_open" => Some(BreakerState::HalfOpen),
            "open" => Some(BreakerState::Open),
            _ => None,
        }
    }
}

#[derive(Debug)]
enum Inner {
    Closed {
        failure_count: u32,
        last_failure_at: Option<Instant>,
    },
    Open {
        opened_at: Instant,
    },
    HalfOpen {
        success_count: u32,
    },
}

/// A state transition, reported to the registry for events and mirroring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: BreakerState,
    pub to: BreakerState,
}

/// Circuit breaker for one named service.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner::Closed {
                failure_count: 0,
                last_failure_at: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask to proceed. OPEN denies with the remaining backoff; an OPEN
    /// breaker whose reset timeout has elapsed moves to HALF_OPEN and allows
    /// the probe through.
    pub fn try_acquire(&self) -> Result<Option<Transition>, CircuitOpen> {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        match *inner {
            Inner::Closed { .. } | Inner::HalfOpen { .. } => Ok(None),
            Inner::Open { opened_at } => {
                let elapsed = opened_at.elapsed();
                if elapsed >= self.config.reset_timeout {
                    *inner = Inner::HalfOpen { success_count: 0 };
                    Ok(Some(Transition {
                        from: BreakerState::Open,
                        to: BreakerState::HalfOpen,
                    }))
                } else {
                    let remaining = self.config.reset_timeout - elapsed;
                    Err(CircuitOpen {
                        service: self.name.clone(),
                        retry_after_ms: remaining.as_millis() as u64,
                    })
                }
            }
        }
    }

    /// Record a success. In HALF_OPEN enough successes close the breaker;
    /// in CLOSED the failure streak resets.
    pub fn record_success(&self) -> Option<Transition> {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        match *inner {
            Inner::Closed { .. } => {
                *inner = Inner::Closed {
                    failure_count: 0,
                    last_failure_at: None,
                };
                None
            }
            Inner::HalfOpen { success_count } => {
                let new_count = success_count + 1;
                if new_count >= self.config.success_threshold {
                    *inner = Inner::Closed {
                        failure_count: 0,
                        last_failure_at: None,
                    };
                    Some(Transition {
                        from: BreakerState::HalfOpen,
                        to: BreakerState::Closed,
                    })
                } else {
                    *inner = Inner::HalfOpen { success_count: new_count };
                    None
                }
            }
            Inner::Open { .. } => None,
        }
    }

    /// Record a failure. A HALF_OPEN probe failure reopens immediately; in
    /// CLOSED, consecutive failures inside the window trip the breaker.
    pub fn record_failure(&self) -> Option<Transition> {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        match *inner {
            Inner::Closed {
                failure_count,
                last_failure_at,
            } => {
                let now = Instant::now();
                let streak_alive = last_failure_at
                    .map(|t| now.duration_since(t) <= self.config.failure_window)
                    .unwrap_or(false);
                let new_count = if streak_alive { failure_count + 1 } else { 1 };

                if new_count >= self.config.failure_threshold {
                    *inner = Inner::Open { opened_at: now };
                    Some(Transition {
                        from: BreakerState::Closed,
                        to: BreakerState::Open,
                    })
                } else {
                    *inner = Inner::Closed {
                        failure_count: new_count,
                        last_failure_at: Some(now),
                    };
                    None
                }
            }
            Inner::HalfOpen { .. } => {
                *inner = Inner::Open { opened_at: Instant::now() };
                Some(Transition {
                    from: BreakerState::HalfOpen,
                    to: BreakerState::Open,
                })
            }
            Inner::Open { .. } => None,
        }
    }

    /// Force the breaker open (used when hydrating from the mirror).
    pub fn force_open(&self) -> Option<Transition> {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let from = state_of(&inner);
        if from == BreakerState::Open {
            return None;
        }
        *inner = Inner::Open { opened_at: Instant::now() };
        Some(Transition {
            from,
            to: BreakerState::Open,
        })
    }

    pub fn state(&self) -> BreakerState {
        let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        state_of(&inner)
    }

    /// Run `fut` under the breaker. `Err(CircuitOpen)` when denied;
    /// otherwise the inner result with success/failure recorded. Returned
    /// transitions have already been applied; the registry wrapper forwards
    /// them to events and the mirror.
    pub async fn call<T, E, F>(
        &self,
        fut: F,
    ) -> Result<(Result<T, E>, Option<Transition>), CircuitOpen>
    where
        F: Future<Output = Result<T, E>>,
    {
        let acquire_transition = self.try_acquire()?;
        let result = fut.await;
        let outcome_transition = match &result {
            Ok(_) => self.record_success(),
            Err(_) => self.record_failure(),
        };
        Ok((result, outcome_transition.or(acquire_transition)))
    }
}

fn state_of(inner: &Inner) -> BreakerState {
    match inner {
        Inner::Closed { .. } => BreakerState::Closed,
        Inner::HalfOpen { .. } => BreakerState::HalfOpen,
        Inner::Open { .. } => BreakerState::Open,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 3,
            reset_timeout: Duration::from_millis(50),
            success_threshold: 2,
            failure_window: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_opens_after_threshold_consecutive_failures() {
        let breaker = CircuitBreaker::new("download", quick_config());
        assert!(breaker.record_failure().is_none());
        assert!(breaker.record_failure().is_none());
        let transition = breaker.record_failure().unwrap();
        assert_eq!(transition.to, BreakerState::Open);
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn test_success_resets_streak() {
        let breaker = CircuitBreaker::new("download", quick_config());
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn test_open_denies_with_retry_hint() {
        let breaker = CircuitBreaker::new("generation", quick_config());
        for _ in 0..3 {
            breaker.record_failure();
        }
        let denial = breaker.try_acquire().unwrap_err();
        assert_eq!(denial.service, "generation");
        assert!(denial.retry_after_ms <= 50);
    }

    #[test]
    fn test_open_transitions_to_half_open_after_reset() {
        let breaker = CircuitBreaker::new("upload", quick_config());
        for _ in 0..3 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(60));
        let transition = breaker.try_acquire().unwrap().unwrap();
        assert_eq!(transition.to, BreakerState::HalfOpen);
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("messaging", quick_config());
        for _ in 0..3 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(60));
        breaker.try_acquire().unwrap();
        let transition = breaker.record_failure().unwrap();
        assert_eq!(transition.to, BreakerState::Open);
    }

    #[test]
    fn test_half_open_closes_after_success_threshold() {
        let breaker = CircuitBreaker::new("analysis", quick_config());
        for _ in 0..3 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(60));
        breaker.try_acquire().unwrap();
        assert!(breaker.record_success().is_none());
        let transition = breaker.record_success().unwrap();
        assert_eq!(transition.to, BreakerState::Closed);
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn test_stale_failures_do_not_accumulate() {
        let config = BreakerConfig {
            failure_window: Duration::from_millis(20),
            ..quick_config()
        };
        let breaker = CircuitBreaker::new("download", config);
        breaker.record_failure();
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(30));
        // Streak expired: this failure restarts the count at one.
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_call_records_outcome() {
        let breaker = CircuitBreaker::new("generation", quick_config());
        let (result, _) = breaker.call(async { Ok::<_, String>(7) }).await.unwrap();
        assert_eq!(result.unwrap(), 7);

        for _ in 0..3 {
            let _ = breaker.call(async { Err::<(), _>("boom") }).await;
        }
        assert!(breaker.call(async { Ok::<_, String>(1) }).await.is_err());
    }
}
