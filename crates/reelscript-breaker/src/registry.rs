//! Registry of named circuit breakers.
//!
//! Hands out one breaker per external service, fans state transitions out
//! on a broadcast topic for telemetry, and forwards them to the optional
//! distributed mirror.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::breaker::{BreakerConfig, BreakerState, CircuitBreaker, CircuitOpen, Transition};
use crate::distributed::BreakerMirror;

/// Service names with dedicated circuits.
pub mod services {
    pub const DOWNLOAD: &str = "download";
    pub const ANALYSIS: &str = "analysis";
    pub const GENERATION: &str = "generation";
    pub const UPLOAD: &str = "upload";
    pub const MESSAGING: &str = "messaging";

    pub const ALL: &[&str] = &[DOWNLOAD, ANALYSIS, GENERATION, UPLOAD, MESSAGING];
}

/// A breaker state change, published for telemetry.
#[derive(Debug, Clone)]
pub struct BreakerEvent {
    pub service: String,
    pub from: BreakerState,
    pub to: BreakerState,
}

/// Registry of per-service breakers.
pub struct BreakerRegistry {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    default_config: BreakerConfig,
    overrides: HashMap<String, BreakerConfig>,
    events: broadcast::Sender<BreakerEvent>,
    mirror: Option<BreakerMirror>,
}

impl BreakerRegistry {
    pub fn new(default_config: BreakerConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            breakers: RwLock::new(HashMap::new()),
            default_config,
            overrides: HashMap::new(),
            events,
            mirror: None,
        }
    }

    /// Registry with the stock per-service tuning: the downloader trips
    /// faster (external site throttling shows up as bursts), the generator
    /// gets a longer reset because quota windows are per-minute.
    pub fn with_default_services() -> Self {
        let mut registry = Self::new(BreakerConfig::default());
        registry.overrides.insert(
            services::DOWNLOAD.to_string(),
            BreakerConfig {
                failure_threshold: 3,
                reset_timeout: Duration::from_secs(120),
                ..BreakerConfig::default()
            },
        );
        registry.overrides.insert(
            services::GENERATION.to_string(),
            BreakerConfig {
                reset_timeout: Duration::from_secs(90),
                ..BreakerConfig::default()
            },
        );
        registry
    }

    /// Attach a best-effort distributed mirror.
    pub fn with_mirror(mut self, mirror: BreakerMirror) -> Self {
        self.mirror = Some(mirror);
        self
    }

    /// Subscribe to breaker transitions (telemetry).
    pub fn subscribe(&self) -> broadcast::Receiver<BreakerEvent> {
        self.events.subscribe()
    }

    /// Get (or create) the breaker for a service.
    pub fn get(&self, service: &str) -> Arc<CircuitBreaker> {
        {
            let breakers = self.breakers.read().unwrap_or_else(|p| p.into_inner());
            if let Some(b) = breakers.get(service) {
                return Arc::clone(b);
            }
        }

        let mut breakers = self.breakers.write().unwrap_or_else(|p| p.into_inner());
        if let Some(b) = breakers.get(service) {
            return Arc::clone(b);
        }

        let config = self
            .overrides
            .get(service)
            .cloned()
            .unwrap_or_else(|| self.default_config.clone());
        let breaker = Arc::new(CircuitBreaker::new(service, config));
        breakers.insert(service.to_string(), Arc::clone(&breaker));
        debug!(service, "Created circuit breaker");
        breaker
    }

    /// Run a call under the named breaker, publishing any transition.
    pub async fn call<T, E, F>(&self, service: &str, fut: F) -> Result<Result<T, E>, CircuitOpen>
    where
        F: std::future::Future<Output = Result<T, E>>,
    {
        let breaker = self.get(service);
        let (result, transition) = breaker.call(fut).await.map_err(|denial| {
            debug!(service, retry_after_ms = denial.retry_after_ms, "Circuit open, denied");
            denial
        })?;

        if let Some(t) = transition {
            self.publish(service, t).await;
        }
        Ok(result)
    }

    /// Current state of every known service (breaker-state gauges).
    pub fn states(&self) -> Vec<(String, BreakerState)> {
        let breakers = self.breakers.read().unwrap_or_else(|p| p.into_inner());
        let mut states: Vec<(String, BreakerState)> = breakers
            .iter()
            .map(|(name, b)| (name.clone(), b.state()))
            .collect();
        // Services with no traffic yet still report CLOSED.
        for service in services::ALL {
            if !breakers.contains_key(*service) {
                states.push((service.to_string(), BreakerState::Closed));
            }
        }
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }

    /// Adopt OPEN states another instance has mirrored, so a fleet converges
    /// without waiting for local failures. Mirror errors are swallowed: the
    /// local view wins.
    pub async fn hydrate_from_mirror(&self) {
        let Some(mirror) = &self.mirror else { return };
        for service in services::ALL {
            match mirror.read_state(service).await {
                Ok(Some(BreakerState::Open)) => {
                    let breaker = self.get(service);
                    if let Some(t) = breaker.force_open() {
                        info!(service, "Adopted open breaker state from mirror");
                        let _ = self.events.send(BreakerEvent {
                            service: service.to_string(),
                            from: t.from,
                            to: t.to,
                        });
                    }
                }
                Ok(_) => {}
                Err(e) => debug!(service, "Breaker mirror read failed (ignored): {}", e),
            }
        }
    }

    async fn publish(&self, service: &str, transition: Transition) {
        info!(
            service,
            from = transition.from.as_str(),
            to = transition.to.as_str(),
            "Circuit breaker transition"
        );
        let _ = self.events.send(BreakerEvent {
            service: service.to_string(),
            from: transition.from,
            to: transition.to,
        });

        // Best-effort mirror write; the breaker must never be the reason a
        // request fails.
        if let Some(mirror) = &self.mirror {
            if let Err(e) = mirror.write_state(service, transition.to).await {
                debug!(service, "Breaker mirror write failed (ignored): {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_registry_hands_out_one_breaker_per_service() {
        let registry = BreakerRegistry::with_default_services();
        let a = registry.get(services::DOWNLOAD);
        let b = registry.get(services::DOWNLOAD);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_call_publishes_open_transition() {
        let registry = BreakerRegistry::new(BreakerConfig {
            failure_threshold: 1,
            ..BreakerConfig::default()
        });
        let mut events = registry.subscribe();

        let _ = registry
            .call(services::UPLOAD, async { Err::<(), _>("boom") })
            .await;

        let event = events.try_recv().unwrap();
        assert_eq!(event.service, services::UPLOAD);
        assert_eq!(event.to, BreakerState::Open);
    }

    #[tokio::test]
    async fn test_states_cover_all_services() {
        let registry = BreakerRegistry::with_default_services();
        let states = registry.states();
        for service in services::ALL {
            assert!(states.iter().any(|(name, _)| name == service));
        }
    }
}
