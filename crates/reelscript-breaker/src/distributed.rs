//! Best-effort distributed mirror of breaker state.
//!
//! State is mirrored under `circuit:<service>:state` in the ephemeral store
//! so a fleet of instances converges. All operations are best-effort: on a
//! mirror outage the breaker fails open rather than becoming an outage of
//! its own.

use reelscript_queue::{KvStore, QueueResult};

use crate::breaker::BreakerState;

/// Mirrored state lifetime. A dead instance's OPEN marker should not pin
/// the fleet open forever.
const MIRROR_TTL_SECS: u64 = 10 * 60;

/// Writes breaker transitions to the shared store.
#[derive(Clone)]
pub struct BreakerMirror {
    kv: KvStore,
}

impl BreakerMirror {
    pub fn new(kv: KvStore) -> Self {
        Self { kv }
    }

    fn state_key(service: &str) -> String {
        format!("circuit:{}:state", service)
    }

    pub async fn write_state(&self, service: &str, state: BreakerState) -> QueueResult<()> {
        self.kv
            .set_string_ex(&Self::state_key(service), state.as_str(), MIRROR_TTL_SECS)
            .await
    }

    pub async fn read_state(&self, service: &str) -> QueueResult<Option<BreakerState>> {
        Ok(self
            .kv
            .get_string(&Self::state_key(service))
            .await?
            .as_deref()
            .and_then(BreakerState::parse))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_key_matches_layout() {
        assert_eq!(BreakerMirror::state_key("download"), "circuit:download:state");
    }
}
