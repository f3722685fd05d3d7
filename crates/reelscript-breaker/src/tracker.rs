//! Failure-log suppression for continuously retrying background loops.
//!
//! A gauge refresher or heartbeat that fails every tick would otherwise
//! emit the same warning forever. The tracker counts consecutive failures,
//! allows the first few through, announces the suppression once, and logs
//! the recovery when the loop comes back.

use tracing::{debug, warn};

/// State tracker for repeated operations that may fail intermittently.
#[derive(Debug, Default)]
pub struct FailureTracker {
    consecutive_failures: u32,
    max_logged_failures: u32,
    suppressed: bool,
}

impl FailureTracker {
    /// Create a new failure tracker that logs at most `max_logged_failures`
    /// consecutive failures before going quiet.
    pub fn new(max_logged_failures: u32) -> Self {
        Self {
            consecutive_failures: 0,
            max_logged_failures,
            suppressed: false,
        }
    }

    /// Record a successful operation (resets the failure count).
    pub fn record_success(&mut self) {
        if self.consecutive_failures > 0 && self.suppressed {
            debug!(
                "Operation recovered after {} consecutive failures",
                self.consecutive_failures
            );
        }
        self.consecutive_failures = 0;
        self.suppressed = false;
    }

    /// Record a failed operation.
    ///
    /// Returns `true` if this failure should be logged (not suppressed).
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures += 1;

        if self.consecutive_failures <= self.max_logged_failures {
            true
        } else if self.consecutive_failures == self.max_logged_failures + 1 {
            self.suppressed = true;
            warn!(
                "Suppressing further failure logs after {} consecutive failures",
                self.max_logged_failures
            );
            false
        } else {
            false
        }
    }

    /// Current consecutive failure count.
    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suppression_after_threshold() {
        let mut tracker = FailureTracker::new(3);

        assert!(tracker.record_failure());
        assert!(tracker.record_failure());
        assert!(tracker.record_failure());

        // Fourth failure emits the suppression notice and returns false.
        assert!(!tracker.record_failure());

        // Subsequent failures stay quiet.
        assert!(!tracker.record_failure());
        assert!(!tracker.record_failure());
    }

    #[test]
    fn test_success_resets_logging() {
        let mut tracker = FailureTracker::new(2);
        tracker.record_failure();
        tracker.record_failure();
        assert!(!tracker.record_failure());

        tracker.record_success();
        assert_eq!(tracker.failure_count(), 0);
        assert!(tracker.record_failure());
    }
}
