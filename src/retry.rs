use crate::probe::ProbeOutcome;
use tracing::warn;

/// Decision returned by the retry policy after each probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Probe passed; the failure streak is cleared.
    Healthy,
    /// Probe failed inside the start period and does not count.
    Ignored,
    /// Probe failed; keep probing (includes the current streak length).
    Retry { failures: u32 },
    /// Streak reached the configured retries; the target must be restarted.
    Restart { failures: u32 },
}

/// Consecutive-failure policy.
///
/// Counts unhealthy probes in a row and asks for a restart once `retries`
/// of them have accumulated. Failures during the start period do not count
/// until the first success; from then on the target counts as started and
/// every failure is counted, as a container runtime does.
pub struct RetryPolicy {
    retries: u32,
    consecutive_failures: u32,
    started: bool,
}

impl RetryPolicy {
    /// Create a new policy. A `retries` of 0 is treated as 1.
    pub fn new(retries: u32) -> Self {
        Self {
            retries: retries.max(1),
            consecutive_failures: 0,
            started: false,
        }
    }

    /// Feed one probe outcome and decide what to do next.
    pub fn evaluate(&mut self, outcome: ProbeOutcome, in_start_period: bool) -> RetryDecision {
        if outcome.is_healthy() {
            self.consecutive_failures = 0;
            self.started = true;
            return RetryDecision::Healthy;
        }

        if in_start_period && !self.started {
            return RetryDecision::Ignored;
        }

        self.consecutive_failures += 1;

        if self.consecutive_failures < self.retries {
            warn!(
                failures = self.consecutive_failures,
                retries = self.retries,
                "health check failed"
            );
            RetryDecision::Retry {
                failures: self.consecutive_failures,
            }
        } else {
            warn!(
                failures = self.consecutive_failures,
                retries = self.retries,
                "health check failures reached threshold, restart required"
            );
            RetryDecision::Restart {
                failures: self.consecutive_failures,
            }
        }
    }

    /// Reset after a restart: the streak clears and a new start period begins.
    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
        self.started = false;
    }

    /// Current streak of counted failures.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}
