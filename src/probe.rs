//! Liveness probe: decide whether the monitored process is alive from the
//! age of its health marker.
//!
//! The probe is a pure observer. It reads the marker once, compares the stored
//! timestamp with the wall clock, and never writes, creates, or removes
//! anything. Every failure mode collapses into an unhealthy report so the
//! caller always gets a definite answer.

use crate::marker::{read_marker, MarkerError};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Binary result consumed by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Healthy,
    Unhealthy,
}

impl ProbeOutcome {
    /// Process exit status for this outcome: 0 healthy, 1 unhealthy.
    pub fn exit_code(self) -> i32 {
        match self {
            ProbeOutcome::Healthy => 0,
            ProbeOutcome::Unhealthy => 1,
        }
    }

    pub fn is_healthy(self) -> bool {
        self == ProbeOutcome::Healthy
    }
}

/// Why a probe reported unhealthy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnhealthyReason {
    /// The marker has not been written yet, or was removed.
    Missing,
    /// The marker exists but reading it failed.
    Unreadable { error: String },
    /// The marker does not hold an integer timestamp.
    Malformed,
    /// The last heartbeat is at least the staleness threshold old.
    Stale { age_secs: i64 },
    /// The marker is from the future.
    ClockSkew { age_secs: i64 },
    /// The probe did not finish within its time budget.
    TimedOut,
    /// The probe faulted while running.
    Panicked,
}

impl std::fmt::Display for UnhealthyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnhealthyReason::Missing => write!(f, "health marker missing"),
            UnhealthyReason::Unreadable { error } => {
                write!(f, "health marker unreadable: {error}")
            }
            UnhealthyReason::Malformed => write!(f, "health marker is not a timestamp"),
            UnhealthyReason::Stale { age_secs } => {
                write!(f, "last heartbeat {age_secs}s ago is stale")
            }
            UnhealthyReason::ClockSkew { age_secs } => {
                write!(f, "heartbeat is {}s in the future", age_secs.unsigned_abs())
            }
            UnhealthyReason::TimedOut => write!(f, "probe timed out"),
            UnhealthyReason::Panicked => write!(f, "probe failed unexpectedly"),
        }
    }
}

/// Result of a single probe invocation. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeReport {
    Healthy { age_secs: i64 },
    Unhealthy { reason: UnhealthyReason },
}

impl ProbeReport {
    pub fn unhealthy(reason: UnhealthyReason) -> Self {
        ProbeReport::Unhealthy { reason }
    }

    pub fn outcome(&self) -> ProbeOutcome {
        match self {
            ProbeReport::Healthy { .. } => ProbeOutcome::Healthy,
            ProbeReport::Unhealthy { .. } => ProbeOutcome::Unhealthy,
        }
    }

    /// Marker age, when one could be computed.
    pub fn age_secs(&self) -> Option<i64> {
        match self {
            ProbeReport::Healthy { age_secs } => Some(*age_secs),
            ProbeReport::Unhealthy {
                reason:
                    UnhealthyReason::Stale { age_secs } | UnhealthyReason::ClockSkew { age_secs },
            } => Some(*age_secs),
            ProbeReport::Unhealthy { .. } => None,
        }
    }
}

impl std::fmt::Display for ProbeReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeReport::Healthy { age_secs } => {
                write!(f, "healthy: last heartbeat {age_secs}s ago")
            }
            ProbeReport::Unhealthy { reason } => write!(f, "unhealthy: {reason}"),
        }
    }
}

/// A synchronous, side-effect-free health check.
pub trait Probe: Send + Sync + 'static {
    fn check(&self) -> ProbeReport;
}

/// Freshness check against the health marker.
#[derive(Debug, Clone)]
pub struct LivenessProbe {
    marker: PathBuf,
    staleness_threshold: Duration,
}

impl LivenessProbe {
    pub fn new(marker: impl Into<PathBuf>, staleness_threshold: Duration) -> Self {
        Self {
            marker: marker.into(),
            staleness_threshold,
        }
    }

    pub fn marker(&self) -> &Path {
        &self.marker
    }

    pub fn staleness_threshold(&self) -> Duration {
        self.staleness_threshold
    }

    /// Evaluate the marker against `now` (Unix seconds).
    ///
    /// Healthy iff `0 <= now - timestamp < threshold`.
    pub fn check_at(&self, now: i64) -> ProbeReport {
        let timestamp = match read_marker(&self.marker) {
            Ok(ts) => ts,
            Err(e) => {
                tracing::debug!(error = %e, "health marker check failed");
                return ProbeReport::unhealthy(reason_for(e));
            }
        };

        let age_secs = now.saturating_sub(timestamp);
        let threshold = i64::try_from(self.staleness_threshold.as_secs()).unwrap_or(i64::MAX);

        if age_secs < 0 {
            ProbeReport::unhealthy(UnhealthyReason::ClockSkew { age_secs })
        } else if age_secs < threshold {
            ProbeReport::Healthy { age_secs }
        } else {
            ProbeReport::unhealthy(UnhealthyReason::Stale { age_secs })
        }
    }
}

impl Probe for LivenessProbe {
    fn check(&self) -> ProbeReport {
        self.check_at(chrono::Utc::now().timestamp())
    }
}

fn reason_for(err: MarkerError) -> UnhealthyReason {
    match err {
        MarkerError::Missing { .. } => UnhealthyReason::Missing,
        MarkerError::Malformed { .. } => UnhealthyReason::Malformed,
        MarkerError::Read { source, .. } | MarkerError::Write { source, .. } => {
            UnhealthyReason::Unreadable {
                error: source.to_string(),
            }
        }
    }
}

/// Run `probe`, converting a panic into an unhealthy report.
pub fn run_guarded<P: Probe + ?Sized>(probe: &P) -> ProbeReport {
    match std::panic::catch_unwind(AssertUnwindSafe(|| probe.check())) {
        Ok(report) => report,
        Err(_) => {
            tracing::error!("probe panicked, reporting unhealthy");
            ProbeReport::unhealthy(UnhealthyReason::Panicked)
        }
    }
}
