/// Status reporting: the supervisor's JSON status file, and a readable view
/// of the health marker for operators.
///
/// The status file uses an atomic write pattern: write to temp file then rename.
use crate::probe::{LivenessProbe, ProbeReport};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Supervisor states written to the status file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    Starting,
    Healthy,
    Unhealthy,
    Failed,
}

/// The JSON payload written to `supervisor.status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusData {
    pub pid: u32,
    pub state: SupervisorState,
    pub consecutive_failures: u32,
    pub restarts: u32,
    pub started_at: DateTime<Utc>,
    pub last_check: Option<DateTime<Utc>>,
    pub last_reason: Option<String>,
    pub last_update: DateTime<Utc>,
}

/// Manages the status file lifecycle.
pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    /// Create a new StatusFile writer for the given path.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Atomically write status data to the status file.
    ///
    /// Writes to a temporary file in the same directory, then renames
    /// to ensure readers never see a partial write.
    pub fn write(&self, data: &StatusData) -> Result<(), StatusError> {
        let json =
            serde_json::to_string_pretty(data).map_err(|e| StatusError::Serialize { source: e })?;

        let dir = self.path.parent().unwrap_or(Path::new("."));
        let tmp_path = dir.join(format!(".supervisor.status.tmp.{}", std::process::id()));

        std::fs::write(&tmp_path, json.as_bytes()).map_err(|e| StatusError::Write {
            path: tmp_path.clone(),
            source: e,
        })?;

        std::fs::rename(&tmp_path, &self.path).map_err(|e| StatusError::Rename {
            from: tmp_path,
            to: self.path.clone(),
            source: e,
        })?;

        Ok(())
    }

    /// Remove the status file (on clean shutdown).
    pub fn remove(&self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Mutable state tracker that builds StatusData for each update.
pub struct StatusTracker {
    file: StatusFile,
    pid: u32,
    consecutive_failures: u32,
    restarts: u32,
    started_at: DateTime<Utc>,
    last_check: Option<DateTime<Utc>>,
    last_reason: Option<String>,
}

impl StatusTracker {
    /// Create a new tracker.
    pub fn new(status_path: PathBuf) -> Self {
        Self {
            file: StatusFile::new(status_path),
            pid: std::process::id(),
            consecutive_failures: 0,
            restarts: 0,
            started_at: Utc::now(),
            last_check: None,
            last_reason: None,
        }
    }

    /// Update and write the status file with the given state.
    pub fn update(&self, state: SupervisorState) {
        let data = StatusData {
            pid: self.pid,
            state,
            consecutive_failures: self.consecutive_failures,
            restarts: self.restarts,
            started_at: self.started_at,
            last_check: self.last_check,
            last_reason: self.last_reason.clone(),
            last_update: Utc::now(),
        };

        if let Err(e) = self.file.write(&data) {
            tracing::warn!(error = %e, "failed to write status file");
        }
    }

    /// Record a completed probe.
    pub fn record_check(&mut self, report: &ProbeReport, consecutive_failures: u32) {
        self.last_check = Some(Utc::now());
        self.last_reason = Some(report.to_string());
        self.consecutive_failures = consecutive_failures;
    }

    /// Record a restart of the supervised target.
    pub fn record_restart(&mut self) {
        self.restarts += 1;
        self.consecutive_failures = 0;
        self.started_at = Utc::now();
    }

    /// Remove the status file.
    pub fn remove(&self) {
        self.file.remove();
    }
}

/// Operator-facing snapshot of the health marker.
#[derive(Debug, Clone, Serialize)]
pub struct MarkerStatus {
    pub path: PathBuf,
    /// Timestamp read from the marker, when it could be parsed.
    pub timestamp: Option<i64>,
    pub healthy: bool,
    pub age_secs: Option<i64>,
    pub threshold_secs: u64,
    pub detail: String,
}

impl MarkerStatus {
    /// Probe the marker once and capture the result.
    pub fn collect(probe: &LivenessProbe, now: i64) -> Self {
        let report = probe.check_at(now);
        let age_secs = report.age_secs();
        Self {
            path: probe.marker().to_path_buf(),
            timestamp: age_secs.map(|age| now.saturating_sub(age)),
            healthy: report.outcome().is_healthy(),
            age_secs,
            threshold_secs: probe.staleness_threshold().as_secs(),
            detail: report.to_string(),
        }
    }

    /// One-line summary, e.g. "healthy, last heartbeat 12 seconds ago".
    pub fn describe(&self) -> String {
        let verdict = if self.healthy { "healthy" } else { "unhealthy" };
        match self.age_secs {
            Some(age) if age >= 0 => format!(
                "{verdict}, last heartbeat {age} seconds ago ({})",
                format_duration(age.unsigned_abs())
            ),
            _ => format!("{verdict} ({})", self.detail),
        }
    }
}

/// Compact duration: `1d 2h 3m`, `2h 3m 4s`, or `3m 4s`.
pub fn format_duration(secs: u64) -> String {
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3_600;
    let minutes = (secs % 3_600) / 60;
    let seconds = secs % 60;

    if days > 0 {
        format!("{days}d {hours}h {minutes}m")
    } else if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else {
        format!("{minutes}m {seconds}s")
    }
}

/// Errors from status file operations.
#[derive(Debug)]
pub enum StatusError {
    Serialize {
        source: serde_json::Error,
    },
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for StatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusError::Serialize { source } => write!(f, "failed to serialize status: {source}"),
            StatusError::Write { path, source } => {
                write!(
                    f,
                    "failed to write temp status file {}: {source}",
                    path.display()
                )
            }
            StatusError::Rename { from, to, source } => {
                write!(
                    f,
                    "failed to rename {} -> {}: {source}",
                    from.display(),
                    to.display()
                )
            }
        }
    }
}

impl std::error::Error for StatusError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StatusError::Serialize { source } => Some(source),
            StatusError::Write { source, .. } => Some(source),
            StatusError::Rename { source, .. } => Some(source),
        }
    }
}
