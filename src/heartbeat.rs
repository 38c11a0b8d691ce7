/// Heartbeat writer: the monitored-process side of the liveness contract.
///
/// Refreshes the health marker with the current time on a fixed interval.
/// The interval must stay strictly below the probe's staleness threshold or
/// a healthy process will still be reported stale.
use crate::marker::{write_now, MarkerError};
use crate::signals::Shutdown;
use std::path::PathBuf;
use std::time::Duration;

pub struct HeartbeatWriter {
    marker: PathBuf,
    interval: Duration,
    error_retry: Duration,
}

impl HeartbeatWriter {
    pub fn new(marker: impl Into<PathBuf>, interval: Duration, error_retry: Duration) -> Self {
        Self {
            marker: marker.into(),
            interval,
            error_retry,
        }
    }

    /// Write a single heartbeat. Returns the timestamp written.
    pub fn beat_once(&self) -> Result<i64, MarkerError> {
        write_now(&self.marker)
    }

    /// Write heartbeats until shutdown is requested.
    ///
    /// The first heartbeat is written immediately. A failed write is logged
    /// and retried after `error_retry` instead of the full interval.
    /// Returns the number of successful writes.
    pub async fn run(&self, mut shutdown: Shutdown) -> u64 {
        tracing::info!(
            marker = %self.marker.display(),
            interval_secs = self.interval.as_secs(),
            "heartbeat writer started"
        );

        let mut written = 0u64;
        loop {
            let delay = match self.beat_once() {
                Ok(timestamp) => {
                    written += 1;
                    tracing::debug!(timestamp, "heartbeat written");
                    self.interval
                }
                Err(e) => {
                    tracing::error!(error = %e, "heartbeat write failed");
                    self.error_retry
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = crate::signals::wait_for(&mut shutdown) => break,
            }
        }

        tracing::info!(written, "heartbeat writer stopped");
        written
    }
}

/// Warn when the heartbeat cannot keep the marker fresh.
pub fn check_cadence(interval: Duration, staleness_threshold: Duration) -> bool {
    if interval >= staleness_threshold {
        tracing::warn!(
            interval_secs = interval.as_secs(),
            threshold_secs = staleness_threshold.as_secs(),
            "heartbeat interval is not shorter than the staleness threshold"
        );
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marker::read_marker;
    use crate::probe::{LivenessProbe, Probe};
    use crate::signals::ShutdownSignal;
    use tempfile::tempdir;

    #[test]
    fn test_beat_once_satisfies_probe() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("health_status");
        let writer = HeartbeatWriter::new(&marker, Duration::from_secs(10), Duration::from_secs(1));
        let probe = LivenessProbe::new(&marker, Duration::from_secs(30));

        assert!(!probe.check().outcome().is_healthy());
        writer.beat_once().unwrap();
        assert!(probe.check().outcome().is_healthy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_writes_immediately_and_on_interval() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("health_status");
        let writer = HeartbeatWriter::new(&marker, Duration::from_secs(10), Duration::from_secs(1));
        let signal = ShutdownSignal::manual();
        let rx = signal.subscribe();

        let handle = tokio::spawn(async move { writer.run(rx).await });

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert!(read_marker(&marker).is_ok());

        signal.trigger();
        let written = handle.await.unwrap();
        // t=0, t=10, t=20
        assert_eq!(written, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_survives_write_failures() {
        let writer = HeartbeatWriter::new(
            "/nonexistent/dir/health_status",
            Duration::from_secs(10),
            Duration::from_secs(1),
        );
        let signal = ShutdownSignal::manual();
        let rx = signal.subscribe();

        let handle = tokio::spawn(async move { writer.run(rx).await });
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!handle.is_finished());

        signal.trigger();
        assert_eq!(handle.await.unwrap(), 0);
    }

    #[test]
    fn test_check_cadence() {
        assert!(check_cadence(
            Duration::from_secs(10),
            Duration::from_secs(30)
        ));
        assert!(!check_cadence(
            Duration::from_secs(30),
            Duration::from_secs(30)
        ));
    }
}
