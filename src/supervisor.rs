//! Supervisor loop: drive the liveness probe on a fixed schedule and restart
//! the supervised target after too many consecutive failures.
//!
//! This is the container runtime's side of the contract, packaged so the
//! probe can be exercised end to end without one. A target in `Failed` is
//! restarted and begins again in `Starting`.

use crate::config;
use crate::probe::{run_guarded, Probe, ProbeReport, UnhealthyReason};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::signals::{wait_for, Shutdown};
use crate::status::{StatusTracker, SupervisorState};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::future::Future;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::{Instant, MissedTickBehavior};

/// Probe timing and failure threshold.
#[derive(Debug, Clone)]
pub struct ProbeSchedule {
    /// Time between probes.
    pub interval: Duration,
    /// Budget for a single probe; exceeding it counts as a failure.
    pub timeout: Duration,
    /// Grace period after (re)start during which failures do not count.
    pub start_period: Duration,
    /// Consecutive counted failures that trigger a restart.
    pub retries: u32,
}

impl ProbeSchedule {
    pub fn from_config(config: &config::SupervisorConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.interval_secs),
            timeout: Duration::from_secs(config.timeout_secs),
            start_period: Duration::from_secs(config.start_period_secs),
            retries: config.retries,
        }
    }
}

/// Something the supervisor can restart.
pub trait Supervised: Send {
    /// Tear down the current instance and start a fresh one.
    fn restart(&mut self) -> impl Future<Output = Result<(), SupervisorError>> + Send;

    /// True once the current instance has exited on its own.
    fn has_exited(&mut self) -> bool;

    /// Stop the current instance for good.
    fn stop(&mut self) -> impl Future<Output = ()> + Send;
}

pub struct Supervisor<P: Probe, T: Supervised> {
    probe: Arc<P>,
    target: T,
    schedule: ProbeSchedule,
    policy: RetryPolicy,
    state: SupervisorState,
    restarts: u32,
    status: Option<StatusTracker>,
}

impl<P: Probe, T: Supervised> Supervisor<P, T> {
    pub fn new(probe: P, target: T, schedule: ProbeSchedule) -> Self {
        let policy = RetryPolicy::new(schedule.retries);
        Self {
            probe: Arc::new(probe),
            target,
            schedule,
            policy,
            state: SupervisorState::Starting,
            restarts: 0,
            status: None,
        }
    }

    /// Mirror every state transition into a status file.
    pub fn with_status(mut self, tracker: StatusTracker) -> Self {
        self.status = Some(tracker);
        self
    }

    #[cfg(test)]
    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Probe until shutdown is requested, then stop the target.
    ///
    /// Returns the number of restarts performed.
    pub async fn run(mut self, mut shutdown: Shutdown) -> Result<u32, SupervisorError> {
        tracing::info!(
            interval_secs = self.schedule.interval.as_secs(),
            timeout_secs = self.schedule.timeout.as_secs(),
            start_period_secs = self.schedule.start_period.as_secs(),
            retries = self.schedule.retries,
            "supervisor started"
        );
        self.transition(SupervisorState::Starting);

        let mut started = Instant::now();
        let interval = self.schedule.interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = wait_for(&mut shutdown) => break,
            }

            if self.target.has_exited() {
                tracing::warn!("supervised process exited, restarting");
                self.transition(SupervisorState::Failed);
                self.restart_target().await?;
                started = Instant::now();
                continue;
            }

            let report = probe_once(Arc::clone(&self.probe), self.schedule.timeout).await;
            let in_start_period = started.elapsed() < self.schedule.start_period;
            let decision = self.policy.evaluate(report.outcome(), in_start_period);
            tracing::debug!(%report, ?decision, in_start_period, "health check");

            if let Some(status) = self.status.as_mut() {
                status.record_check(&report, self.policy.consecutive_failures());
            }

            match decision {
                RetryDecision::Healthy => self.transition(SupervisorState::Healthy),
                RetryDecision::Ignored => self.transition(self.state),
                RetryDecision::Retry { .. } => self.transition(SupervisorState::Unhealthy),
                RetryDecision::Restart { failures } => {
                    tracing::error!(failures, %report, "supervised process failed health checks");
                    self.transition(SupervisorState::Failed);
                    self.restart_target().await?;
                    started = Instant::now();
                }
            }
        }

        tracing::info!(restarts = self.restarts, "supervisor stopping");
        self.target.stop().await;
        if let Some(status) = &self.status {
            status.remove();
        }
        Ok(self.restarts)
    }

    async fn restart_target(&mut self) -> Result<(), SupervisorError> {
        if let Err(e) = self.target.restart().await {
            tracing::error!(error = %e, "failed to restart supervised process");
            if let Some(status) = &self.status {
                status.remove();
            }
            return Err(e);
        }
        self.policy.reset();
        self.restarts += 1;
        tracing::info!(restarts = self.restarts, "supervised process restarted");
        if let Some(status) = self.status.as_mut() {
            status.record_restart();
        }
        self.transition(SupervisorState::Starting);
        Ok(())
    }

    fn transition(&mut self, next: SupervisorState) {
        if next != self.state {
            tracing::info!(from = ?self.state, to = ?next, "supervisor state changed");
        }
        self.state = next;
        if let Some(status) = &self.status {
            status.update(next);
        }
    }
}

/// Run the probe off the async threads, bounded by `timeout`.
async fn probe_once<P: Probe>(probe: Arc<P>, timeout: Duration) -> ProbeReport {
    let task = tokio::task::spawn_blocking(move || run_guarded(probe.as_ref()));

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(report)) => report,
        Ok(Err(e)) => {
            tracing::error!(error = %e, "probe task failed");
            ProbeReport::unhealthy(UnhealthyReason::Panicked)
        }
        Err(_) => {
            tracing::warn!(?timeout, "probe timed out");
            ProbeReport::unhealthy(UnhealthyReason::TimedOut)
        }
    }
}

/// A child process supervised by process group.
///
/// The child runs in its own process group so a restart also reaps anything
/// it spawned, even after the leader itself has exited.
pub struct ChildProcess {
    command: String,
    args: Vec<String>,
    stop_grace: Duration,
    child: Option<Child>,
    pgid: Option<Pid>,
}

impl ChildProcess {
    pub fn new(command: impl Into<String>, args: Vec<String>, stop_grace: Duration) -> Self {
        Self {
            command: command.into(),
            args,
            stop_grace,
            child: None,
            pgid: None,
        }
    }

    /// Spawn the command. Returns the child PID.
    pub fn spawn(&mut self) -> Result<u32, SupervisorError> {
        let child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::null())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SupervisorError::Spawn {
                command: self.command.clone(),
                source: e,
            })?;

        let pid = child.id().unwrap_or(0);
        tracing::info!(
            pid,
            command = %self.command,
            args = ?self.args,
            "supervised process started"
        );
        // process_group(0) makes the child its own group leader.
        self.pgid = (pid > 0).then_some(Pid::from_raw(pid as i32));
        self.child = Some(child);
        Ok(pid)
    }

    /// PID of the running child, if any.
    #[cfg(test)]
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }

    /// SIGTERM the process group, escalate to SIGKILL after the grace period.
    ///
    /// The group is signalled even when the leader has already been reaped,
    /// so processes it left behind do not outlive a restart.
    async fn terminate(&mut self) {
        let child = self.child.take();
        let Some(pgid) = self.pgid.take() else {
            return;
        };
        let pid = pgid.as_raw();
        let deadline = Instant::now() + self.stop_grace;

        if let Err(e) = killpg(pgid, Signal::SIGTERM) {
            tracing::debug!(pid, error = %e, "SIGTERM to process group failed");
        }

        if let Some(mut child) = child {
            match tokio::time::timeout_at(deadline, child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::info!(pid, ?status, "supervised process stopped");
                }
                Ok(Err(e)) => {
                    tracing::warn!(pid, error = %e, "failed to wait for supervised process");
                }
                Err(_) => {
                    tracing::warn!(pid, "supervised process ignored SIGTERM, sending SIGKILL");
                    let _ = killpg(pgid, Signal::SIGKILL);
                    let _ = child.wait().await;
                }
            }
        }

        if !group_gone(pgid, deadline).await {
            tracing::warn!(pid, "process group outlived SIGTERM, sending SIGKILL");
            let _ = killpg(pgid, Signal::SIGKILL);
        }
    }
}

/// Poll until no process remains in `pgid` or `deadline` passes.
async fn group_gone(pgid: Pid, deadline: Instant) -> bool {
    loop {
        if killpg(pgid, None).is_err() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

impl Supervised for ChildProcess {
    async fn restart(&mut self) -> Result<(), SupervisorError> {
        self.terminate().await;
        self.spawn()?;
        Ok(())
    }

    fn has_exited(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return true;
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                tracing::warn!(?status, "supervised process exited");
                true
            }
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(error = %e, "failed to poll supervised process");
                false
            }
        }
    }

    async fn stop(&mut self) {
        self.terminate().await;
    }
}

/// Errors that end the supervisor loop.
#[derive(Debug)]
pub enum SupervisorError {
    /// Failed to spawn the supervised command.
    Spawn {
        command: String,
        source: std::io::Error,
    },
}

impl std::fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SupervisorError::Spawn { command, source } => {
                write!(f, "failed to spawn supervised command {command:?}: {source}")
            }
        }
    }
}

impl std::error::Error for SupervisorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SupervisorError::Spawn { source, .. } => Some(source),
        }
    }
}
