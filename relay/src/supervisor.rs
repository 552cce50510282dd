//! Worker supervision: launch, signal bridging, exit propagation.

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use reprise_config::{ForwardSignal, RelaySettings, SchedulerIds, pid_record_path};
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinHandle;

use crate::RelayError;
use crate::{forward, pidfile};

/// Launches the worker, bridges the scheduler's pre-termination notification
/// to it, and reports its exit status.
///
/// The scheduler signals this process (the batch script's direct child); the
/// worker may sit behind an intermediary shell, so the notice is re-sent to
/// the PID the worker recorded, retried until it exits.
pub struct Supervisor {
    settings: RelaySettings,
    worker: Vec<String>,
}

impl Supervisor {
    /// Create a supervisor for the given worker command line.
    #[must_use]
    pub fn new(settings: RelaySettings, worker: Vec<String>) -> Self {
        Self { settings, worker }
    }

    /// Supervise under the scheduler session found in the environment.
    pub async fn run(self) -> Result<i32, RelayError> {
        let ids = SchedulerIds::from_env();
        self.run_with_ids(&ids).await
    }

    /// Supervise with explicit scheduler identifiers (tests).
    pub async fn run_with_ids(self, ids: &SchedulerIds) -> Result<i32, RelayError> {
        let record = pid_record_path(&self.settings.pid_dir, ids);
        if record.exists() {
            tracing::warn!(record = %record.display(), "removing stale PID record");
            pidfile::remove(&record)?;
        }

        let (program, args) = self
            .worker
            .split_first()
            .ok_or(RelayError::NoWorkerCommand)?;
        let mut command = tokio::process::Command::new(program);
        command.args(args);
        if let Some(rust_log) = &self.settings.rust_log {
            command.env("RUST_LOG", rust_log);
        }
        let mut child = command
            .spawn()
            .map_err(|e| RelayError::Spawn(program.clone(), e))?;
        let child_pid = child.id();
        tracing::info!(pid = ?child_pid, worker = %self.worker.join(" "), "worker started");

        let mut usr1 = signal(SignalKind::user_defined1()).map_err(RelayError::Signal)?;
        let mut term = signal(SignalKind::terminate()).map_err(RelayError::Signal)?;

        let forward_signal = match self.settings.forward_signal {
            ForwardSignal::Usr1 => libc::SIGUSR1,
            ForwardSignal::Term => libc::SIGTERM,
        };
        let retry_interval = Duration::from_millis(self.settings.retry_interval_ms);

        let mut forwarder: Option<JoinHandle<()>> = None;
        let status = loop {
            tokio::select! {
                status = child.wait() => break status.map_err(RelayError::Wait)?,
                _ = usr1.recv() => {
                    tracing::info!("pre-termination notification received (SIGUSR1)");
                    spawn_forwarder(
                        &mut forwarder,
                        record.clone(),
                        child_pid,
                        forward_signal,
                        retry_interval,
                    );
                }
                _ = term.recv() => {
                    tracing::info!("termination request received (SIGTERM)");
                    spawn_forwarder(
                        &mut forwarder,
                        record.clone(),
                        child_pid,
                        forward_signal,
                        retry_interval,
                    );
                }
            }
        };

        if let Some(handle) = forwarder {
            handle.abort();
        }
        if let Err(err) = pidfile::remove(&record) {
            tracing::warn!(%err, "failed to remove PID record");
        }

        let code = exit_code(&status);
        tracing::info!(code, success = status.success(), "worker exited");
        Ok(code)
    }
}

/// Start the forwarding loop once; repeated notifications while it is
/// already running are redundant, the loop re-sends on its own.
fn spawn_forwarder(
    slot: &mut Option<JoinHandle<()>>,
    record: PathBuf,
    fallback: Option<u32>,
    forward_signal: libc::c_int,
    retry_interval: Duration,
) {
    if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
        tracing::debug!("signal forwarding already in progress");
        return;
    }
    *slot = Some(tokio::spawn(async move {
        if let Err(err) =
            forward::forward_until_exit(&record, fallback, forward_signal, retry_interval).await
        {
            tracing::error!(%err, "could not deliver the termination notice");
        }
    }));
}

/// Map a worker exit status to the relay's own exit code, keeping
/// signal-deaths distinguishable the way a shell would.
fn exit_code(status: &ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|s| 128 + s))
        .unwrap_or(1)
}
