//! Signal forwarding: deliver the termination notice to the worker and keep
//! retrying until it exits.
//!
//! A single delivery is not guaranteed to be observed: the signal may land
//! while the worker is inside a non-interruptible section (mid-write on a
//! network filesystem, typically). Retrying until the target disappears
//! tolerates that without any timing assumptions.

use std::path::Path;
use std::time::Duration;

use crate::RelayError;
use crate::pidfile::{self, pid_t};

/// Resolve the worker PID and signal it until it exits.
///
/// The PID record is the source of truth (the worker may be wrapped in a
/// shell and not be our direct child); `fallback` is the direct child PID,
/// used when the record never appeared. "The process is gone" terminates the
/// loop normally; a missing record with no fallback is a
/// [`RelayError::SignalDelivery`].
pub async fn forward_until_exit(
    record: &Path,
    fallback: Option<u32>,
    signal: libc::c_int,
    retry_interval: Duration,
) -> Result<(), RelayError> {
    let pid = match pidfile::read(record) {
        Ok(pid) => pid,
        Err(err) => match fallback {
            Some(pid) => {
                tracing::warn!(
                    %err,
                    pid,
                    "PID record unreadable, falling back to the direct child PID"
                );
                pid
            }
            None => return Err(RelayError::SignalDelivery(err.to_string())),
        },
    };

    loop {
        // SAFETY: sending a signal to an arbitrary pid; ESRCH is handled.
        let sent = unsafe { libc::kill(pid_t(pid), signal) };
        if sent != 0 {
            let errno = std::io::Error::last_os_error();
            if errno.raw_os_error() == Some(libc::ESRCH) {
                tracing::info!(pid, "worker has exited, stopping signal forwarding");
            } else {
                tracing::warn!(pid, %errno, "signal delivery failed, giving up");
            }
            return Ok(());
        }
        tracing::debug!(pid, signal, "termination signal forwarded");
        tokio::time::sleep(retry_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use std::process::Command;

    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn test_missing_record_without_fallback_is_error() {
        let dir = tempdir().unwrap();
        let record = dir.path().join("nope.pid");
        let result =
            forward_until_exit(&record, None, libc::SIGUSR1, Duration::from_millis(10)).await;
        assert!(matches!(result, Err(RelayError::SignalDelivery(_))));
    }

    #[tokio::test]
    async fn test_gone_process_terminates_loop() {
        let dir = tempdir().unwrap();
        let record = dir.path().join("w.pid");

        // A process that exits immediately; once reaped, its pid is free to
        // signal-probe as "gone".
        let mut child = Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        std::fs::write(&record, format!("{pid}\n")).unwrap();

        forward_until_exit(&record, None, libc::SIGUSR1, Duration::from_millis(10))
            .await
            .unwrap();
    }

    /// The loop must keep signalling until the worker actually exits: this
    /// sleeper terminates on SIGUSR1 only (default disposition), so the test
    /// completing at all proves delivery happened.
    #[tokio::test]
    #[ignore = "spawns subprocesses"]
    async fn test_forwarding_kills_sleeper() {
        let dir = tempdir().unwrap();
        let record = dir.path().join("w.pid");

        let mut child = Command::new("sleep").arg("3600").spawn().unwrap();
        let pid = child.id();
        std::fs::write(&record, format!("{pid}\n")).unwrap();

        // Reap concurrently, as the supervisor does; an unreaped child stays
        // signalable and would keep the loop alive.
        let waiter = std::thread::spawn(move || child.wait().unwrap());

        forward_until_exit(&record, None, libc::SIGUSR1, Duration::from_millis(50))
            .await
            .unwrap();

        let status = waiter.join().unwrap();
        assert!(!status.success());
        assert!(!pidfile::process_alive(pid));
    }
}
