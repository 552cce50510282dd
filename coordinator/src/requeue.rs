//! Resubmission of the current job through the scheduler.
//!
//! `scontrol requeue` is idempotent on the scheduler side: requeueing a job
//! that is already pending requeue is accepted, so the coordinator does not
//! need to track whether a resubmission is in flight.

use std::process::Command;

use reprise_config::SchedulerIds;

/// Wrapper around the scheduler's requeue command.
pub struct RequeueCommand {
    ids: SchedulerIds,
    /// Command name; overridable so tests can substitute a recording stub.
    command: String,
}

impl RequeueCommand {
    /// Requeue through the real scheduler CLI.
    #[must_use]
    pub fn new(ids: SchedulerIds) -> Self {
        Self::with_command(ids, "scontrol")
    }

    /// Requeue through an alternative command (tests).
    #[must_use]
    pub fn with_command(ids: SchedulerIds, command: impl Into<String>) -> Self {
        Self {
            ids,
            command: command.into(),
        }
    }

    /// Whether a scheduler session was detected to requeue into.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.ids.requeue_target().is_some()
    }

    /// Resubmit the current job under the same lineage.
    pub fn issue(&self) -> Result<(), RequeueError> {
        let target = self.ids.requeue_target().ok_or(RequeueError::Unavailable)?;

        tracing::info!(%target, command = %self.command, "requeueing job");
        let output = Command::new(&self.command)
            .args(["requeue", target.as_str()])
            .output()
            .map_err(|e| RequeueError::Command(e.to_string()))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(RequeueError::Failed {
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }
}

/// Errors that can occur when requeueing.
#[derive(Debug, thiserror::Error)]
pub enum RequeueError {
    #[error("no scheduler session to requeue into")]
    Unavailable,
    #[error("requeue command failed to start: {0}")]
    Command(String),
    #[error("requeue command exited with status {status:?}: {stderr}")]
    Failed {
        status: Option<i32>,
        stderr: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_outside_scheduler() {
        let requeue = RequeueCommand::new(SchedulerIds::default());
        assert!(!requeue.is_available());
        assert!(matches!(requeue.issue(), Err(RequeueError::Unavailable)));
    }

    #[test]
    fn test_available_with_job_id() {
        let ids = SchedulerIds {
            job_id: Some("42".to_string()),
            ..SchedulerIds::default()
        };
        let requeue = RequeueCommand::new(ids);
        assert!(requeue.is_available());
    }
}
