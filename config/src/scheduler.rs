//! Scheduler (SLURM) session identifiers and the paths derived from them.

use std::env;
use std::path::{Path, PathBuf};

/// Identifiers of the surrounding scheduler session, read from the
/// environment at startup.
///
/// All fields are `None` when running outside the scheduler (local
/// development, tests); the coordinator then skips requeueing and the
/// checkpoint partition falls back to the current date.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerIds {
    /// `SLURM_JOB_ID`, fresh for every (re)start of the job.
    pub job_id: Option<String>,
    /// `SLURM_ARRAY_JOB_ID`, set for array jobs.
    pub array_job_id: Option<String>,
    /// `SLURM_ARRAY_TASK_ID`, set for array jobs.
    pub array_task_id: Option<String>,
}

impl SchedulerIds {
    /// Read the scheduler identifiers from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            job_id: env::var("SLURM_JOB_ID").ok(),
            array_job_id: env::var("SLURM_ARRAY_JOB_ID").ok(),
            array_task_id: env::var("SLURM_ARRAY_TASK_ID").ok(),
        }
    }

    /// Whether any scheduler session was detected.
    #[must_use]
    pub fn in_scheduler(&self) -> bool {
        self.job_id.is_some() || self.array_job_id.is_some() || self.array_task_id.is_some()
    }

    /// The identifier to pass to the requeue command.
    ///
    /// Array tasks are requeued as `<array_job_id>_<task_id>` so the
    /// scheduler resubmits exactly this slot; plain jobs use the job id.
    #[must_use]
    pub fn requeue_target(&self) -> Option<String> {
        if let (Some(array), Some(task)) = (&self.array_job_id, &self.array_task_id) {
            return Some(format!("{array}_{task}"));
        }
        self.job_id.clone()
    }

    /// Checkpoint partition directory name: the job id inside a scheduler
    /// session, the current date otherwise. Partitioning by job id keeps one
    /// directory per allocation; the date fallback keeps local runs
    /// browsable.
    #[must_use]
    pub fn partition_name(&self) -> String {
        self.job_id
            .clone()
            .unwrap_or_else(|| chrono::Local::now().format("%Y-%m-%d").to_string())
    }
}

/// Path of the PID record for this scheduler session.
///
/// The record is namespaced by the array identifiers when present so that
/// tasks of the same array sharing a node do not clobber each other. Outside
/// a scheduler session the name is fixed, which keeps local supervision and
/// tests deterministic.
#[must_use]
pub fn pid_record_path(dir: &Path, ids: &SchedulerIds) -> PathBuf {
    let name = if let (Some(array), Some(task)) = (&ids.array_job_id, &ids.array_task_id) {
        format!("{array}_{task}.pid")
    } else if let Some(job) = &ids.job_id {
        format!("{job}.pid")
    } else {
        "worker.pid".to_string()
    };
    dir.join(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn array_ids() -> SchedulerIds {
        SchedulerIds {
            job_id: Some("1001".to_string()),
            array_job_id: Some("1000".to_string()),
            array_task_id: Some("3".to_string()),
        }
    }

    #[test]
    fn test_requeue_target_prefers_array() {
        assert_eq!(array_ids().requeue_target(), Some("1000_3".to_string()));

        let plain = SchedulerIds {
            job_id: Some("42".to_string()),
            ..SchedulerIds::default()
        };
        assert_eq!(plain.requeue_target(), Some("42".to_string()));
        assert_eq!(SchedulerIds::default().requeue_target(), None);
    }

    #[test]
    fn test_pid_record_naming() {
        let dir = Path::new("/tmp/pids");
        assert_eq!(
            pid_record_path(dir, &array_ids()),
            dir.join("1000_3.pid")
        );

        let plain = SchedulerIds {
            job_id: Some("42".to_string()),
            ..SchedulerIds::default()
        };
        assert_eq!(pid_record_path(dir, &plain), dir.join("42.pid"));
        assert_eq!(
            pid_record_path(dir, &SchedulerIds::default()),
            dir.join("worker.pid")
        );
    }

    #[test]
    fn test_partition_name_uses_job_id() {
        assert_eq!(array_ids().partition_name(), "1001");
        // Without a session the partition is a date; just check the shape.
        let partition = SchedulerIds::default().partition_name();
        assert_eq!(partition.len(), 10);
        assert!(partition.contains('-'));
    }
}
