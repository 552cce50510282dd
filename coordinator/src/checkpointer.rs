//! The checkpoint coordinator: periodic snapshots, termination handling,
//! requeue, and resume discovery.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use reprise_config::{CheckpointConfig, SchedulerIds, pid_record_path};
use serde::{Deserialize, Serialize};

use crate::notice::TerminationNotice;
use crate::requeue::{RequeueCommand, RequeueError};
use crate::store::{SnapshotStore, StoreError};

/// Coordinator lifecycle phase.
///
/// `FreshStart`/`Resumed` are entry phases fixed at construction; `step`
/// moves through `Running`/`Saving` and ends in `Done` once a termination
/// notice has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No prior snapshot was found; the run starts from the caller's
    /// initial state.
    FreshStart,
    /// A snapshot was restored; sequence numbering continues from it.
    Resumed,
    /// Steady state between periodic calls.
    Running,
    /// A snapshot write is in flight.
    Saving,
    /// A termination notice is being handled.
    Terminating,
    /// Terminal; no further `step` calls are valid.
    Done,
}

/// What the run loop must do after a `step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Proceed to the next unit of work.
    Continue,
    /// The final snapshot is saved and the requeue issued; exit promptly
    /// without saving anything further.
    Stop,
}

/// Whether this process continued an existing lineage. Exposed for the
/// external run tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeMode {
    Fresh,
    Resumed,
}

impl ResumeMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Resumed => "resumed",
        }
    }
}

/// Snapshot restored at construction.
#[derive(Debug, Clone)]
pub struct Restored {
    /// Sequence number the snapshot was stored under.
    pub sequence: u64,
    /// Whether it was a final pre-termination save.
    pub terminal: bool,
    /// The caller-opaque state bytes.
    pub state: Vec<u8>,
}

/// Wire form of a snapshot payload. The caller's state stays opaque; the
/// envelope adds the counters the coordinator itself needs to resume.
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEnvelope {
    resumes: u64,
    terminal: bool,
    saved_at_unix: u64,
    state: Vec<u8>,
}

/// Errors from the checkpoint coordinator.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("snapshot envelope encoding failed: {0}")]
    Envelope(#[from] bincode::Error),
    #[error(transparent)]
    Requeue(#[from] RequeueError),
    #[error("failed to write PID record {}: {source}", .path.display())]
    PidRecord {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to register signal handlers: {0}")]
    Signal(std::io::Error),
}

/// Drives the save/prune/resume protocol for one run lineage.
///
/// Owns the snapshot store, listens for the relayed termination signal, and
/// requests resubmission when told to stop. Exactly one coordinator exists
/// per `run_id` at a time; the scheduler guarantees this by running at most
/// one worker per job-array slot.
pub struct Checkpointer {
    run_id: String,
    save_interval: u64,
    store: SnapshotStore,
    notice: TerminationNotice,
    requeue: RequeueCommand,
    phase: Phase,
    /// Next sequence number to write.
    sequence: u64,
    resumes: u64,
    steps_since_save: u64,
    restored: Option<Restored>,
    hyperparams: Option<serde_json::Value>,
}

impl Checkpointer {
    /// Create a coordinator for the current process.
    ///
    /// Reads the scheduler session from the environment, discovers the
    /// latest valid snapshot of the lineage (falling back over corrupt or
    /// missing ones), writes the PID record, and binds the termination
    /// notice to SIGUSR1/SIGTERM.
    pub fn new(config: CheckpointConfig) -> Result<Self, CheckpointError> {
        let ids = SchedulerIds::from_env();
        let requeue = RequeueCommand::new(ids.clone());
        let checkpointer = Self::with_collaborators(config, &ids, requeue)?;
        checkpointer
            .notice
            .register()
            .map_err(CheckpointError::Signal)?;
        Ok(checkpointer)
    }

    /// Create a coordinator with explicit collaborators.
    ///
    /// Signal handlers are not registered; raise the notice through
    /// [`Checkpointer::termination_flag`] or bind it yourself. This is the
    /// entry point for tests and for embedding under a different signal
    /// source.
    pub fn with_collaborators(
        config: CheckpointConfig,
        ids: &SchedulerIds,
        requeue: RequeueCommand,
    ) -> Result<Self, CheckpointError> {
        let store = SnapshotStore::new(config.root.clone(), ids.partition_name());
        let run_id = config.run_id;

        let mut phase = Phase::FreshStart;
        let mut sequence = 0;
        let mut resumes = 0;
        let mut restored = None;

        let mut known = store.list(&run_id)?;
        while let Some(candidate) = known.pop() {
            match load_envelope(&store, &run_id, candidate) {
                Ok(envelope) => {
                    tracing::info!(
                        %run_id,
                        sequence = candidate,
                        resumes = envelope.resumes + 1,
                        "resuming from snapshot"
                    );
                    phase = Phase::Resumed;
                    sequence = candidate + 1;
                    resumes = envelope.resumes + 1;
                    restored = Some(Restored {
                        sequence: candidate,
                        terminal: envelope.terminal,
                        state: envelope.state,
                    });
                    break;
                }
                Err(err @ (CheckpointError::Store(StoreError::Corrupt { .. })
                | CheckpointError::Store(StoreError::NotFound { .. })
                | CheckpointError::Envelope(_))) => {
                    tracing::warn!(
                        %run_id,
                        sequence = candidate,
                        %err,
                        "snapshot unusable, falling back to an older one"
                    );
                }
                Err(err) => return Err(err),
            }
        }
        if restored.is_none() {
            tracing::info!(%run_id, "no usable snapshot found, starting fresh");
        }

        write_pid_record(&config.pid_dir, ids)?;

        Ok(Self {
            run_id,
            save_interval: config.save_interval.max(1),
            store,
            notice: TerminationNotice::new(),
            requeue,
            phase,
            sequence,
            resumes,
            steps_since_save: 0,
            restored,
            hyperparams: config.hyperparams,
        })
    }

    /// One periodic call per unit of work (epoch, iteration block).
    ///
    /// Handles a pending termination notice first (final forced save,
    /// requeue, `Verdict::Stop`); otherwise saves a snapshot when the
    /// cadence is due.
    /// A failed periodic save is logged and retried on the next call; the
    /// previous snapshot stays untouched. A failed requeue is returned as an
    /// error so the process exits nonzero and the operator sees it.
    ///
    /// # Panics
    ///
    /// Calling `step` after it returned `Verdict::Stop` (or after
    /// [`Checkpointer::finish`]) is a programming error and panics.
    pub fn step(&mut self, state: &[u8]) -> Result<Verdict, CheckpointError> {
        assert!(
            self.phase != Phase::Done,
            "step called on a finished checkpointer"
        );
        self.phase = Phase::Running;

        // Consume the notice before the periodic save: a terminating step
        // writes exactly one snapshot, the final forced one.
        if self.notice.consume() {
            tracing::info!(run_id = %self.run_id, "termination notice received");
            return self.terminate(state);
        }

        self.steps_since_save += 1;
        if self.steps_since_save >= self.save_interval {
            match self.save_snapshot(state, false) {
                Ok(()) => self.steps_since_save = 0,
                Err(err) => tracing::warn!(
                    run_id = %self.run_id,
                    %err,
                    "periodic snapshot failed, keeping previous snapshot and retrying next step"
                ),
            }
            self.phase = Phase::Running;
        }

        Ok(Verdict::Continue)
    }

    /// Finish the run at natural completion, optionally removing every
    /// snapshot of the lineage.
    pub fn finish(mut self, remove_snapshots: bool) -> Result<(), CheckpointError> {
        self.phase = Phase::Done;
        if remove_snapshots {
            for sequence in self.store.list(&self.run_id)? {
                self.store.delete(&self.run_id, sequence)?;
            }
            tracing::info!(run_id = %self.run_id, "removed all snapshots");
        }
        Ok(())
    }

    fn terminate(&mut self, state: &[u8]) -> Result<Verdict, CheckpointError> {
        self.phase = Phase::Terminating;

        // The one blocking, must-not-be-skipped operation in the shutdown
        // path. If it fails, the previous snapshot remains the resume point
        // and the job still gets requeued.
        if let Err(err) = self.save_snapshot(state, true) {
            tracing::error!(
                run_id = %self.run_id,
                %err,
                "final snapshot failed; resume will fall back to the previous snapshot"
            );
        }

        let requeued = if self.requeue.is_available() {
            self.requeue.issue()
        } else {
            tracing::info!(
                run_id = %self.run_id,
                "no scheduler session detected, skipping requeue"
            );
            Ok(())
        };

        self.phase = Phase::Done;
        requeued?;
        Ok(Verdict::Stop)
    }

    fn save_snapshot(&mut self, state: &[u8], terminal: bool) -> Result<(), CheckpointError> {
        self.phase = Phase::Saving;
        let envelope = SnapshotEnvelope {
            resumes: self.resumes,
            terminal,
            saved_at_unix: u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0),
            state: state.to_vec(),
        };
        let payload = bincode::serialize(&envelope)?;

        let sequence = self.sequence;
        let path = self.store.save(&self.run_id, sequence, &payload)?;
        tracing::info!(
            run_id = %self.run_id,
            sequence,
            terminal,
            path = %path.display(),
            "snapshot saved"
        );

        self.sequence += 1;
        // Only after the new snapshot is confirmed on disk.
        self.prune_older_than(sequence);
        Ok(())
    }

    /// Remove every snapshot strictly older than `newest`. Failures waste
    /// space, never correctness; they are logged and ignored.
    fn prune_older_than(&self, newest: u64) {
        match self.store.list(&self.run_id) {
            Ok(sequences) => {
                for old in sequences.into_iter().filter(|s| *s < newest) {
                    if let Err(err) = self.store.delete(&self.run_id, old) {
                        tracing::warn!(
                            run_id = %self.run_id,
                            sequence = old,
                            %err,
                            "failed to remove stale snapshot"
                        );
                    }
                }
            }
            Err(err) => tracing::warn!(
                run_id = %self.run_id,
                %err,
                "failed to enumerate stale snapshots"
            ),
        }
    }

    /// The lineage identifier.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Number of successful resumes of this lineage, 0 on a true fresh
    /// start. A metric for the external tracker.
    #[must_use]
    pub fn resumes(&self) -> u64 {
        self.resumes
    }

    /// Next sequence number to be written. A metric for the external
    /// tracker.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Whether this process started fresh or continued a lineage.
    #[must_use]
    pub fn resume_mode(&self) -> ResumeMode {
        if self.restored.is_some() {
            ResumeMode::Resumed
        } else {
            ResumeMode::Fresh
        }
    }

    /// The snapshot restored at construction, if any.
    #[must_use]
    pub fn restored(&self) -> Option<&Restored> {
        self.restored.as_ref()
    }

    /// The restored opaque state, for the run loop's resume path.
    #[must_use]
    pub fn restored_state(&self) -> Option<&[u8]> {
        self.restored.as_ref().map(|r| r.state.as_slice())
    }

    /// Hyperparameters recorded at construction, uninterpreted.
    #[must_use]
    pub fn hyperparams(&self) -> Option<&serde_json::Value> {
        self.hyperparams.as_ref()
    }

    /// The termination notice, e.g. to bind it to a custom signal source.
    #[must_use]
    pub fn notice(&self) -> &TerminationNotice {
        &self.notice
    }

    /// The raw termination flag, for sharing with an external signal
    /// handler: the handler only ever sets it.
    #[must_use]
    pub fn termination_flag(&self) -> Arc<AtomicBool> {
        self.notice.flag()
    }
}

/// Write this process id to the PID record so the relay's handler can find
/// it. Written once, before the run loop starts.
fn write_pid_record(dir: &std::path::Path, ids: &SchedulerIds) -> Result<(), CheckpointError> {
    let path = pid_record_path(dir, ids);
    let record = |source| CheckpointError::PidRecord {
        path: path.clone(),
        source,
    };
    std::fs::create_dir_all(dir).map_err(record)?;
    std::fs::write(&path, format!("{}\n", std::process::id())).map_err(record)?;
    tracing::debug!(path = %path.display(), "PID record written");
    Ok(())
}

fn load_envelope(
    store: &SnapshotStore,
    run_id: &str,
    sequence: u64,
) -> Result<SnapshotEnvelope, CheckpointError> {
    let payload = store.load(run_id, sequence)?;
    Ok(bincode::deserialize(&payload)?)
}

/// Details of one decodable snapshot, for operational listing.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotDetails {
    pub sequence: u64,
    pub resumes: u64,
    pub terminal: bool,
    pub saved_at_unix: u64,
}

/// Summary of a run lineage, for operational listing.
#[derive(Debug, Clone, Serialize)]
pub struct LineageSummary {
    pub run_id: String,
    pub sequences: Vec<u64>,
    /// Newest decodable snapshot, `None` if every snapshot is unusable.
    pub latest: Option<SnapshotDetails>,
}

/// Describe a lineage: all sequence numbers plus the newest snapshot that
/// decodes cleanly.
pub fn describe_lineage(
    store: &SnapshotStore,
    run_id: &str,
) -> Result<LineageSummary, CheckpointError> {
    let sequences = store.list(run_id)?;
    let mut latest = None;
    for candidate in sequences.iter().rev() {
        if let Ok(envelope) = load_envelope(store, run_id, *candidate) {
            latest = Some(SnapshotDetails {
                sequence: *candidate,
                resumes: envelope.resumes,
                terminal: envelope.terminal,
                saved_at_unix: envelope.saved_at_unix,
            });
            break;
        }
    }
    Ok(LineageSummary {
        run_id: run_id.to_string(),
        sequences,
        latest,
    })
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn test_config(root: &std::path::Path) -> CheckpointConfig {
        let mut config = CheckpointConfig::new("r1");
        config.root = root.join("checkpoints");
        config.pid_dir = root.join("pids");
        config
    }

    fn test_checkpointer(root: &std::path::Path) -> Checkpointer {
        Checkpointer::with_collaborators(
            test_config(root),
            &SchedulerIds::default(),
            RequeueCommand::new(SchedulerIds::default()),
        )
        .unwrap()
    }

    #[test]
    fn test_fresh_start() {
        let dir = tempdir().unwrap();
        let checkpointer = test_checkpointer(dir.path());
        assert_eq!(checkpointer.phase(), Phase::FreshStart);
        assert_eq!(checkpointer.resumes(), 0);
        assert_eq!(checkpointer.sequence(), 0);
        assert_eq!(checkpointer.resume_mode(), ResumeMode::Fresh);
        assert!(checkpointer.restored_state().is_none());
    }

    #[test]
    fn test_pid_record_written() {
        let dir = tempdir().unwrap();
        let _checkpointer = test_checkpointer(dir.path());
        let record = dir.path().join("pids").join("worker.pid");
        let content = std::fs::read_to_string(record).unwrap();
        assert_eq!(
            content.trim().parse::<u32>().unwrap(),
            std::process::id()
        );
    }

    #[test]
    fn test_save_interval_cadence() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.save_interval = 3;
        let mut checkpointer = Checkpointer::with_collaborators(
            config,
            &SchedulerIds::default(),
            RequeueCommand::new(SchedulerIds::default()),
        )
        .unwrap();

        assert_eq!(checkpointer.step(b"a").unwrap(), Verdict::Continue);
        assert_eq!(checkpointer.step(b"b").unwrap(), Verdict::Continue);
        assert_eq!(checkpointer.sequence(), 0); // nothing saved yet
        assert_eq!(checkpointer.step(b"c").unwrap(), Verdict::Continue);
        assert_eq!(checkpointer.sequence(), 1); // third call saved
    }

    #[test]
    fn test_stop_after_notice() {
        let dir = tempdir().unwrap();
        let mut checkpointer = test_checkpointer(dir.path());
        checkpointer.notice().raise();
        assert_eq!(checkpointer.step(b"state").unwrap(), Verdict::Stop);
        assert_eq!(checkpointer.phase(), Phase::Done);
    }

    #[test]
    #[should_panic(expected = "finished checkpointer")]
    fn test_step_after_done_panics() {
        let dir = tempdir().unwrap();
        let mut checkpointer = test_checkpointer(dir.path());
        checkpointer.notice().raise();
        let _ = checkpointer.step(b"state");
        let _ = checkpointer.step(b"again");
    }

    #[test]
    fn test_finish_removes_snapshots() {
        let dir = tempdir().unwrap();
        let mut checkpointer = test_checkpointer(dir.path());
        checkpointer.step(b"a").unwrap();
        checkpointer.step(b"b").unwrap();
        checkpointer.finish(true).unwrap();

        let store = SnapshotStore::new(dir.path().join("checkpoints"), "x");
        assert!(store.list("r1").unwrap().is_empty());
    }
}
