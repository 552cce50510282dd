//! Worker-side checkpoint configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Configuration for the checkpoint coordinator.
///
/// Passed explicitly at construction; there is no process-wide global state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Stable identifier of this run lineage; survives requeues.
    pub run_id: String,
    /// Root directory for snapshots, shared-filesystem visible.
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// Save a snapshot every this many `step` calls.
    #[serde(default = "default_save_interval")]
    pub save_interval: u64,
    /// Directory for the PID record.
    #[serde(default = "default_pid_dir")]
    pub pid_dir: PathBuf,
    /// Opaque hyperparameters recorded at construction for the external
    /// tracker; never interpreted by the coordinator.
    #[serde(default)]
    pub hyperparams: Option<serde_json::Value>,
}

impl CheckpointConfig {
    /// Create a configuration with defaults for everything but the run id.
    #[must_use]
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            root: default_root(),
            save_interval: default_save_interval(),
            pid_dir: default_pid_dir(),
            hyperparams: None,
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from("./checkpoints")
}

fn default_save_interval() -> u64 {
    1
}

fn default_pid_dir() -> PathBuf {
    PathBuf::from(".")
}
