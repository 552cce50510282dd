#![warn(clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

//! Preemption-safe checkpoint and requeue coordination.
//!
//! Runs inside the worker process of a preemptible cluster job. Persists
//! periodic snapshots of the run's mutable state, listens for the relayed
//! pre-termination signal, performs a final snapshot and requeues the job
//! when it arrives, and restores the latest valid snapshot on (re)start.
//!
//! One call per unit of work is the whole integration surface:
//!
//! ```no_run
//! use reprise_config::CheckpointConfig;
//! use reprise_coordinator::{Checkpointer, Verdict};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut checkpointer = Checkpointer::new(CheckpointConfig::new("run-1"))?;
//!
//! // Resume path: restored state, or the initial state on a fresh start.
//! let mut epoch: u32 = match checkpointer.restored_state() {
//!     Some(bytes) => u32::from_le_bytes(bytes.try_into()?),
//!     None => 0,
//! };
//!
//! while epoch < 10 {
//!     // ... one epoch of work ...
//!     epoch += 1;
//!     if checkpointer.step(&epoch.to_le_bytes())? == Verdict::Stop {
//!         // Final snapshot is saved and the requeue issued; just exit.
//!         return Ok(());
//!     }
//! }
//! checkpointer.finish(true)?;
//! # Ok(())
//! # }
//! ```

pub mod checkpointer;
pub mod notice;
pub mod requeue;
pub mod store;

pub use checkpointer::{
    CheckpointError, Checkpointer, LineageSummary, Phase, Restored, ResumeMode, SnapshotDetails,
    Verdict, describe_lineage,
};
pub use notice::TerminationNotice;
pub use requeue::{RequeueCommand, RequeueError};
pub use store::{SnapshotStore, StoreError};
