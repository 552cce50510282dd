#![warn(clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

//! Signal relay for preemptible cluster jobs.
//!
//! The scheduler delivers its pre-termination notification to the process
//! it launched (this one), not necessarily to the worker doing the actual
//! compute. The relay launches the worker, looks up the worker's PID record
//! when the notification arrives, and re-sends the signal until the worker
//! has exited, then leaves with the worker's exit status so the batch system
//! sees the real outcome.

pub mod forward;
pub mod pidfile;
pub mod supervisor;

pub use pidfile::PidRecordError;
pub use supervisor::Supervisor;

/// Errors from the relay.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("no worker command given")]
    NoWorkerCommand,
    #[error("failed to spawn worker {0}: {1}")]
    Spawn(String, #[source] std::io::Error),
    #[error("failed to install signal handler: {0}")]
    Signal(#[source] std::io::Error),
    #[error("failed to wait for worker: {0}")]
    Wait(#[source] std::io::Error),
    #[error("could not deliver termination notice: {0}")]
    SignalDelivery(String),
    #[error(transparent)]
    PidRecord(#[from] PidRecordError),
}
