//! The PID record: the one piece of state shared between the relay and the
//! worker it supervises. Written once by the worker, read here, removed
//! after the worker exits.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Errors around the PID record.
#[derive(Debug, thiserror::Error)]
pub enum PidRecordError {
    #[error("failed to read PID record {0}: {1}")]
    Io(PathBuf, #[source] io::Error),
    #[error("PID record {0} does not contain a process id: {1:?}")]
    Parse(PathBuf, String),
}

/// Read the worker process id from the record.
pub fn read(path: &Path) -> Result<u32, PidRecordError> {
    let content =
        fs::read_to_string(path).map_err(|e| PidRecordError::Io(path.to_path_buf(), e))?;
    content
        .trim()
        .parse()
        .map_err(|_| PidRecordError::Parse(path.to_path_buf(), content))
}

/// Remove the record after the worker has exited. A record that is already
/// gone is fine.
pub fn remove(path: &Path) -> Result<(), PidRecordError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PidRecordError::Io(path.to_path_buf(), e)),
    }
}

/// Check whether a process exists. Signal 0 probes without delivering.
#[must_use]
pub fn process_alive(pid: u32) -> bool {
    // SAFETY: kill with signal 0 only checks for process existence.
    unsafe { libc::kill(pid_t(pid), 0) == 0 }
}

/// Convert a PID for libc, which takes a signed id.
#[must_use]
pub fn pid_t(pid: u32) -> libc::pid_t {
    libc::pid_t::try_from(pid).unwrap_or(libc::pid_t::MAX)
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_read_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("42.pid");
        fs::write(&path, "4242\n").unwrap();
        assert_eq!(read(&path).unwrap(), 4242);
    }

    #[test]
    fn test_read_missing_is_io_error() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            read(&dir.path().join("nope.pid")),
            Err(PidRecordError::Io(..))
        ));
    }

    #[test]
    fn test_read_garbage_is_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("42.pid");
        fs::write(&path, "not a pid\n").unwrap();
        assert!(matches!(read(&path), Err(PidRecordError::Parse(..))));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("42.pid");
        fs::write(&path, "1\n").unwrap();
        remove(&path).unwrap();
        remove(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_own_process_is_alive() {
        assert!(process_alive(std::process::id()));
    }
}
