//! Settings for the outer relay process, loaded from TOML.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level relay settings file.
#[derive(Debug, Clone, Deserialize)]
struct RelayFile {
    #[serde(default)]
    relay: RelaySettings,
}

/// Settings for the signal relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySettings {
    /// Directory where the worker's PID record is expected.
    #[serde(default = "default_pid_dir")]
    pub pid_dir: PathBuf,
    /// Signal forwarded to the worker as the termination notice.
    #[serde(default)]
    pub forward_signal: ForwardSignal,
    /// Interval between forwarding retries, in milliseconds.
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    /// `RUST_LOG` value to pass to the worker process.
    #[serde(default)]
    pub rust_log: Option<String>,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            pid_dir: default_pid_dir(),
            forward_signal: ForwardSignal::default(),
            retry_interval_ms: default_retry_interval_ms(),
            rust_log: None,
        }
    }
}

impl RelaySettings {
    /// Load settings from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().display().to_string(), e))?;
        let file: RelayFile =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(file.relay)
    }
}

/// Which signal the relay forwards to the worker.
///
/// SIGUSR1 is the scheduler's pre-termination notification; SIGTERM is
/// accepted as a generic termination request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForwardSignal {
    #[default]
    Usr1,
    Term,
}

/// Errors that can occur when loading settings.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read settings file {0}: {1}")]
    Io(String, std::io::Error),
    #[error("failed to parse settings: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_load_with_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        std::fs::write(
            &path,
            r#"
[relay]
retry_interval_ms = 250
"#,
        )
        .unwrap();

        let settings = RelaySettings::load(&path).unwrap();
        assert_eq!(settings.retry_interval_ms, 250);
        assert_eq!(settings.forward_signal, ForwardSignal::Usr1);
        assert_eq!(settings.pid_dir, PathBuf::from("."));
    }

    #[test]
    fn test_load_empty_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        std::fs::write(&path, "").unwrap();

        let settings = RelaySettings::load(&path).unwrap();
        assert_eq!(settings.retry_interval_ms, 1000);
    }

    #[test]
    fn test_load_rejects_bad_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        std::fs::write(&path, "[relay\nretry_interval_ms = x").unwrap();

        assert!(matches!(
            RelaySettings::load(&path),
            Err(ConfigError::Parse(_))
        ));
    }
}

fn default_pid_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_retry_interval_ms() -> u64 {
    1000
}
