//! Durable snapshot storage on a shared filesystem.
//!
//! Snapshots are framed blobs keyed by `(run_id, sequence)`, laid out as
//! `<root>/<partition>/<run_id>_<sequence>.ckpt`. The partition is the
//! scheduler job id (or the date outside a scheduler session), so a lineage
//! that survives several requeues spans several partitions; reads scan all
//! of them, writes go to the store's own partition.
//!
//! Writes go to a temporary sibling first and are renamed into place after
//! `sync_all`, so a crash mid-save never masquerades as a valid snapshot.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Magic bytes identifying a snapshot file.
const SNAPSHOT_MAGIC: &[u8; 4] = b"RPSN";

/// Current frame format version.
const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Header size: magic(4) + version(4) + crc32(4) + length(8).
const SNAPSHOT_HEADER_SIZE: usize = 20;

const SNAPSHOT_EXTENSION: &str = ".ckpt";

/// Errors from the snapshot store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// I/O failure (disk full, permissions). Retryable at the periodic-save
    /// layer; the previously written snapshot is untouched.
    #[error("snapshot storage failed ({context}): {source}")]
    Storage {
        context: String,
        #[source]
        source: io::Error,
    },
    /// No snapshot exists for the given key.
    #[error("no snapshot for run {run_id} at sequence {sequence}")]
    NotFound { run_id: String, sequence: u64 },
    /// The blob exists but fails the frame integrity check.
    #[error("corrupt snapshot {}: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },
}

impl StoreError {
    fn storage(context: impl Into<String>, source: io::Error) -> Self {
        Self::Storage {
            context: context.into(),
            source,
        }
    }
}

/// Content-addressed-by-sequence snapshot store.
pub struct SnapshotStore {
    root: PathBuf,
    partition: String,
}

impl SnapshotStore {
    /// Create a store writing into `root/partition`. No I/O happens until
    /// the first save.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, partition: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            partition: partition.into(),
        }
    }

    /// The checkpoint root this store operates on.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic path for a snapshot written by this store.
    #[must_use]
    pub fn path_for(&self, run_id: &str, sequence: u64) -> PathBuf {
        self.root
            .join(&self.partition)
            .join(snapshot_file_name(run_id, sequence))
    }

    /// Write a snapshot durably and return its path.
    ///
    /// The payload is framed with a checksum, written to a temporary file,
    /// flushed to disk, and renamed into place. The returned path exists and
    /// is fully written once this returns `Ok`.
    pub fn save(&self, run_id: &str, sequence: u64, payload: &[u8]) -> Result<PathBuf, StoreError> {
        let path = self.path_for(run_id, sequence);
        let dir = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir)
            .map_err(|e| StoreError::storage(format!("creating {}", dir.display()), e))?;

        let tmp = path.with_file_name(format!(
            "{}.tmp",
            snapshot_file_name(run_id, sequence)
        ));
        let framed = encode_frame(payload);
        {
            let mut file = File::create(&tmp)
                .map_err(|e| StoreError::storage(format!("creating {}", tmp.display()), e))?;
            file.write_all(&framed)
                .map_err(|e| StoreError::storage(format!("writing {}", tmp.display()), e))?;
            file.sync_all()
                .map_err(|e| StoreError::storage(format!("flushing {}", tmp.display()), e))?;
        }
        fs::rename(&tmp, &path)
            .map_err(|e| StoreError::storage(format!("renaming into {}", path.display()), e))?;

        Ok(path)
    }

    /// Sequence numbers of all snapshots of a lineage, ascending.
    ///
    /// Scans every partition under the root; an empty result means no prior
    /// checkpoint exists and the run starts fresh.
    pub fn list(&self, run_id: &str) -> Result<Vec<u64>, StoreError> {
        let mut sequences = Vec::new();
        for path in self.lineage_files(run_id)? {
            if let Some(name) = path.file_name().and_then(|n| n.to_str())
                && let Some(sequence) = parse_sequence(name, run_id)
            {
                sequences.push(sequence);
            }
        }
        sequences.sort_unstable();
        sequences.dedup();
        Ok(sequences)
    }

    /// Load and verify a snapshot payload.
    pub fn load(&self, run_id: &str, sequence: u64) -> Result<Vec<u8>, StoreError> {
        let path = self.find(run_id, sequence)?;
        let bytes = fs::read(&path)
            .map_err(|e| StoreError::storage(format!("reading {}", path.display()), e))?;
        decode_frame(&bytes).map(<[u8]>::to_vec).map_err(|reason| {
            StoreError::Corrupt {
                path,
                reason,
            }
        })
    }

    /// Remove a snapshot. Best-effort from the coordinator's point of view:
    /// it only ever runs after a newer snapshot is confirmed on disk, so a
    /// failure wastes space but never correctness.
    pub fn delete(&self, run_id: &str, sequence: u64) -> Result<(), StoreError> {
        let path = self.find(run_id, sequence)?;
        fs::remove_file(&path)
            .map_err(|e| StoreError::storage(format!("removing {}", path.display()), e))
    }

    /// Locate an existing snapshot in any partition.
    fn find(&self, run_id: &str, sequence: u64) -> Result<PathBuf, StoreError> {
        let own = self.path_for(run_id, sequence);
        if own.is_file() {
            return Ok(own);
        }
        let name = snapshot_file_name(run_id, sequence);
        for partition in partitions(&self.root)? {
            let candidate = partition.join(&name);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
        Err(StoreError::NotFound {
            run_id: run_id.to_string(),
            sequence,
        })
    }

    /// All snapshot files of a lineage across partitions.
    fn lineage_files(&self, run_id: &str) -> Result<Vec<PathBuf>, StoreError> {
        let mut files = Vec::new();
        for partition in partitions(&self.root)? {
            let Ok(entries) = fs::read_dir(&partition) else {
                continue;
            };
            for entry in entries.filter_map(Result::ok) {
                let path = entry.path();
                if path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .and_then(|n| parse_sequence(n, run_id))
                    .is_some()
                {
                    files.push(path);
                }
            }
        }
        Ok(files)
    }
}

/// Run ids that have at least one snapshot under `root`.
pub fn run_ids(root: &Path) -> Result<Vec<String>, StoreError> {
    let mut ids = Vec::new();
    for partition in partitions(root)? {
        let Ok(entries) = fs::read_dir(&partition) else {
            continue;
        };
        for entry in entries.filter_map(Result::ok) {
            if let Some(name) = entry.file_name().to_str()
                && let Some(stem) = name.strip_suffix(SNAPSHOT_EXTENSION)
                && let Some((run_id, sequence)) = stem.rsplit_once('_')
                && sequence.parse::<u64>().is_ok()
            {
                ids.push(run_id.to_string());
            }
        }
    }
    ids.sort_unstable();
    ids.dedup();
    Ok(ids)
}

/// Partition directories under the root. A missing root is an empty store.
fn partitions(root: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::storage(format!("reading {}", root.display()), e)),
    };
    Ok(entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect())
}

fn snapshot_file_name(run_id: &str, sequence: u64) -> String {
    format!("{run_id}_{sequence:08}{SNAPSHOT_EXTENSION}")
}

fn parse_sequence(file_name: &str, run_id: &str) -> Option<u64> {
    file_name
        .strip_prefix(run_id)?
        .strip_prefix('_')?
        .strip_suffix(SNAPSHOT_EXTENSION)?
        .parse()
        .ok()
}

/// Frame a payload: magic, version, checksum, length, payload.
fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(SNAPSHOT_HEADER_SIZE + payload.len());
    framed.extend_from_slice(SNAPSHOT_MAGIC);
    framed.extend_from_slice(&SNAPSHOT_FORMAT_VERSION.to_le_bytes());
    framed.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    framed.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    framed.extend_from_slice(payload);
    framed
}

/// Validate a frame and return the payload. The error string names the
/// first failed check; all failures mean the same thing to the caller: the
/// snapshot is not trustworthy.
fn decode_frame(bytes: &[u8]) -> Result<&[u8], String> {
    if bytes.len() < SNAPSHOT_HEADER_SIZE {
        return Err(format!(
            "file too small: {} bytes (header is {SNAPSHOT_HEADER_SIZE})",
            bytes.len()
        ));
    }
    if &bytes[0..4] != SNAPSHOT_MAGIC {
        return Err("bad magic bytes".to_string());
    }
    let version = u32::from_le_bytes(bytes[4..8].try_into().map_err(|_| "short header")?);
    if version > SNAPSHOT_FORMAT_VERSION {
        return Err(format!(
            "unsupported format version {version} (supported up to {SNAPSHOT_FORMAT_VERSION})"
        ));
    }
    let stored_crc = u32::from_le_bytes(bytes[8..12].try_into().map_err(|_| "short header")?);
    let declared_len = u64::from_le_bytes(bytes[12..20].try_into().map_err(|_| "short header")?);

    let payload = &bytes[SNAPSHOT_HEADER_SIZE..];
    if declared_len != payload.len() as u64 {
        return Err(format!(
            "length mismatch: declared {declared_len}, actual {} (truncated write)",
            payload.len()
        ));
    }
    let computed = crc32fast::hash(payload);
    if stored_crc != computed {
        return Err(format!(
            "checksum mismatch: stored {stored_crc:#010x}, computed {computed:#010x}"
        ));
    }
    Ok(payload)
}
