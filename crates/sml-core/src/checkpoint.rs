//! Durable resume points keyed by [`FileIdentity`].
//!
//! One small JSON document per identity under the checkpoint directory,
//! filename `base64_key + extension`. Writes go through a temp file and a
//! rename so a reader never observes a partial document. Corrupt documents
//! are logged and treated as missing.
//!
//! Each identity is written only by its owning tailer, so the store needs no
//! locking beyond the filesystem's rename atomicity.

use crate::identity::FileIdentity;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_EXTENSION: &str = ".cp";

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("checkpoint serialization: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// The persisted document for one file identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub file_path: String,
    pub file_key_base64: String,
    pub byte_offset: u64,
    pub line_number: u64,
    pub last_ingest_ms: i64,
}

// ---------------------------------------------------------------------------
// CheckpointStore
// ---------------------------------------------------------------------------

/// Reads and writes checkpoint documents under a sidecar directory.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
    extension: String,
}

impl CheckpointStore {
    /// Open (creating if needed) the checkpoint directory.
    pub fn open(dir: impl Into<PathBuf>, extension: &str) -> Result<CheckpointStore, CheckpointError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(CheckpointStore {
            dir,
            extension: extension.to_string(),
        })
    }

    fn document_path(&self, identity: &FileIdentity) -> PathBuf {
        self.dir
            .join(format!("{}{}", identity.base64_key(), self.extension))
    }

    /// Load the stored document for `identity`, tolerating absence and
    /// corruption.
    pub fn load(&self, identity: &FileIdentity) -> Option<CheckpointRecord> {
        let path = self.document_path(identity);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                warn!(path = %path.display(), %err, "failed to read checkpoint, resuming from start");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(path = %path.display(), %err, "corrupt checkpoint, resuming from start");
                None
            }
        }
    }

    /// Resume point for `identity`: `(byte_offset, line_number)`, or `(0, 0)`
    /// when no usable document exists.
    pub fn resume(&self, identity: &FileIdentity) -> (u64, u64) {
        self.load(identity)
            .map(|record| (record.byte_offset, record.line_number))
            .unwrap_or((0, 0))
    }

    /// Persist a resume point. A commit that would move `line_number`
    /// backwards for the same identity is rejected as a no-op.
    pub fn commit(
        &self,
        identity: &FileIdentity,
        file_path: &Path,
        byte_offset: u64,
        line_number: u64,
    ) -> Result<(), CheckpointError> {
        if let Some(existing) = self.load(identity) {
            if existing.line_number > line_number {
                debug!(
                    path = %file_path.display(),
                    stored = existing.line_number,
                    offered = line_number,
                    "rejecting non-monotonic checkpoint"
                );
                return Ok(());
            }
        }

        let record = CheckpointRecord {
            file_path: file_path.display().to_string(),
            file_key_base64: identity.base64_key(),
            byte_offset,
            line_number,
            last_ingest_ms: chrono::Utc::now().timestamp_millis(),
        };

        let path = self.document_path(identity);
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec(&record)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Forget the stored document for `identity`. Used when a tailer finds
    /// the resume offset beyond the file size — the identity was reused and
    /// the monotonic rule must not pin the stale line number.
    pub fn reset(&self, identity: &FileIdentity) {
        let path = self.document_path(identity);
        match std::fs::remove_file(&path) {
            Ok(()) => debug!(path = %path.display(), "reset checkpoint"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = %path.display(), %err, "cannot reset checkpoint"),
        }
    }

    /// Remove documents whose `file_path` no longer exists. Returns the
    /// number of documents pruned.
    pub fn prune_stale(&self) -> usize {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(dir = %self.dir.display(), %err, "cannot scan checkpoint directory");
                return 0;
            }
        };

        let mut pruned = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map(|e| format!(".{}", e.to_string_lossy()))
                != Some(self.extension.clone())
            {
                continue;
            }
            let Ok(bytes) = std::fs::read(&path) else { continue };
            let Ok(record) = serde_json::from_slice::<CheckpointRecord>(&bytes) else {
                continue;
            };
            if !Path::new(&record.file_path).exists() {
                if std::fs::remove_file(&path).is_ok() {
                    debug!(file = %record.file_path, "pruned stale checkpoint");
                    pruned += 1;
                }
            }
        }
        pruned
    }
}

// ---------------------------------------------------------------------------
// CheckpointCursor
// ---------------------------------------------------------------------------

/// Per-tailer checkpoint book-keeping: owns the write throttle for one
/// identity. `check_in` persists at most once per interval; `last_check_in`
/// flushes unconditionally on close.
///
/// Checkpoint I/O failures are logged, never propagated — the tailer keeps
/// going at the risk of replay.
pub struct CheckpointCursor {
    store: Arc<CheckpointStore>,
    identity: FileIdentity,
    path: PathBuf,
    interval: Duration,
    last_write: Option<Instant>,
}

impl CheckpointCursor {
    pub fn new(
        store: Arc<CheckpointStore>,
        identity: FileIdentity,
        path: impl Into<PathBuf>,
        interval: Duration,
    ) -> CheckpointCursor {
        CheckpointCursor {
            store,
            identity,
            path: path.into(),
            interval,
            last_write: None,
        }
    }

    pub fn resume(&self) -> (u64, u64) {
        self.store.resume(&self.identity)
    }

    /// Persist if the interval has elapsed since the last write.
    pub fn check_in(&mut self, byte_offset: u64, line_number: u64) {
        let due = match self.last_write {
            None => true,
            Some(at) => at.elapsed() >= self.interval,
        };
        if due {
            self.write(byte_offset, line_number);
        }
    }

    /// Persist regardless of the interval. Called on every tailer exit path.
    pub fn last_check_in(&mut self, byte_offset: u64, line_number: u64) {
        self.write(byte_offset, line_number);
    }

    fn write(&mut self, byte_offset: u64, line_number: u64) {
        if let Err(err) = self
            .store
            .commit(&self.identity, &self.path, byte_offset, line_number)
        {
            warn!(path = %self.path.display(), %err, "checkpoint write failed");
        }
        self.last_write = Some(Instant::now());
    }
}
