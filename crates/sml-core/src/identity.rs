//! Physical file identity — the same file across renames.
//!
//! All resume and rotation logic is keyed by [`FileIdentity`], never by path.
//! A path is only used to find a file; once it is open, the identity rules.
//! An identity change observed across reopens of the same path is how the
//! tailer detects rotation.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use std::fs::Metadata;
use std::io;
use std::path::Path;

/// Identifies a physical file on this host, stable across renames.
///
/// On Unix this is the `(device, inode)` pair. On other systems it degrades
/// to a hash of the canonicalised path, which tracks the path rather than
/// the inode; rotation detection still works through the size-shrank check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileIdentity {
    dev: u64,
    ino: u64,
}

impl FileIdentity {
    /// Derive the identity from already-fetched metadata, avoiding a second
    /// stat that could race with a rename.
    #[cfg(unix)]
    pub fn from_metadata(_path: &Path, meta: &Metadata) -> FileIdentity {
        use std::os::unix::fs::MetadataExt;
        FileIdentity {
            dev: meta.dev(),
            ino: meta.ino(),
        }
    }

    #[cfg(not(unix))]
    pub fn from_metadata(path: &Path, _meta: &Metadata) -> FileIdentity {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let mut hasher = DefaultHasher::new();
        canonical.hash(&mut hasher);
        FileIdentity {
            dev: 0,
            ino: hasher.finish(),
        }
    }

    /// Filename-safe textual key used to name checkpoint documents.
    pub fn base64_key(&self) -> String {
        URL_SAFE_NO_PAD.encode(format!("{}:{}", self.dev, self.ino))
    }
}

/// Stat `path` and return its identity.
pub fn identify(path: &Path) -> io::Result<FileIdentity> {
    let meta = std::fs::metadata(path)?;
    Ok(FileIdentity::from_metadata(path, &meta))
}
