//! Core types shared across the tailing and output layers: the declared
//! input, the per-line provenance marker, and the enriched record.

use crate::identity::FileIdentity;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Reserved record keys written by the output manager.
pub mod keys {
    pub const ID: &str = "id";
    pub const SEQ_NUM: &str = "seq_num";
    pub const EVENT_MD5: &str = "event_md5";
    pub const EVENT_COUNT: &str = "event_count";
    pub const GROUP: &str = "group";
    pub const LEVEL: &str = "level";
    pub const LOG_MESSAGE: &str = "log_message";
    pub const MESSAGE_MD5: &str = "message_md5";
    pub const LOGTIME: &str = "logtime";
    pub const LOGFILE_LINE_NUMBER: &str = "logfile_line_number";
    pub const TAGS: &str = "tags";
    pub const CLUSTER: &str = "cluster";
    pub const TYPE: &str = "type";
    pub const HOST: &str = "host";
    pub const IP: &str = "ip";
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// An enriched log record: field name → value.
///
/// Backed by a `BTreeMap` so serialization is key-sorted; the sorted JSON
/// byte form is the canonical input to the event digest.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Record(BTreeMap<String, Value>);

impl Record {
    pub fn new() -> Record {
        Record::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Insert only when the key is absent.
    pub fn set_if_absent(&mut self, key: &str, value: impl Into<Value>) {
        if !self.0.contains_key(key) {
            self.0.insert(key.to_string(), value.into());
        }
    }

    /// The field as a string slice, when it holds a JSON string.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Key-sorted JSON bytes, the canonical serialization for digests.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&self.0).expect("record serialization cannot fail")
    }
}

impl From<BTreeMap<String, Value>> for Record {
    fn from(map: BTreeMap<String, Value>) -> Record {
        Record(map)
    }
}

// ---------------------------------------------------------------------------
// InputDescriptor
// ---------------------------------------------------------------------------

/// Immutable configuration for one declared input, deserialized from an
/// `[[inputs]]` entry in the config file.
///
/// Interval fields suffixed `_sec` are seconds, exactly as named.
#[derive(Debug, Clone, Deserialize)]
pub struct InputDescriptor {
    /// Log type of this input; keys the container registry lookup and feeds
    /// the `type` default field.
    #[serde(default)]
    pub log_type: String,
    /// Glob-capable path pattern. Exclusive with `docker_enabled`.
    #[serde(default)]
    pub path: Option<String>,
    /// Discover files through the container registry instead of a path.
    #[serde(default)]
    pub docker_enabled: bool,
    /// Follow the file as it grows; `false` means one-shot processing.
    #[serde(default = "default_true")]
    pub tail: bool,
    /// Read and parse lines. `false` with `copy_file` hands whole files to
    /// the sinks instead.
    #[serde(default = "default_true")]
    pub process_file: bool,
    #[serde(default)]
    pub copy_file: bool,
    #[serde(default = "default_checkpoint_interval_ms")]
    pub checkpoint_interval_ms: u64,
    #[serde(default = "default_detach_interval_sec")]
    pub detach_interval_sec: u64,
    #[serde(default = "default_detach_time_sec")]
    pub detach_time_sec: u64,
    #[serde(default = "default_path_update_interval_sec")]
    pub path_update_interval_sec: u64,
    /// Skip files whose modification time is older than this many minutes.
    /// `0` disables the gate.
    #[serde(default)]
    pub max_age_min: u64,
    /// Context fields stamped onto every record from this input.
    #[serde(default)]
    pub add_fields: BTreeMap<String, String>,
    #[serde(default)]
    pub group: Option<String>,
    /// Allowed levels for this input, most severe last. Empty accepts all.
    #[serde(default)]
    pub default_log_levels: Vec<String>,
    #[serde(default)]
    pub use_event_md5_as_id: bool,
    #[serde(default)]
    pub gen_event_md5: bool,
    #[serde(default = "default_true")]
    pub init_default_fields: bool,
}

fn default_true() -> bool { true }
fn default_checkpoint_interval_ms() -> u64 { 5000 }
fn default_detach_interval_sec() -> u64 { 18000 }
fn default_detach_time_sec() -> u64 { 120_000 }
fn default_path_update_interval_sec() -> u64 { 300 }

impl Default for InputDescriptor {
    fn default() -> InputDescriptor {
        InputDescriptor {
            log_type: String::new(),
            path: None,
            docker_enabled: false,
            tail: true,
            process_file: true,
            copy_file: false,
            checkpoint_interval_ms: default_checkpoint_interval_ms(),
            detach_interval_sec: default_detach_interval_sec(),
            detach_time_sec: default_detach_time_sec(),
            path_update_interval_sec: default_path_update_interval_sec(),
            max_age_min: 0,
            add_fields: BTreeMap::new(),
            group: None,
            default_log_levels: Vec::new(),
            use_event_md5_as_id: false,
            gen_event_md5: false,
            init_default_fields: true,
        }
    }
}

impl InputDescriptor {
    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_millis(self.checkpoint_interval_ms)
    }

    pub fn detach_interval(&self) -> Duration {
        Duration::from_secs(self.detach_interval_sec)
    }

    pub fn detach_time(&self) -> Duration {
        Duration::from_secs(self.detach_time_sec)
    }

    pub fn path_update_interval(&self) -> Duration {
        Duration::from_secs(self.path_update_interval_sec)
    }

    /// Stable key for per-input caches (dedup, metrics).
    pub fn cache_key(&self) -> String {
        match &self.path {
            Some(path) => format!("{}:{}", self.log_type, path),
            None => format!("{}:docker", self.log_type),
        }
    }

    /// Deep-copy this descriptor with the path overridden — the
    /// clone-a-supervisor pattern used when spawning per-file children.
    pub fn for_path(&self, path: impl Into<String>) -> InputDescriptor {
        let mut child = self.clone();
        child.path = Some(path.into());
        child.docker_enabled = false;
        child
    }
}

// ---------------------------------------------------------------------------
// InputMarker
// ---------------------------------------------------------------------------

/// Provenance attached to every line handed to the filter chain and every
/// record handed to the output manager.
#[derive(Debug, Clone)]
pub struct InputMarker {
    /// Non-owning back-reference to the declared input.
    pub input: Arc<InputDescriptor>,
    pub file_identity: Option<FileIdentity>,
    pub base64_key: Option<String>,
    /// 1-based line number within the file; `0` for non-line events
    /// (copied files, unparsed text blocks).
    pub line_number: u64,
    /// Extra provenance, e.g. container id and labels in container mode.
    pub properties: BTreeMap<String, String>,
}

impl InputMarker {
    pub fn new(input: Arc<InputDescriptor>) -> InputMarker {
        InputMarker {
            input,
            file_identity: None,
            base64_key: None,
            line_number: 0,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_line(mut self, line_number: u64) -> InputMarker {
        self.line_number = line_number;
        self
    }
}
