//! OutputManager — the shared component every input feeds into.
//!
//! Receives records (or unparsed text blocks) with their provenance marker,
//! runs the enrichment pipeline, consults the level and dedup gates, and
//! fans out to every configured sink. Owns orderly shutdown: drain, close,
//! poll, abandon.

use crate::digest::md5_signed_decimal;
use crate::level::LevelPolicy;
use crate::sink::Sink;
use sml_core::types::keys;
use sml_core::{InputDescriptor, InputMarker, Record};
use serde_json::Value;
use std::collections::HashMap;
use std::net::UdpSocket;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Longest `log_message` the downstream document stores accept.
pub const MAX_MESSAGE_BYTES: usize = 32765;

/// Tag appended to records whose message was cut down to fit.
pub const TRUNCATED_TAG: &str = "error_message_truncated";

const TRUNCATE_WARN_EVERY: Duration = Duration::from_secs(10);
const CLOSE_POLLS: u32 = 30;

// ---------------------------------------------------------------------------
// Defaults table
// ---------------------------------------------------------------------------

/// Host facts stamped onto records that are missing them.
#[derive(Debug, Clone, Default)]
pub struct DefaultFields {
    pub host: Option<String>,
    pub ip: Option<String>,
}

impl DefaultFields {
    pub fn detect() -> DefaultFields {
        DefaultFields {
            host: gethostname::gethostname().into_string().ok(),
            ip: local_ip(),
        }
    }
}

/// Routing-table source address; no packet leaves the host.
fn local_ip() -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:53").ok()?;
    Some(socket.local_addr().ok()?.ip().to_string())
}

// ---------------------------------------------------------------------------
// OutputManager
// ---------------------------------------------------------------------------

pub struct OutputManager {
    sinks: Vec<Arc<dyn Sink>>,
    level_policy: Arc<dyn LevelPolicy>,
    defaults: DefaultFields,
    doc_counter: AtomicU64,
    truncated: AtomicU64,
    dedup_dropped: AtomicU64,
    /// Per-input digest of the last dispatched message.
    dedup: Mutex<HashMap<String, String>>,
    drain: AtomicBool,
    last_truncate_warn: Mutex<Option<Instant>>,
}

impl OutputManager {
    pub fn new(sinks: Vec<Arc<dyn Sink>>, level_policy: Arc<dyn LevelPolicy>) -> OutputManager {
        OutputManager {
            sinks,
            level_policy,
            defaults: DefaultFields::detect(),
            doc_counter: AtomicU64::new(0),
            truncated: AtomicU64::new(0),
            dedup_dropped: AtomicU64::new(0),
            dedup: Mutex::new(HashMap::new()),
            drain: AtomicBool::new(false),
            last_truncate_warn: Mutex::new(None),
        }
    }

    pub fn is_draining(&self) -> bool {
        self.drain.load(Ordering::SeqCst)
    }

    /// Records dispatched so far in this process.
    pub fn doc_count(&self) -> u64 {
        self.doc_counter.load(Ordering::SeqCst)
    }

    pub fn truncated_count(&self) -> u64 {
        self.truncated.load(Ordering::SeqCst)
    }

    pub fn dedup_dropped_count(&self) -> u64 {
        self.dedup_dropped.load(Ordering::SeqCst)
    }

    // -- record path --------------------------------------------------------

    /// Enrich and dispatch one parsed record.
    pub fn write_record(&self, mut record: Record, marker: &InputMarker) {
        let input = marker.input.as_ref();

        self.apply_context_fields(&mut record, input);
        self.apply_defaults(&mut record, input);
        self.apply_event_digest(&mut record, input);

        record.insert(
            keys::SEQ_NUM,
            self.doc_counter.fetch_add(1, Ordering::SeqCst) + 1,
        );
        record.set_if_absent(keys::EVENT_COUNT, 1);

        if let Some(group) = input.group.as_deref().filter(|g| !g.trim().is_empty()) {
            record.insert(keys::GROUP, group);
        }
        if marker.line_number > 0 {
            record.insert(keys::LOGFILE_LINE_NUMBER, marker.line_number);
        }

        self.truncate_message(&mut record);

        if let Some(message) = record.str_field(keys::LOG_MESSAGE) {
            let digest = md5_signed_decimal(message.as_bytes());
            record.insert(keys::MESSAGE_MD5, digest);
        }

        let level = record
            .str_field(keys::LEVEL)
            .unwrap_or("UNKNOWN")
            .to_string();
        if !self.level_policy.accept(input, &level) {
            return;
        }
        if self.is_duplicate(&record, input) {
            self.dedup_dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        for sink in &self.sinks {
            if !record.contains(keys::ID) {
                record.insert(keys::ID, derive_id(sink.as_ref(), &record));
            }
            if let Err(err) = sink.write_record(&record, marker) {
                error!(sink = %sink.short_description(), %err, "sink write failed");
            }
        }
    }

    // -- unparsed text path -------------------------------------------------

    /// Dispatch an unparsed text block.
    pub fn write_text(&self, text: &str, marker: &InputMarker) {
        if !self.level_policy.accept_text(marker.input.as_ref(), text) {
            return;
        }
        for sink in &self.sinks {
            if let Err(err) = sink.write_text(text, marker) {
                error!(sink = %sink.short_description(), %err, "sink text write failed");
            }
        }
    }

    // -- copy path ----------------------------------------------------------

    /// Hand a whole file to every sink.
    pub fn copy_file(&self, file: &Path, marker: &InputMarker) {
        for sink in &self.sinks {
            if let Err(err) = sink.copy_file(file, marker) {
                error!(
                    sink = %sink.short_description(),
                    file = %file.display(),
                    %err,
                    "sink file copy failed"
                );
            }
        }
    }

    // -- shutdown -----------------------------------------------------------

    /// Drain and close every sink, polling up to 30 seconds before
    /// abandoning stragglers.
    pub async fn close(&self) {
        self.drain.store(true, Ordering::SeqCst);
        for sink in &self.sinks {
            sink.log_stat();
            sink.set_drain(true);
            sink.close();
        }

        for _ in 0..CLOSE_POLLS {
            if self.sinks.iter().all(|sink| sink.is_closed()) {
                info!("all sinks closed");
                return;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        for sink in &self.sinks {
            if !sink.is_closed() {
                warn!(
                    sink = %sink.short_description(),
                    pending = sink.pending(),
                    "sink did not close in time, abandoning"
                );
            }
        }
    }

    // -- enrichment steps ---------------------------------------------------

    fn apply_context_fields(&self, record: &mut Record, input: &InputDescriptor) {
        for (key, value) in &input.add_fields {
            let overwrite_null_cluster =
                key == keys::CLUSTER && record.str_field(keys::CLUSTER) == Some("null");
            if overwrite_null_cluster {
                record.insert(key.clone(), value.clone());
            } else {
                record.set_if_absent(key, value.clone());
            }
        }
    }

    fn apply_defaults(&self, record: &mut Record, input: &InputDescriptor) {
        if input.init_default_fields {
            if let Some(host) = &self.defaults.host {
                record.set_if_absent(keys::HOST, host.clone());
            }
            if let Some(ip) = &self.defaults.ip {
                record.set_if_absent(keys::IP, ip.clone());
            }
            if !input.log_type.is_empty() {
                record.set_if_absent(keys::TYPE, input.log_type.clone());
            }
        }
        record.set_if_absent(keys::LEVEL, "UNKNOWN");
    }

    fn apply_event_digest(&self, record: &mut Record, input: &InputDescriptor) {
        if !input.use_event_md5_as_id && !input.gen_event_md5 {
            return;
        }
        let prefix = match record.get(keys::LOGTIME) {
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::String(s)) => s.clone(),
            _ => String::new(),
        };
        let digest = md5_signed_decimal(&record.canonical_bytes());
        let event_md5 = format!("{prefix}{digest}");
        if input.gen_event_md5 {
            record.insert(keys::EVENT_MD5, event_md5.clone());
        }
        if input.use_event_md5_as_id {
            record.insert(keys::ID, event_md5);
        }
    }

    fn truncate_message(&self, record: &mut Record) {
        let Some(message) = record.str_field(keys::LOG_MESSAGE) else {
            return;
        };
        if message.len() <= MAX_MESSAGE_BYTES {
            return;
        }

        let mut cut = MAX_MESSAGE_BYTES;
        while !message.is_char_boundary(cut) {
            cut -= 1;
        }
        let original_len = message.len();
        let truncated = message[..cut].to_string();
        record.insert(keys::LOG_MESSAGE, truncated);

        match record.remove(keys::TAGS) {
            Some(Value::Array(mut tags)) => {
                tags.push(Value::String(TRUNCATED_TAG.to_string()));
                record.insert(keys::TAGS, tags);
            }
            _ => record.insert(keys::TAGS, vec![TRUNCATED_TAG.to_string()]),
        }

        self.truncated.fetch_add(1, Ordering::SeqCst);
        self.warn_truncated(original_len);
    }

    fn warn_truncated(&self, original_len: usize) {
        let mut last = self.last_truncate_warn.lock().expect("truncate warn lock");
        let due = match *last {
            None => true,
            Some(at) => at.elapsed() >= TRUNCATE_WARN_EVERY,
        };
        if due {
            warn!(
                original_len,
                limit = MAX_MESSAGE_BYTES,
                "log_message truncated to fit"
            );
            *last = Some(Instant::now());
        }
    }

    fn is_duplicate(&self, record: &Record, input: &InputDescriptor) -> bool {
        let Some(digest) = record.str_field(keys::MESSAGE_MD5) else {
            return false;
        };
        let mut cache = self.dedup.lock().expect("dedup lock");
        let previous = cache.insert(input.cache_key(), digest.to_string());
        let duplicate = previous.as_deref() == Some(digest);
        if duplicate {
            debug!(input = %input.cache_key(), "suppressed repeated message");
        }
        duplicate
    }
}

/// Id for a record that reached dispatch without one: a v3 UUID over the
/// sink's id fields, or a random v4 when none of them are present.
fn derive_id(sink: &dyn Sink, record: &Record) -> String {
    let mut seed = String::new();
    for field in sink.id_fields() {
        if let Some(value) = record.get(field) {
            match value {
                Value::String(s) => seed.push_str(s),
                other => seed.push_str(&other.to_string()),
            }
            seed.push('|');
        }
    }
    if seed.is_empty() {
        Uuid::new_v4().to_string()
    } else {
        Uuid::new_v3(&Uuid::NAMESPACE_OID, seed.as_bytes()).to_string()
    }
}
