//! Sink seam — destinations for enriched records — and the shipped
//! [`JsonlSink`].
//!
//! Sinks own their synchronization; the output manager calls them from
//! whichever tailer task produced the record. Back-pressure is the sink's
//! problem: the core only reads `pending()` at shutdown to decide when to
//! abandon a drain.

use sml_core::{InputMarker, Record};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{debug, info};

/// A destination for enriched records, unparsed text blocks, and copied
/// files.
pub trait Sink: Send + Sync {
    fn write_record(&self, record: &Record, marker: &InputMarker) -> anyhow::Result<()>;
    fn write_text(&self, text: &str, marker: &InputMarker) -> anyhow::Result<()>;
    fn copy_file(&self, file: &Path, marker: &InputMarker) -> anyhow::Result<()>;

    fn close(&self);
    fn set_drain(&self, drain: bool);
    fn is_closed(&self) -> bool;

    /// Records accepted but not yet durable downstream.
    fn pending(&self) -> usize;

    /// Fields from which a missing record `id` is derived for this sink.
    fn id_fields(&self) -> &[String] {
        &[]
    }

    fn short_description(&self) -> String;

    /// Periodic stats, at debug level.
    fn log_stat(&self) {}
}

// ---------------------------------------------------------------------------
// JsonlSink
// ---------------------------------------------------------------------------

/// Appends each record as one JSON line to a local file. The agent's default
/// destination; `copy_file` drops a copy of the source file next to it.
pub struct JsonlSink {
    path: PathBuf,
    file: Mutex<File>,
    id_fields: Vec<String>,
    closed: AtomicBool,
    drain: AtomicBool,
    written: AtomicU64,
}

impl JsonlSink {
    pub fn create(path: impl Into<PathBuf>, id_fields: Vec<String>) -> anyhow::Result<JsonlSink> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(JsonlSink {
            path,
            file: Mutex::new(file),
            id_fields,
            closed: AtomicBool::new(false),
            drain: AtomicBool::new(false),
            written: AtomicU64::new(0),
        })
    }

    fn append(&self, line: &str) -> anyhow::Result<()> {
        let mut file = self.file.lock().expect("jsonl sink lock");
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        self.written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl Sink for JsonlSink {
    fn write_record(&self, record: &Record, _marker: &InputMarker) -> anyhow::Result<()> {
        self.append(&serde_json::to_string(record)?)
    }

    fn write_text(&self, text: &str, _marker: &InputMarker) -> anyhow::Result<()> {
        self.append(&serde_json::to_string(&serde_json::json!({ "log_message": text }))?)
    }

    fn copy_file(&self, file: &Path, _marker: &InputMarker) -> anyhow::Result<()> {
        let name = file
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("copy_file needs a file name: {}", file.display()))?;
        let dest = self
            .path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(name);
        std::fs::copy(file, &dest)?;
        info!(from = %file.display(), to = %dest.display(), "copied file to sink");
        Ok(())
    }

    fn close(&self) {
        if let Ok(file) = self.file.lock() {
            let _ = file.sync_all();
        }
        self.closed.store(true, Ordering::SeqCst);
    }

    fn set_drain(&self, drain: bool) {
        self.drain.store(drain, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn pending(&self) -> usize {
        // Writes are synchronous; nothing queues.
        0
    }

    fn id_fields(&self) -> &[String] {
        &self.id_fields
    }

    fn short_description(&self) -> String {
        format!("jsonl:{}", self.path.display())
    }

    fn log_stat(&self) {
        debug!(
            sink = %self.short_description(),
            written = self.written.load(Ordering::Relaxed),
            "sink stats"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sml_core::InputDescriptor;
    use std::sync::Arc;

    fn marker() -> InputMarker {
        InputMarker::new(Arc::new(InputDescriptor::default()))
    }

    #[test]
    fn records_append_as_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlSink::create(dir.path().join("out.jsonl"), vec![]).unwrap();

        let mut record = Record::new();
        record.insert("log_message", "hello");
        sink.write_record(&record, &marker()).unwrap();
        sink.write_record(&record, &marker()).unwrap();
        sink.close();

        let body = std::fs::read_to_string(dir.path().join("out.jsonl")).unwrap();
        assert_eq!(body.lines().count(), 2);
        assert!(sink.is_closed());
    }

    #[test]
    fn copy_file_lands_next_to_the_sink() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlSink::create(dir.path().join("out/out.jsonl"), vec![]).unwrap();

        let src = dir.path().join("app.log.1.gz");
        std::fs::write(&src, b"payload").unwrap();
        sink.copy_file(&src, &marker()).unwrap();

        assert_eq!(
            std::fs::read(dir.path().join("out/app.log.1.gz")).unwrap(),
            b"payload"
        );
    }
}
