//! In-memory sink recording everything the output manager dispatches.

use sml_core::{InputMarker, Record};
use sml_output::Sink;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub struct MemorySink {
    records: Mutex<Vec<Record>>,
    texts: Mutex<Vec<String>>,
    copied: Mutex<Vec<PathBuf>>,
    closed: AtomicBool,
    drain: AtomicBool,
    id_fields: Vec<String>,
}

impl MemorySink {
    pub fn new() -> Arc<MemorySink> {
        MemorySink::with_id_fields(Vec::new())
    }

    pub fn with_id_fields(id_fields: Vec<String>) -> Arc<MemorySink> {
        Arc::new(MemorySink {
            records: Mutex::new(Vec::new()),
            texts: Mutex::new(Vec::new()),
            copied: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            drain: AtomicBool::new(false),
            id_fields,
        })
    }

    pub fn records(&self) -> Vec<Record> {
        self.records.lock().unwrap().clone()
    }

    /// The `log_message` field of every record, in dispatch order.
    pub fn messages(&self) -> Vec<String> {
        self.records()
            .iter()
            .filter_map(|record| record.str_field("log_message").map(str::to_string))
            .collect()
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }

    pub fn copied(&self) -> Vec<PathBuf> {
        self.copied.lock().unwrap().clone()
    }

    /// Poll until `n` records have arrived; panics with what *did* arrive on
    /// timeout.
    pub async fn wait_for_records(&self, n: usize, timeout: Duration) -> Vec<Record> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let records = self.records();
            if records.len() >= n {
                return records;
            }
            if std::time::Instant::now() > deadline {
                panic!(
                    "timed out waiting for {n} records; got {}: {:?}",
                    records.len(),
                    self.messages()
                );
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }
}

impl Sink for MemorySink {
    fn write_record(&self, record: &Record, _marker: &InputMarker) -> anyhow::Result<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }

    fn write_text(&self, text: &str, _marker: &InputMarker) -> anyhow::Result<()> {
        self.texts.lock().unwrap().push(text.to_string());
        Ok(())
    }

    fn copy_file(&self, file: &Path, _marker: &InputMarker) -> anyhow::Result<()> {
        self.copied.lock().unwrap().push(file.to_path_buf());
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn set_drain(&self, drain: bool) {
        self.drain.store(drain, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn pending(&self) -> usize {
        0
    }

    fn id_fields(&self) -> &[String] {
        &self.id_fields
    }

    fn short_description(&self) -> String {
        "memory".to_string()
    }
}
