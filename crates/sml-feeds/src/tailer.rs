//! Per-file tailer — one worker per concrete file.
//!
//! Opens at the checkpointed resume point, emits each newline-delimited line
//! into its cloned filter chain, and checkpoints at most once per configured
//! interval plus once on every exit path. At EOF in follow mode it sleeps a
//! bounded interval (backing off to one second) and re-stats the file to
//! catch truncation and rotation; either one terminates the tailer so the
//! supervisor can respawn against the new identity.
//!
//! Crash semantics are at-least-once within a file: the checkpoint records
//! the offset after the last handed-off line, so a crash between dispatch
//! and checkpoint replays at most one line.

use flate2::read::GzDecoder;
use sml_core::checkpoint::{CheckpointCursor, CheckpointStore};
use sml_core::identity::{identify, FileIdentity};
use sml_core::{InputDescriptor, InputMarker};
use sml_output::FilterChain;
use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader, SeekFrom};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shortest and longest EOF wait; doubles from the floor to the cap while
/// the file stays quiet, resets on the next line.
const POLL_MIN: Duration = Duration::from_millis(125);
const POLL_MAX: Duration = Duration::from_millis(1000);

/// Worker that reads one file (or, in one-shot mode, a handed list of
/// files) through a cloned filter chain.
pub struct FileTailer {
    input: Arc<InputDescriptor>,
    files: Vec<PathBuf>,
    chain: FilterChain,
    store: Arc<CheckpointStore>,
    properties: BTreeMap<String, String>,
    closed: Arc<AtomicBool>,
    token: CancellationToken,
}

/// Externally visible handle to a spawned tailer.
pub struct TailerHandle {
    path: PathBuf,
    closed: Arc<AtomicBool>,
    token: CancellationToken,
    join: tokio::task::JoinHandle<()>,
}

impl TailerHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True once the tail loop has exited and flushed its final checkpoint.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Interrupt the worker; it returns at the next line or sleep boundary.
    pub fn request_close(&self) {
        self.token.cancel();
    }

    pub async fn join(self) {
        let _ = self.join.await;
    }
}

impl FileTailer {
    pub fn new(
        input: Arc<InputDescriptor>,
        files: Vec<PathBuf>,
        chain: FilterChain,
        store: Arc<CheckpointStore>,
    ) -> FileTailer {
        FileTailer {
            input,
            files,
            chain,
            store,
            properties: BTreeMap::new(),
            closed: Arc::new(AtomicBool::new(false)),
            token: CancellationToken::new(),
        }
    }

    /// Extra provenance stamped onto every marker (container id, labels).
    pub fn with_properties(mut self, properties: BTreeMap<String, String>) -> FileTailer {
        self.properties = properties;
        self
    }

    /// Start the worker under `token`; cancelling it interrupts the loop.
    pub fn spawn(mut self, token: CancellationToken) -> TailerHandle {
        self.token = token.clone();
        let closed = Arc::clone(&self.closed);
        let path = self.files.first().cloned().unwrap_or_default();
        let join = tokio::spawn(self.run());
        TailerHandle {
            path,
            closed,
            token,
            join,
        }
    }

    async fn run(mut self) {
        let files = self.files.clone();
        for path in &files {
            if self.token.is_cancelled() || self.chain.output().is_draining() {
                break;
            }
            self.run_one(path).await;
        }
        self.closed.store(true, Ordering::SeqCst);
    }

    async fn run_one(&mut self, path: &Path) {
        if !self.input.process_file {
            if self.input.copy_file {
                self.run_copy(path);
            }
            return;
        }
        if path.extension().is_some_and(|ext| ext == "gz") {
            self.run_gz(path).await;
        } else {
            self.run_plain(path).await;
        }
    }

    // -- copy path ----------------------------------------------------------

    fn run_copy(&mut self, path: &Path) {
        let marker = self.marker(identify(path).ok(), 0);
        info!(path = %path.display(), "handing file to sinks");
        self.chain.output().copy_file(path, &marker);
    }

    // -- plain tail loop ----------------------------------------------------

    async fn run_plain(&mut self, path: &Path) {
        let file = match tokio::fs::File::open(path).await {
            Ok(file) => file,
            Err(err) => {
                warn!(path = %path.display(), %err, "cannot open file");
                return;
            }
        };
        let meta = match file.metadata().await {
            Ok(meta) => meta,
            Err(err) => {
                warn!(path = %path.display(), %err, "cannot stat file");
                return;
            }
        };

        let identity = FileIdentity::from_metadata(path, &meta);
        let mut cursor = CheckpointCursor::new(
            Arc::clone(&self.store),
            identity,
            path,
            self.input.checkpoint_interval(),
        );

        let (mut offset, mut line_number) = cursor.resume();
        if offset > meta.len() {
            // The name now points at a replacement file; the stored resume
            // point belongs to whatever this identity used to be.
            info!(
                path = %path.display(),
                stored = offset,
                size = meta.len(),
                "resume offset beyond file size, starting over"
            );
            self.store.reset(&identity);
            offset = 0;
            line_number = 0;
        }

        let mut reader = BufReader::new(file);
        if offset > 0 {
            if let Err(err) = reader.seek(SeekFrom::Start(offset)).await {
                warn!(path = %path.display(), %err, "cannot seek to resume offset");
                return;
            }
            debug!(path = %path.display(), offset, line_number, "resumed");
        }

        let mut buf = String::new();
        let mut carry = String::new();
        let mut carry_bytes: u64 = 0;
        let mut backoff = POLL_MIN;

        loop {
            if self.token.is_cancelled() || self.chain.output().is_draining() {
                break;
            }
            buf.clear();
            match reader.read_line(&mut buf).await {
                Err(err) => {
                    warn!(path = %path.display(), %err, "read failed, stopping tailer");
                    break;
                }
                Ok(0) => {
                    if !self.input.tail {
                        if !carry.is_empty() {
                            offset += carry_bytes;
                            line_number += 1;
                            let line = std::mem::take(&mut carry);
                            self.deliver(&line, identity, line_number);
                            cursor.check_in(offset, line_number);
                        }
                        break;
                    }
                    tokio::select! {
                        _ = self.token.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(POLL_MAX);
                    match tokio::fs::metadata(path).await {
                        Err(_) => {
                            info!(path = %path.display(), "file vanished, stopping tailer");
                            break;
                        }
                        Ok(now) => {
                            if now.len() < offset {
                                info!(path = %path.display(), "file truncated, stopping tailer");
                                break;
                            }
                            if FileIdentity::from_metadata(path, &now) != identity {
                                info!(path = %path.display(), "file rotated, stopping tailer");
                                break;
                            }
                        }
                    }
                }
                Ok(read) => {
                    backoff = POLL_MIN;
                    if buf.ends_with('\n') {
                        offset += carry_bytes + read as u64;
                        carry_bytes = 0;
                        line_number += 1;
                        let mut line = std::mem::take(&mut carry);
                        line.push_str(strip_newline(&buf));
                        self.deliver(&line, identity, line_number);
                        cursor.check_in(offset, line_number);
                    } else {
                        // Writer is mid-line; hold it until the newline lands.
                        carry.push_str(&buf);
                        carry_bytes += read as u64;
                    }
                }
            }
        }

        cursor.last_check_in(offset, line_number);
    }

    // -- one-shot .gz path --------------------------------------------------

    /// Compressed segments are never followed; byte offsets inside the
    /// stream are meaningless, so resume is by line count alone.
    async fn run_gz(&mut self, path: &Path) {
        let identity = match identify(path) {
            Ok(identity) => identity,
            Err(err) => {
                warn!(path = %path.display(), %err, "cannot stat compressed file");
                return;
            }
        };
        let mut cursor = CheckpointCursor::new(
            Arc::clone(&self.store),
            identity,
            path,
            self.input.checkpoint_interval(),
        );
        let (_, resume_line) = cursor.resume();

        let (tx, mut rx) = mpsc::channel::<String>(256);
        let reader_path = path.to_owned();
        let reader = tokio::task::spawn_blocking(move || read_gz_lines(&reader_path, tx));

        let mut line_number = 0u64;
        while let Some(line) = rx.recv().await {
            if self.token.is_cancelled() || self.chain.output().is_draining() {
                break;
            }
            line_number += 1;
            if line_number <= resume_line {
                continue;
            }
            self.deliver(&line, identity, line_number);
            cursor.check_in(0, line_number);
        }
        drop(rx);
        let _ = reader.await;

        cursor.last_check_in(0, line_number);
    }

    // -- shared -------------------------------------------------------------

    fn marker(&self, identity: Option<FileIdentity>, line_number: u64) -> InputMarker {
        InputMarker {
            input: Arc::clone(&self.input),
            file_identity: identity,
            base64_key: identity.map(|id| id.base64_key()),
            line_number,
            properties: self.properties.clone(),
        }
    }

    fn deliver(&mut self, line: &str, identity: FileIdentity, line_number: u64) {
        let marker = self.marker(Some(identity), line_number);
        if let Err(err) = self.chain.process(line, &marker) {
            warn!(line_number, %err, "filter chain failed, dropping line");
        }
    }
}

fn read_gz_lines(path: &Path, tx: mpsc::Sender<String>) {
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(err) => {
            warn!(path = %path.display(), %err, "cannot open compressed file");
            return;
        }
    };
    let mut reader = std::io::BufReader::new(GzDecoder::new(file));
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {
                if tx.blocking_send(strip_newline(&line).to_string()).is_err() {
                    break;
                }
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "decompression failed, stopping");
                break;
            }
        }
    }
}

fn strip_newline(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}
