//! File fixtures and polling helpers shared across harnesses.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

/// Append one line (newline added) to `path`, creating it if needed.
pub fn append_line(path: &Path, line: &str) {
    append_raw(path, format!("{line}\n").as_bytes());
}

pub fn append_lines(path: &Path, lines: &[&str]) {
    for line in lines {
        append_line(path, line);
    }
}

/// Append raw bytes without a trailing newline — for partial-line cases.
pub fn append_raw(path: &Path, bytes: &[u8]) {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .expect("open fixture file");
    file.write_all(bytes).expect("append to fixture file");
}

/// Write a gzip-compressed file containing the given lines.
pub fn write_gz(path: &Path, lines: &[&str]) {
    let file = std::fs::File::create(path).expect("create gz fixture");
    let mut encoder = GzEncoder::new(file, Compression::default());
    for line in lines {
        writeln!(encoder, "{line}").expect("write gz line");
    }
    encoder.finish().expect("finish gz fixture");
}

/// Poll `condition` every 25 ms until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if std::time::Instant::now() > deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
