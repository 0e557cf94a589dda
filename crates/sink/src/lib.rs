//! `SafeSink`: a thread-safe, single-writer log/event sink backed by either
//! a file or the process logger.
//!
//! File mode runs a dedicated daemon thread draining an unbounded
//! `std::sync::mpsc` channel — not a tokio task — so the sink can be called
//! from the plain OS threads the extractor/publisher worker pools spawn as
//! well as from async contexts, matching the original's
//! `threading.Thread(daemon=True)` writer.

#![forbid(unsafe_code)]

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use chrono::Local;
use thiserror::Error;
use tracing::{error as t_error, info as t_info, warn as t_warn};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to open log file {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Truncate,
    Append,
}

enum Record {
    Line(String),
    Close,
}

enum Backend {
    File {
        tx: Sender<Record>,
        worker: Arc<std::sync::Mutex<Option<JoinHandle<()>>>>,
    },
    PassThrough,
}

/// Three logging verbs safe to call from many concurrent contexts.
pub struct SafeSink {
    backend: Backend,
}

impl SafeSink {
    /// Pass-through mode: every verb forwards to the process-level logger.
    pub fn passthrough() -> Self {
        Self {
            backend: Backend::PassThrough,
        }
    }

    /// File mode: opens `path` in `mode`, starts the background writer, and
    /// returns a handle. Open failures surface to the caller.
    pub fn to_file(path: &str, mode: WriteMode) -> Result<Self, SinkError> {
        let mut options = OpenOptions::new();
        options.write(true).create(true);
        match mode {
            WriteMode::Truncate => {
                options.truncate(true);
            }
            WriteMode::Append => {
                options.append(true);
            }
        }
        let file = options.open(path).map_err(|source| SinkError::Open {
            path: path.to_string(),
            source,
        })?;

        let (tx, rx) = mpsc::channel::<Record>();
        let worker = std::thread::Builder::new()
            .name("safesink-writer".to_string())
            .spawn(move || write_worker(file, rx))
            .expect("failed to spawn safesink writer thread");

        Ok(Self {
            backend: Backend::File {
                tx,
                worker: Arc::new(std::sync::Mutex::new(Some(worker))),
            },
        })
    }

    pub fn info(&self, message: &str) {
        self.write("INF", message, |m| t_info!("{m}"));
    }

    pub fn warning(&self, message: &str) {
        self.write("WRN", message, |m| t_warn!("{m}"));
    }

    pub fn error(&self, message: &str) {
        self.write("ERR", message, |m| t_error!("{m}"));
    }

    fn write(&self, level: &str, message: &str, passthrough: impl FnOnce(&str)) {
        match &self.backend {
            Backend::File { tx, .. } => {
                let line = format!("{} [{}] {}", Local::now().format("%Y-%m-%d %H:%M"), level, message);
                // A full/closed channel after close() falls back to
                // passthrough rather than panicking.
                if tx.send(Record::Line(line)).is_err() {
                    passthrough(message);
                }
            }
            Backend::PassThrough => passthrough(message),
        }
    }

    /// Waits for the queue to drain, stops the worker, and closes the file.
    /// Idempotent: calling `close` twice, or calling it in pass-through
    /// mode, is a no-op.
    pub fn close(&self) {
        if let Backend::File { tx, worker } = &self.backend {
            let _ = tx.send(Record::Close);
            if let Ok(mut guard) = worker.lock() {
                if let Some(handle) = guard.take() {
                    let _ = handle.join();
                }
            }
        }
    }
}

impl Drop for SafeSink {
    fn drop(&mut self) {
        self.close();
    }
}

fn write_worker(mut file: File, rx: mpsc::Receiver<Record>) {
    while let Ok(record) = rx.recv() {
        match record {
            Record::Line(line) => {
                // Write failures are silently dropped; the worker must
                // never crash out from under its callers.
                let _ = writeln!(file, "{line}");
                let _ = file.flush();
            }
            Record::Close => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn file_mode_preserves_enqueue_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sink.log");
        let sink = SafeSink::to_file(path.to_str().unwrap(), WriteMode::Truncate).unwrap();
        for i in 0..50 {
            sink.info(&format!("line {i}"));
        }
        sink.close();

        let mut contents = String::new();
        File::open(&path).unwrap().read_to_string(&mut contents).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 50);
        for (i, line) in lines.iter().enumerate() {
            assert!(line.ends_with(&format!("line {i}")));
        }
    }

    #[test]
    fn close_is_a_barrier_nothing_is_lost() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sink.log");
        let sink = SafeSink::to_file(path.to_str().unwrap(), WriteMode::Truncate).unwrap();
        for i in 0..500 {
            sink.warning(&format!("w{i}"));
        }
        sink.close();
        let mut contents = String::new();
        File::open(&path).unwrap().read_to_string(&mut contents).unwrap();
        assert_eq!(contents.lines().count(), 500);
    }

    #[test]
    fn concurrent_writers_preserve_per_thread_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sink.log");
        let sink = Arc::new(SafeSink::to_file(path.to_str().unwrap(), WriteMode::Truncate).unwrap());

        let mut handles = Vec::new();
        for t in 0..4 {
            let sink = sink.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..25 {
                    sink.info(&format!("t{t}-{i}"));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        sink.close();

        let mut contents = String::new();
        File::open(&path).unwrap().read_to_string(&mut contents).unwrap();
        assert_eq!(contents.lines().count(), 100);
        for t in 0..4 {
            let lines: Vec<_> = contents
                .lines()
                .filter(|l| l.contains(&format!("t{t}-")))
                .collect();
            for (i, line) in lines.iter().enumerate() {
                assert!(line.ends_with(&format!("t{t}-{i}")));
            }
        }
    }

    #[test]
    fn passthrough_mode_never_panics() {
        let sink = SafeSink::passthrough();
        sink.info("hello");
        sink.warning("careful");
        sink.error("uh oh");
        sink.close();
    }

    #[test]
    fn open_failure_surfaces_to_caller() {
        let result = SafeSink::to_file("/nonexistent-dir-xyz/sink.log", WriteMode::Truncate);
        assert!(result.is_err());
    }
}
