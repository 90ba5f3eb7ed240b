//! Append-only JSONL trace logging

use std::fs::{create_dir_all, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use tracing::warn;

use crate::ports::TraceSink;

/// Install the process-wide tracing subscriber, honoring `RUST_LOG`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Writes one JSON object per line to a trace file.
///
/// Parent-directory creation is idempotent; write failures are logged and
/// swallowed so tracing can never fail a request.
#[derive(Debug, Clone)]
pub struct JsonlTraceLogger {
    path: PathBuf,
}

impl JsonlTraceLogger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn append(&self, payload: &serde_json::Value) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(payload)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")
    }
}

impl TraceSink for JsonlTraceLogger {
    fn log(&self, payload: &serde_json::Value) {
        if let Err(e) = self.append(payload) {
            warn!("trace write to {} failed: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_appends_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("trace.jsonl");
        let logger = JsonlTraceLogger::new(&path);

        logger.log(&json!({"event": "first"}));
        logger.log(&json!({"event": "second"}));

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "first");
    }
}
