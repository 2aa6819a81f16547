use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;

use crate::error::{GatekeepError, Result};
use crate::models::OperationLogEntry;

pub const OPERATION_LOG_RELATIVE_PATH: &str = "logs/operations.jsonl";

/// Append-only JSONL trail of operator-facing operations.
///
/// Writes are best-effort: a full disk must never turn a gate verdict into an
/// error, so failures to append are swallowed.
#[derive(Debug, Clone)]
pub struct OperationLog {
    path: PathBuf,
}

impl OperationLog {
    #[must_use]
    pub fn under(evidence_root: &Path) -> Self {
        Self {
            path: evidence_root.join(OPERATION_LOG_RELATIVE_PATH),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn try_log(&self, entry: &OperationLogEntry) {
        let Ok(mut line) = serde_json::to_string(entry) else {
            return;
        };
        line.push('\n');
        if let Some(parent) = self.path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&self.path) {
            let _ = file.write_all(line.as_bytes());
        }
    }

    pub fn log_status(
        &self,
        request_id: String,
        operation: &str,
        status: &str,
        started: Instant,
        gate_id: Option<String>,
        details: Option<serde_json::Value>,
    ) {
        self.try_log(&OperationLogEntry {
            request_id,
            operation: operation.to_string(),
            status: status.to_string(),
            latency_ms: started.elapsed().as_millis(),
            created_at: Utc::now().to_rfc3339(),
            gate_id,
            error_code: None,
            error_message: None,
            details,
        });
    }

    pub fn log_error(
        &self,
        request_id: String,
        operation: &str,
        started: Instant,
        gate_id: Option<String>,
        err: &GatekeepError,
        details: Option<serde_json::Value>,
    ) {
        self.try_log(&OperationLogEntry {
            request_id,
            operation: operation.to_string(),
            status: "error".to_string(),
            latency_ms: started.elapsed().as_millis(),
            created_at: Utc::now().to_rfc3339(),
            gate_id,
            error_code: Some(err.code().to_string()),
            error_message: Some(err.to_string()),
            details,
        });
    }

    /// Most recent `limit` entries, oldest first. Lines that fail to parse are skipped.
    pub fn tail(&self, limit: usize) -> Result<Vec<OperationLogEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(&self.path)?;
        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(entry) = serde_json::from_str::<OperationLogEntry>(&line) {
                entries.push(entry);
            }
        }
        let skip = entries.len().saturating_sub(limit);
        Ok(entries.split_off(skip))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn entries_append_as_jsonl() {
        let temp = tempdir().expect("tempdir");
        let log = OperationLog::under(temp.path());
        log.log_status(
            "req-1".to_string(),
            "gate.run",
            "passed",
            Instant::now(),
            Some("cycle".to_string()),
            None,
        );
        log.log_error(
            "req-2".to_string(),
            "gate.run",
            Instant::now(),
            Some("soak".to_string()),
            &GatekeepError::PipelineHalted {
                gate_id: "soak".to_string(),
            },
            None,
        );
        let raw = fs::read_to_string(log.path()).expect("read");
        assert_eq!(raw.lines().count(), 2);

        let entries = log.tail(10).expect("tail");
        assert_eq!(entries[0].status, "passed");
        assert_eq!(entries[1].error_code.as_deref(), Some("PIPELINE_HALTED"));
        assert_eq!(log.tail(1).expect("tail").len(), 1);
    }

    #[test]
    fn tail_of_missing_log_is_empty() {
        let temp = tempdir().expect("tempdir");
        let log = OperationLog::under(temp.path());
        assert!(log.tail(5).expect("tail").is_empty());
    }
}
