//! Append-only JSONL audit log shared by all stages.
//!
//! Every provider exchange, tool dispatch, corrective note, and
//! finalization is recorded as one JSON object per line. Logging failures
//! are warned and swallowed: the audit trail must never take down a run.

use chrono::Utc;
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::warn;

/// One audit record.
#[derive(Debug, Serialize)]
struct AuditRecord<'a> {
    agent: &'a str,
    event: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a serde_json::Value>,
    time: chrono::DateTime<Utc>,
}

/// A shared handle to the pipeline's audit log file.
#[derive(Clone)]
pub struct AuditLog {
    inner: std::sync::Arc<Inner>,
}

struct Inner {
    path: Option<PathBuf>,
    file: Mutex<Option<std::fs::File>>,
}

impl AuditLog {
    /// Open (appending) the audit log at the given path, creating parent
    /// directories. If the file cannot be opened, returns a handle that
    /// warns once and drops records.
    pub fn open(path: PathBuf) -> Self {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    warn!(path = %path.display(), error = %e, "Cannot create audit log directory");
                }
            }
        }
        let file = match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
        {
            Ok(f) => Some(f),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot open audit log, auditing disabled");
                None
            }
        };
        Self {
            inner: std::sync::Arc::new(Inner {
                path: Some(path),
                file: Mutex::new(file),
            }),
        }
    }

    /// A no-op audit log for tests.
    pub fn disabled() -> Self {
        Self {
            inner: std::sync::Arc::new(Inner {
                path: None,
                file: Mutex::new(None),
            }),
        }
    }

    /// Append one record. Never fails; I/O errors are warned and dropped.
    pub fn record(
        &self,
        agent: &str,
        event: &str,
        message: &str,
        params: Option<&serde_json::Value>,
    ) {
        let record = AuditRecord {
            agent,
            event,
            message,
            params,
            time: Utc::now(),
        };
        let line = match serde_json::to_string(&record) {
            Ok(l) => l,
            Err(e) => {
                warn!(error = %e, "Cannot serialize audit record");
                return;
            }
        };
        let mut guard = match self.inner.file.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(file) = guard.as_mut() {
            if let Err(e) = writeln!(file, "{line}") {
                warn!(
                    path = ?self.inner.path,
                    error = %e,
                    "Cannot append to audit log"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_are_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let log = AuditLog::open(path.clone());
        log.record("cleaning", "tool_call", "impute_missing", None);
        log.record(
            "cleaning",
            "tool_result",
            "Imputed 40 values",
            Some(&serde_json::json!({"column": "age"})),
        );

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["agent"], "cleaning");
        assert_eq!(first["event"], "tool_call");
        assert!(first.get("params").is_none());
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["params"]["column"], "age");
    }

    #[test]
    fn open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/audit.jsonl");
        let log = AuditLog::open(path.clone());
        log.record("a", "e", "m", None);
        assert!(path.exists());
    }

    #[test]
    fn disabled_log_drops_records() {
        let log = AuditLog::disabled();
        log.record("a", "e", "m", None);
    }
}
