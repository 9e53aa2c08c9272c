//! Append-only audit trail for guarded operations
//!
//! Every call through the permission manager produces exactly one entry,
//! whatever the outcome. Writes are best-effort: a broken audit file must
//! never block the guarded operation itself.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single audit record, serialized as one JSON line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// When the operation was attempted (RFC 3339, UTC)
    pub timestamp: String,
    /// Who ran the agent
    pub user: String,
    /// The guarded operation name
    pub operation: String,
    /// Snapshot of the operation arguments
    pub args: Value,
    /// Outcome: `allowed`, `denied`, `denied_by_config`, `allowed_dry_run`,
    /// or `error: <message>`
    pub decision: String,
    /// Whether the process-wide dry-run mode was active
    pub dry_run: bool,
    /// The command the operation would run
    pub command_preview: Option<String>,
    /// Human-readable impact description
    pub impact: Option<String>,
    /// Wall-clock time from request to outcome
    pub duration_ms: f64,
}

impl AuditEntry {
    /// Create an entry stamped with the current time
    pub fn new(user: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            user: user.into(),
            operation: operation.into(),
            args: Value::Null,
            decision: String::new(),
            dry_run: false,
            command_preview: None,
            impact: None,
            duration_ms: 0.0,
        }
    }
}

/// Newline-delimited JSON audit log
///
/// Appends are serialized under an internal lock so concurrent callers never
/// interleave mid-entry. Entries land in completion order, not start order.
pub struct AuditLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl AuditLog {
    /// Create an audit log writing to the given file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Get the log file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry, swallowing any write failure
    ///
    /// Failures are reported on the diagnostic channel only; the primary
    /// return path of a guarded operation must not depend on the log.
    pub fn append(&self, entry: &AuditEntry) {
        if let Err(e) = self.try_append(entry) {
            tracing::warn!("Failed to append audit entry for {}: {}", entry.operation, e);
        }
    }

    fn try_append(&self, entry: &AuditEntry) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().unwrap();

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let json = serde_json::to_string(entry)?;
        writeln!(file, "{}", json)?;

        Ok(())
    }
}
