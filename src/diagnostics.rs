//! Diagnostics sink: leveled, path-keyed messages for operators.
//!
//! The scanner, auditor, healing loop and watcher report everything that is
//! recoverable but worth seeing (dropped ports, skipped audits, coalesced
//! notifications) through a `DiagnosticsSink` instead of failing.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::model::NodePath;

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        })
    }
}

/// What kind of event a diagnostic records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagnosticCode {
    /// A node declares `port_type` but lacks another required attribute.
    MissingAttribute,
    /// A required attribute is present but holds an unusable value.
    InvalidAttribute,
    /// Audit found no capacity requirement and skipped the node.
    AuditSkipped,
    /// Audit produced a WARN or FAIL verdict.
    AuditVerdict,
    RegenerationFailed,
    ConvergenceFailure,
    /// A notification arrived while a cycle was processing and was folded
    /// into the pending set.
    Coalesced,
    /// A notification arrived during the watcher's own write and was dropped.
    Suppressed,
    /// A changed path no longer exists in the scene.
    NodeVanished,
    WriteRejected,
}

/// One leveled message keyed by node path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub level: Level,
    pub code: DiagnosticCode,
    pub path: NodePath,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl Diagnostic {
    pub fn new(level: Level, code: DiagnosticCode, path: NodePath, message: impl Into<String>) -> Self {
        Self { level, code, path, message: message.into(), at: Utc::now() }
    }

    pub fn warn(code: DiagnosticCode, path: NodePath, message: impl Into<String>) -> Self {
        Self::new(Level::Warn, code, path, message)
    }

    pub fn info(code: DiagnosticCode, path: NodePath, message: impl Into<String>) -> Self {
        Self::new(Level::Info, code, path, message)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.level, self.path, self.message)
    }
}

/// Receives diagnostics. Not required to be durable.
pub trait DiagnosticsSink: Send + Sync {
    fn emit(&self, diagnostic: Diagnostic);
}

/// Shared, type-erased sink handle.
pub type SharedSink = Arc<dyn DiagnosticsSink>;

// ============================================================================
// TracingSink
// ============================================================================

/// Default sink: forwards each diagnostic to `tracing` at the matching level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn emit(&self, d: Diagnostic) {
        let path = d.path.as_str();
        let code = d.code;
        match d.level {
            Level::Debug => tracing::debug!(path, ?code, "{}", d.message),
            Level::Info => tracing::info!(path, ?code, "{}", d.message),
            Level::Warn => tracing::warn!(path, ?code, "{}", d.message),
            Level::Error => tracing::error!(path, ?code, "{}", d.message),
        }
    }
}

// ============================================================================
// MemorySink
// ============================================================================

/// Keeps every diagnostic in memory, and also forwards it to `tracing`.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<Diagnostic>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Diagnostic> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Diagnostics recorded against one path.
    pub fn for_path(&self, path: &NodePath) -> Vec<Diagnostic> {
        self.records.lock().iter().filter(|d| &d.path == path).cloned().collect()
    }

    pub fn count(&self, code: DiagnosticCode) -> usize {
        self.records.lock().iter().filter(|d| d.code == code).count()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl DiagnosticsSink for MemorySink {
    fn emit(&self, diagnostic: Diagnostic) {
        TracingSink.emit(diagnostic.clone());
        self.records.lock().push(diagnostic);
    }
}
