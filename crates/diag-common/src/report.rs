//! The run report: an ordered, append-only sequence of structured status
//! entries.
//!
//! The report is the one structure shared between concurrent workers, so
//! appends go through a single lock; entries are fully formed before the
//! lock is taken and are never mutated afterwards.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;

/// Severity of a report entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Fatal,
}

/// One structured status entry.
#[derive(Debug, Clone, Serialize)]
pub struct ReportEntry {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    /// Coarse grouping, e.g. "rest", "syscall", "logs", "run".
    pub category: String,
    /// The catalog entry or component this concerns.
    pub identifier: String,
    /// Human-readable status text.
    pub text: String,
    /// Structured values for machine consumers of the report.
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    pub values: serde_json::Map<String, serde_json::Value>,
}

/// Shared, order-preserving report accumulator.
///
/// Cloning is cheap and shares the underlying buffer, so every worker can
/// hold its own handle.
#[derive(Debug, Clone, Default)]
pub struct Report {
    entries: Arc<Mutex<Vec<ReportEntry>>>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fully-formed entry.
    pub fn append(&self, entry: ReportEntry) {
        self.entries.lock().push(entry);
    }

    pub fn push(
        &self,
        severity: Severity,
        category: impl Into<String>,
        identifier: impl Into<String>,
        text: impl Into<String>,
    ) {
        self.append(ReportEntry {
            timestamp: Utc::now(),
            severity,
            category: category.into(),
            identifier: identifier.into(),
            text: text.into(),
            values: serde_json::Map::new(),
        });
    }

    pub fn push_with_values(
        &self,
        severity: Severity,
        category: impl Into<String>,
        identifier: impl Into<String>,
        text: impl Into<String>,
        values: serde_json::Map<String, serde_json::Value>,
    ) {
        self.append(ReportEntry {
            timestamp: Utc::now(),
            severity,
            category: category.into(),
            identifier: identifier.into(),
            text: text.into(),
            values,
        });
    }

    pub fn info(
        &self,
        category: impl Into<String>,
        identifier: impl Into<String>,
        text: impl Into<String>,
    ) {
        self.push(Severity::Info, category, identifier, text);
    }

    pub fn warning(
        &self,
        category: impl Into<String>,
        identifier: impl Into<String>,
        text: impl Into<String>,
    ) {
        self.push(Severity::Warning, category, identifier, text);
    }

    pub fn error(
        &self,
        category: impl Into<String>,
        identifier: impl Into<String>,
        text: impl Into<String>,
    ) {
        self.push(Severity::Error, category, identifier, text);
    }

    pub fn fatal(
        &self,
        category: impl Into<String>,
        identifier: impl Into<String>,
        text: impl Into<String>,
    ) {
        self.push(Severity::Fatal, category, identifier, text);
    }

    /// Snapshot of all entries in append order.
    pub fn entries(&self) -> Vec<ReportEntry> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// True if any entry was recorded at `Fatal` severity.
    pub fn has_fatal(&self) -> bool {
        self.entries
            .lock()
            .iter()
            .any(|e| e.severity == Severity::Fatal)
    }
}
