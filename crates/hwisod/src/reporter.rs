//! Fault reporting for failures of the engine itself.
//!
//! Used when a bulk operation cannot complete, e.g. the change
//! watcher could not be re-enabled after a clear-all. Per-record
//! reconciliation failures do not go through here; they are plain
//! log lines.

use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportSeverity {
    Warning,
    Error,
}

/// Sink for engine-level fault reports.
pub trait FaultReporter {
    fn report(&self, kind: &str, severity: ReportSeverity, context: &str);
}

/// Default reporter writing to the log stream.
pub struct LogReporter;

impl FaultReporter for LogReporter {
    fn report(&self, kind: &str, severity: ReportSeverity, context: &str) {
        error!(kind, ?severity, context, "engine fault report");
    }
}
