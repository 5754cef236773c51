//! Object-exposure layer for isolation entries.
//!
//! The real transport (D-Bus object lifecycle) lives outside this
//! daemon; the registry only needs publish/update/unpublish semantics
//! plus the best-effort hardware availability indicator.

use crate::registry::IsolationEntry;
use anyhow::Result;
use tracing::{debug, info};

/// Exposes isolation entries to the rest of the system.
pub trait EntryPublisher {
    /// Publish a newly created entry. A failure here fails entry
    /// creation; the caller decides whether to roll the store back.
    fn publish(&self, entry: &IsolationEntry) -> Result<()>;

    /// Republish an entry whose properties changed.
    fn update(&self, entry: &IsolationEntry) -> Result<()>;

    /// Remove a deleted entry from the exposure layer.
    fn unpublish(&self, object_path: &str) -> Result<()>;

    /// Flip the hardware availability indicator. Best-effort: not
    /// every inventory path implements the indicator, so absence is
    /// not an error and implementations only log.
    fn set_available(&self, inventory_path: &str, available: bool);
}

/// Default publisher that records entry lifecycle in the log stream.
pub struct LogPublisher;

impl EntryPublisher for LogPublisher {
    fn publish(&self, entry: &IsolationEntry) -> Result<()> {
        info!(
            object_path = %entry.object_path,
            entity_path = %entry.entity_path,
            severity = %entry.severity,
            resolved = entry.resolved,
            "published isolation entry"
        );
        Ok(())
    }

    fn update(&self, entry: &IsolationEntry) -> Result<()> {
        info!(
            object_path = %entry.object_path,
            severity = %entry.severity,
            resolved = entry.resolved,
            "updated isolation entry"
        );
        Ok(())
    }

    fn unpublish(&self, object_path: &str) -> Result<()> {
        info!(object_path, "removed isolation entry");
        Ok(())
    }

    fn set_available(&self, inventory_path: &str, available: bool) {
        debug!(inventory_path, available, "availability indicator");
    }
}
