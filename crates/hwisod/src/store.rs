//! Access to the authoritative guard record store.
//!
//! The store is shared with host firmware, which writes it outside
//! this process's control. The daemon therefore never caches reads:
//! every reconciliation pass pulls the full record set fresh.

use anyhow::{bail, Context, Result};
use hwiso_common::{EntityPath, GuardRecord, GuardType, RecordId, RESOLVED_RECORD_ID};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Operations the reconciliation engine needs from the record store.
pub trait GuardStore {
    /// Read the entire current record set. `exclude_ephemeral` drops
    /// firmware-internal record classes from the view.
    fn get_all(&self, exclude_ephemeral: bool) -> Result<Vec<GuardRecord>>;

    /// Create a record for `entity_path`. Re-creating an identical
    /// unresolved record returns the existing one; a differing
    /// unresolved record for the same path is overwritten in place,
    /// keeping its id.
    ///
    /// The flag is true only when the record was freshly allocated.
    /// Pre-existing records (returned as-is or overwritten) may have
    /// been written by firmware and must not be rolled back by the
    /// caller.
    fn create(
        &mut self,
        entity_path: &EntityPath,
        error_log_id: u32,
        guard_type: GuardType,
    ) -> Result<(GuardRecord, bool)>;

    /// Mark one record resolved. The record stays in the store as
    /// history, the way firmware resolves records.
    fn clear(&mut self, record_id: RecordId) -> Result<()>;

    /// Drop every record.
    fn clear_all(&mut self) -> Result<()>;
}

const GUARD_FILE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct GuardFile {
    version: u32,
    records: Vec<GuardRecord>,
}

/// File-backed guard store.
///
/// The on-disk layout is private to this type; nothing else in the
/// daemon may interpret the file. Writes go through a temp file and
/// rename so an external watcher observes one atomic update per
/// logical change.
pub struct FileGuardStore {
    path: PathBuf,
}

impl FileGuardStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Vec<GuardRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read guard file {}", self.path.display()))?;
        let file: GuardFile = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse guard file {}", self.path.display()))?;
        if file.version != GUARD_FILE_VERSION {
            bail!(
                "unsupported guard file version {} in {}",
                file.version,
                self.path.display()
            );
        }
        Ok(file.records)
    }

    fn save(&self, records: Vec<GuardRecord>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = GuardFile {
            version: GUARD_FILE_VERSION,
            records,
        };
        let json = serde_json::to_string_pretty(&file)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }

    fn next_free_id(records: &[GuardRecord]) -> RecordId {
        let mut id: RecordId = 1;
        while records.iter().any(|r| r.record_id == id) {
            id += 1;
        }
        id
    }
}

impl GuardStore for FileGuardStore {
    fn get_all(&self, exclude_ephemeral: bool) -> Result<Vec<GuardRecord>> {
        let records = self.load()?;
        if exclude_ephemeral {
            Ok(records
                .into_iter()
                .filter(|r| !r.err_type.is_ephemeral())
                .collect())
        } else {
            Ok(records)
        }
    }

    fn create(
        &mut self,
        entity_path: &EntityPath,
        error_log_id: u32,
        guard_type: GuardType,
    ) -> Result<(GuardRecord, bool)> {
        let mut records = self.load()?;

        if let Some(existing) = records
            .iter_mut()
            .find(|r| r.entity_path == *entity_path && !r.is_resolved())
        {
            if existing.error_log_id == error_log_id && existing.err_type == guard_type {
                debug!(record_id = existing.record_id, "identical record already present");
                return Ok((existing.clone(), false));
            }
            // Overwrite in place, keeping the id.
            existing.error_log_id = error_log_id;
            existing.err_type = guard_type;
            let record = existing.clone();
            self.save(records)?;
            return Ok((record, false));
        }

        let record = GuardRecord {
            record_id: Self::next_free_id(&records),
            entity_path: *entity_path,
            error_log_id,
            err_type: guard_type,
        };
        records.push(record.clone());
        self.save(records)?;
        Ok((record, true))
    }

    fn clear(&mut self, record_id: RecordId) -> Result<()> {
        let mut records = self.load()?;
        let Some(record) = records
            .iter_mut()
            .find(|r| r.record_id == record_id)
        else {
            bail!("no guard record with id {record_id}");
        };
        record.record_id = RESOLVED_RECORD_ID;
        self.save(records)
    }

    fn clear_all(&mut self) -> Result<()> {
        self.save(Vec::new())
    }
}
