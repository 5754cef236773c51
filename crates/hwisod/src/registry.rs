//! In-memory registry of isolation entries.
//!
//! Exclusively owned by the reconciliation manager; every mutation
//! happens on the manager's event loop. Each entry owns its published
//! state and a durable per-entry snapshot so creation timestamps
//! survive a daemon restart.

use crate::publisher::EntryPublisher;
use crate::resolver::HardwareClass;
use chrono::{DateTime, Utc};
use hwiso_common::{EntityPath, IsolationError, IsolationSeverity, RecordId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Association links carried by a published entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Associations {
    /// Inventory path of the isolated hardware.
    pub isolated_hardware: String,
    /// Error-log path that caused the isolation, if any.
    pub error_log: Option<String>,
}

/// The daemon's published representation of one guard record.
#[derive(Debug, Clone)]
pub struct IsolationEntry {
    pub record_id: RecordId,
    pub entity_path: EntityPath,
    pub severity: IsolationSeverity,
    pub resolved: bool,
    pub associations: Associations,
    pub class: HardwareClass,
    pub created_at: DateTime<Utc>,
    pub object_path: String,
}

const SNAPSHOT_VERSION: u32 = 1;

/// Durable per-entry state that is not derivable from the store.
#[derive(Debug, Serialize, Deserialize)]
struct EntrySnapshot {
    version: u32,
    record_id: RecordId,
    entity_path: EntityPath,
    created_at: DateTime<Utc>,
}

/// Registry of active isolation entries, keyed by record id.
pub struct EntryRegistry {
    entries: BTreeMap<RecordId, IsolationEntry>,
    persist_dir: PathBuf,
    object_root: String,
    publisher: Box<dyn EntryPublisher>,
}

impl EntryRegistry {
    pub fn new(
        persist_dir: impl Into<PathBuf>,
        object_root: impl Into<String>,
        publisher: Box<dyn EntryPublisher>,
    ) -> anyhow::Result<Self> {
        let persist_dir = persist_dir.into();
        std::fs::create_dir_all(&persist_dir)?;
        Ok(Self {
            entries: BTreeMap::new(),
            persist_dir,
            object_root: object_root.into(),
            publisher,
        })
    }

    /// Create and publish a new entry.
    ///
    /// Fails with `DuplicateEntity` when an unresolved entry for the
    /// same entity path already exists and the hardware class is
    /// single-fault. A resolved entry occupying the same record id is
    /// replaced. Publish failure fails the creation; the caller
    /// decides whether to roll the store record back.
    pub fn create_entry(
        &mut self,
        record_id: RecordId,
        entity_path: EntityPath,
        severity: IsolationSeverity,
        resolved: bool,
        associations: Associations,
        class: HardwareClass,
    ) -> Result<&IsolationEntry, IsolationError> {
        if !resolved && !class.multi_record() && self.has_unresolved_for_path(&entity_path) {
            return Err(IsolationError::DuplicateEntity(entity_path));
        }

        // The store reuses ids of long-resolved records.
        if let Some(stale) = self.entries.get(&record_id) {
            if stale.resolved {
                self.erase_entry(record_id);
            } else {
                return Err(IsolationError::InternalFailure(format!(
                    "record id {record_id} already holds an unresolved entry"
                )));
            }
        }

        let object_path = format!("{}/{}", self.object_root, record_id);
        let created_at = self.restore_created_at(record_id, &entity_path);

        let entry = IsolationEntry {
            record_id,
            entity_path,
            severity,
            resolved,
            associations,
            class,
            created_at,
            object_path,
        };

        self.publisher
            .publish(&entry)
            .map_err(|e| IsolationError::InternalFailure(format!("failed to publish entry: {e}")))?;

        if !resolved {
            self.publisher
                .set_available(&entry.associations.isolated_hardware, false);
        }

        self.write_snapshot(&entry);
        Ok(self.entries.entry(record_id).or_insert(entry))
    }

    /// Update an existing unresolved entry matched by
    /// `(entity_path, record_id)`.
    ///
    /// Only mutates and republishes fields that changed; a no-op
    /// update leaves the creation timestamp untouched. Returns the
    /// entry's object path, or `None` when no matching entry exists.
    pub fn update_entry(
        &mut self,
        entity_path: &EntityPath,
        record_id: RecordId,
        severity: IsolationSeverity,
        associations: Associations,
    ) -> Option<String> {
        let entry = self.entries.get_mut(&record_id)?;
        if entry.entity_path != *entity_path || entry.resolved {
            return None;
        }

        let mut changed = false;
        if entry.severity != severity {
            entry.severity = severity;
            changed = true;
        }
        if entry.associations != associations {
            entry.associations = associations;
            changed = true;
        }

        if changed {
            entry.created_at = Utc::now();
            let entry = self.entries.get(&record_id).expect("entry just updated");
            if let Err(e) = self.publisher.update(entry) {
                warn!(object_path = %entry.object_path, "failed to republish entry: {e}");
            }
            let entry = entry.clone();
            self.write_snapshot(&entry);
        }

        Some(self.entries[&record_id].object_path.clone())
    }

    /// Mark an entry resolved and restore the hardware availability
    /// indicator. Idempotent; returns whether the entry transitioned.
    pub fn resolve_entry(&mut self, record_id: RecordId) -> bool {
        let Some(entry) = self.entries.get_mut(&record_id) else {
            return false;
        };
        if entry.resolved {
            return false;
        }
        entry.resolved = true;

        let entry = self.entries.get(&record_id).expect("entry just resolved");
        self.publisher
            .set_available(&entry.associations.isolated_hardware, true);
        if let Err(e) = self.publisher.update(entry) {
            warn!(object_path = %entry.object_path, "failed to republish resolved entry: {e}");
        }
        true
    }

    /// Hard-delete an entry, its published object, and its snapshot.
    pub fn erase_entry(&mut self, record_id: RecordId) -> Option<IsolationEntry> {
        let entry = self.entries.remove(&record_id)?;
        if let Err(e) = self.publisher.unpublish(&entry.object_path) {
            warn!(object_path = %entry.object_path, "failed to unpublish entry: {e}");
        }
        let snapshot = self.snapshot_path(record_id);
        if snapshot.exists() {
            if let Err(e) = std::fs::remove_file(&snapshot) {
                warn!(file = %snapshot.display(), "failed to remove entry snapshot: {e}");
            }
        }
        Some(entry)
    }

    /// All unresolved entries whose isolated hardware matches the
    /// given inventory path. Callers needing a single severity apply
    /// the precedence resolver over the result.
    pub fn lookup_by_inventory_path(&self, inventory_path: &str) -> Vec<RecordId> {
        self.entries
            .values()
            .filter(|e| !e.resolved && e.associations.isolated_hardware == inventory_path)
            .map(|e| e.record_id)
            .collect()
    }

    pub fn get(&self, record_id: RecordId) -> Option<&IsolationEntry> {
        self.entries.get(&record_id)
    }

    pub fn has_unresolved_for_path(&self, entity_path: &EntityPath) -> bool {
        self.entries
            .values()
            .any(|e| !e.resolved && e.entity_path == *entity_path)
    }

    pub fn unresolved_ids(&self) -> Vec<RecordId> {
        self.entries
            .values()
            .filter(|e| !e.resolved)
            .map(|e| e.record_id)
            .collect()
    }

    pub fn record_ids(&self) -> BTreeSet<RecordId> {
        self.entries.keys().copied().collect()
    }

    /// Entity paths of every entry, resolved or not.
    pub fn entity_paths(&self) -> BTreeSet<EntityPath> {
        self.entries.values().map(|e| e.entity_path).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IsolationEntry> {
        self.entries.values()
    }

    /// Remove per-entry snapshot files whose record id no longer has
    /// an entry. Run once at startup after the restore pass.
    pub fn cleanup_snapshots(&self, live: &BTreeSet<RecordId>) {
        let Ok(dir) = std::fs::read_dir(&self.persist_dir) else {
            return;
        };
        for file in dir.flatten() {
            let name = file.file_name();
            let Some(id) = name
                .to_str()
                .and_then(|n| n.strip_prefix("entry_"))
                .and_then(|n| n.strip_suffix(".json"))
                .and_then(|n| n.parse::<RecordId>().ok())
            else {
                continue;
            };
            if !live.contains(&id) {
                debug!(record_id = id, "removing orphaned entry snapshot");
                if let Err(e) = std::fs::remove_file(file.path()) {
                    warn!(file = %file.path().display(), "failed to remove snapshot: {e}");
                }
            }
        }
    }

    fn snapshot_path(&self, record_id: RecordId) -> PathBuf {
        self.persist_dir.join(format!("entry_{record_id}.json"))
    }

    /// Creation time from a previous run's snapshot, when the
    /// snapshot still describes the same hardware. Anything else
    /// starts a fresh timestamp.
    fn restore_created_at(&self, record_id: RecordId, entity_path: &EntityPath) -> DateTime<Utc> {
        let path = self.snapshot_path(record_id);
        match load_snapshot(&path) {
            Some(snapshot) if snapshot.entity_path == *entity_path => snapshot.created_at,
            _ => Utc::now(),
        }
    }

    fn write_snapshot(&self, entry: &IsolationEntry) {
        let snapshot = EntrySnapshot {
            version: SNAPSHOT_VERSION,
            record_id: entry.record_id,
            entity_path: entry.entity_path,
            created_at: entry.created_at,
        };
        let path = self.snapshot_path(entry.record_id);
        let result = serde_json::to_vec(&snapshot)
            .map_err(anyhow::Error::from)
            .and_then(|json| std::fs::write(&path, json).map_err(anyhow::Error::from));
        if let Err(e) = result {
            warn!(file = %path.display(), "failed to write entry snapshot: {e}");
            let _ = std::fs::remove_file(&path);
        }
    }
}

fn load_snapshot(path: &Path) -> Option<EntrySnapshot> {
    let raw = std::fs::read_to_string(path).ok()?;
    let snapshot: EntrySnapshot = serde_json::from_str(&raw).ok()?;
    if snapshot.version != SNAPSHOT_VERSION {
        warn!(file = %path.display(), version = snapshot.version, "ignoring snapshot with unknown version");
        return None;
    }
    Some(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::LogPublisher;
    use tempfile::tempdir;

    fn path(byte: u8) -> EntityPath {
        EntityPath::from_bytes(&[byte]).unwrap()
    }

    fn assoc(hw: &str) -> Associations {
        Associations {
            isolated_hardware: hw.to_string(),
            error_log: None,
        }
    }

    fn registry(dir: &Path) -> EntryRegistry {
        EntryRegistry::new(dir.join("entries"), "/hardware_isolation/entry", Box::new(LogPublisher))
            .unwrap()
    }

    #[test]
    fn test_create_and_lookup() {
        let dir = tempdir().unwrap();
        let mut reg = registry(dir.path());

        let entry = reg
            .create_entry(
                1,
                path(1),
                IsolationSeverity::Critical,
                false,
                assoc("/system/cpu0/core0"),
                HardwareClass::Core,
            )
            .unwrap();
        assert_eq!(entry.object_path, "/hardware_isolation/entry/1");

        assert_eq!(reg.lookup_by_inventory_path("/system/cpu0/core0"), vec![1]);
        assert!(reg.has_unresolved_for_path(&path(1)));
    }

    #[test]
    fn test_duplicate_single_fault_rejected() {
        let dir = tempdir().unwrap();
        let mut reg = registry(dir.path());

        reg.create_entry(
            1,
            path(1),
            IsolationSeverity::Critical,
            false,
            assoc("/system/cpu0/core0"),
            HardwareClass::Core,
        )
        .unwrap();

        let err = reg
            .create_entry(
                2,
                path(1),
                IsolationSeverity::Warning,
                false,
                assoc("/system/cpu0/core0"),
                HardwareClass::Core,
            )
            .unwrap_err();
        assert!(matches!(err, IsolationError::DuplicateEntity(_)));
    }

    #[test]
    fn test_dimm_class_allows_multiple_unresolved() {
        let dir = tempdir().unwrap();
        let mut reg = registry(dir.path());

        reg.create_entry(
            1,
            path(1),
            IsolationSeverity::Warning,
            false,
            assoc("/system/dimm0"),
            HardwareClass::Dimm,
        )
        .unwrap();
        reg.create_entry(
            2,
            path(1),
            IsolationSeverity::Critical,
            false,
            assoc("/system/dimm0"),
            HardwareClass::Dimm,
        )
        .unwrap();

        assert_eq!(reg.lookup_by_inventory_path("/system/dimm0").len(), 2);
    }

    #[test]
    fn test_noop_update_keeps_timestamp() {
        let dir = tempdir().unwrap();
        let mut reg = registry(dir.path());

        reg.create_entry(
            1,
            path(1),
            IsolationSeverity::Critical,
            false,
            assoc("/system/cpu0/core0"),
            HardwareClass::Core,
        )
        .unwrap();
        let before = reg.get(1).unwrap().created_at;

        let obj = reg.update_entry(
            &path(1),
            1,
            IsolationSeverity::Critical,
            assoc("/system/cpu0/core0"),
        );
        assert!(obj.is_some());
        assert_eq!(reg.get(1).unwrap().created_at, before);
    }

    #[test]
    fn test_real_update_refreshes_timestamp() {
        let dir = tempdir().unwrap();
        let mut reg = registry(dir.path());

        reg.create_entry(
            1,
            path(1),
            IsolationSeverity::Warning,
            false,
            assoc("/system/cpu0/core0"),
            HardwareClass::Core,
        )
        .unwrap();
        let before = reg.get(1).unwrap().created_at;

        reg.update_entry(
            &path(1),
            1,
            IsolationSeverity::Critical,
            assoc("/system/cpu0/core0"),
        )
        .unwrap();
        let entry = reg.get(1).unwrap();
        assert_eq!(entry.severity, IsolationSeverity::Critical);
        assert!(entry.created_at >= before);
    }

    #[test]
    fn test_update_mismatch_returns_none() {
        let dir = tempdir().unwrap();
        let mut reg = registry(dir.path());

        reg.create_entry(
            1,
            path(1),
            IsolationSeverity::Critical,
            false,
            assoc("/system/cpu0/core0"),
            HardwareClass::Core,
        )
        .unwrap();

        // Wrong entity path for the record id.
        assert!(reg
            .update_entry(&path(2), 1, IsolationSeverity::Critical, assoc("/x"))
            .is_none());
        // Unknown record id.
        assert!(reg
            .update_entry(&path(1), 9, IsolationSeverity::Critical, assoc("/x"))
            .is_none());
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let dir = tempdir().unwrap();
        let mut reg = registry(dir.path());

        reg.create_entry(
            1,
            path(1),
            IsolationSeverity::Critical,
            false,
            assoc("/system/cpu0/core0"),
            HardwareClass::Core,
        )
        .unwrap();

        assert!(reg.resolve_entry(1));
        assert!(!reg.resolve_entry(1));
        assert!(reg.get(1).unwrap().resolved);
        assert!(reg.lookup_by_inventory_path("/system/cpu0/core0").is_empty());
    }

    #[test]
    fn test_resolved_entry_does_not_block_recreation() {
        let dir = tempdir().unwrap();
        let mut reg = registry(dir.path());

        reg.create_entry(
            1,
            path(1),
            IsolationSeverity::Critical,
            false,
            assoc("/system/cpu0/core0"),
            HardwareClass::Core,
        )
        .unwrap();
        reg.resolve_entry(1);

        // Same path isolated again under a fresh record id.
        reg.create_entry(
            2,
            path(1),
            IsolationSeverity::Manual,
            false,
            assoc("/system/cpu0/core0"),
            HardwareClass::Core,
        )
        .unwrap();
        assert_eq!(reg.lookup_by_inventory_path("/system/cpu0/core0"), vec![2]);
    }

    #[test]
    fn test_stale_resolved_entry_replaced_on_id_reuse() {
        let dir = tempdir().unwrap();
        let mut reg = registry(dir.path());

        reg.create_entry(
            1,
            path(1),
            IsolationSeverity::Critical,
            false,
            assoc("/system/cpu0/core0"),
            HardwareClass::Core,
        )
        .unwrap();
        reg.resolve_entry(1);

        reg.create_entry(
            1,
            path(2),
            IsolationSeverity::Warning,
            false,
            assoc("/system/cpu1/core1"),
            HardwareClass::Core,
        )
        .unwrap();
        let entry = reg.get(1).unwrap();
        assert_eq!(entry.entity_path, path(2));
        assert!(!entry.resolved);
    }

    #[test]
    fn test_erase_removes_entry_and_snapshot() {
        let dir = tempdir().unwrap();
        let mut reg = registry(dir.path());

        reg.create_entry(
            1,
            path(1),
            IsolationSeverity::Critical,
            false,
            assoc("/system/cpu0/core0"),
            HardwareClass::Core,
        )
        .unwrap();
        let snapshot = dir.path().join("entries/entry_1.json");
        assert!(snapshot.exists());

        let erased = reg.erase_entry(1).unwrap();
        assert_eq!(erased.record_id, 1);
        assert!(!snapshot.exists());
        assert!(reg.is_empty());
    }

    #[test]
    fn test_created_at_survives_restart() {
        let dir = tempdir().unwrap();
        let created;
        {
            let mut reg = registry(dir.path());
            reg.create_entry(
                1,
                path(1),
                IsolationSeverity::Critical,
                false,
                assoc("/system/cpu0/core0"),
                HardwareClass::Core,
            )
            .unwrap();
            created = reg.get(1).unwrap().created_at;
        }

        // Fresh registry over the same persist dir, as after restart.
        let mut reg = registry(dir.path());
        reg.create_entry(
            1,
            path(1),
            IsolationSeverity::Critical,
            false,
            assoc("/system/cpu0/core0"),
            HardwareClass::Core,
        )
        .unwrap();
        assert_eq!(reg.get(1).unwrap().created_at, created);
    }

    #[test]
    fn test_snapshot_for_different_path_is_ignored() {
        let dir = tempdir().unwrap();
        let created;
        {
            let mut reg = registry(dir.path());
            reg.create_entry(
                1,
                path(1),
                IsolationSeverity::Critical,
                false,
                assoc("/system/cpu0/core0"),
                HardwareClass::Core,
            )
            .unwrap();
            created = reg.get(1).unwrap().created_at;
        }

        let mut reg = registry(dir.path());
        reg.create_entry(
            1,
            path(2),
            IsolationSeverity::Critical,
            false,
            assoc("/system/cpu1/core0"),
            HardwareClass::Core,
        )
        .unwrap();
        assert!(reg.get(1).unwrap().created_at >= created);
    }

    #[test]
    fn test_cleanup_snapshots_drops_orphans() {
        let dir = tempdir().unwrap();
        let mut reg = registry(dir.path());

        reg.create_entry(
            1,
            path(1),
            IsolationSeverity::Critical,
            false,
            assoc("/system/cpu0/core0"),
            HardwareClass::Core,
        )
        .unwrap();
        reg.create_entry(
            2,
            path(2),
            IsolationSeverity::Warning,
            false,
            assoc("/system/cpu1/core0"),
            HardwareClass::Core,
        )
        .unwrap();

        let live: BTreeSet<RecordId> = [1].into_iter().collect();
        reg.cleanup_snapshots(&live);
        assert!(dir.path().join("entries/entry_1.json").exists());
        assert!(!dir.path().join("entries/entry_2.json").exists());
    }
}
