//! Persisted eco-core set.
//!
//! Cores isolated while in the eco sub-mode keep that classification
//! across a daemon restart even though the registry is rebuilt from
//! the store. The set is independent of the registry and persisted on
//! every change.

use hwiso_common::EntityPath;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::{debug, error, warn};

const ECO_FILE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct EcoFile {
    version: u32,
    cores: BTreeSet<EntityPath>,
}

pub struct EcoCoreStore {
    path: PathBuf,
    cores: BTreeSet<EntityPath>,
}

impl EcoCoreStore {
    /// Load the persisted set. Corrupt or unreadable state is treated
    /// as empty; startup never fails on this file.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let cores = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<EcoFile>(&raw) {
                Ok(file) if file.version == ECO_FILE_VERSION => file.cores,
                Ok(file) => {
                    warn!(
                        file = %path.display(),
                        version = file.version,
                        "ignoring eco-core file with unknown version"
                    );
                    BTreeSet::new()
                }
                Err(e) => {
                    warn!(file = %path.display(), "corrupt eco-core file, starting empty: {e}");
                    BTreeSet::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeSet::new(),
            Err(e) => {
                warn!(file = %path.display(), "unreadable eco-core file, starting empty: {e}");
                BTreeSet::new()
            }
        };
        Self { path, cores }
    }

    pub fn contains(&self, entity_path: &EntityPath) -> bool {
        self.cores.contains(entity_path)
    }

    pub fn len(&self) -> usize {
        self.cores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cores.is_empty()
    }

    /// Add or remove one entity path, saving immediately when the set
    /// changed.
    pub fn mark(&mut self, entity_path: EntityPath, is_eco: bool) {
        let changed = if is_eco {
            self.cores.insert(entity_path)
        } else {
            self.cores.remove(&entity_path)
        };
        if changed {
            debug!(entity_path = %entity_path, is_eco, "eco-core set changed");
            self.save();
        }
    }

    /// Drop persisted paths that no longer correspond to any registry
    /// entry. Run after every reconciliation pass and after restore.
    pub fn cleanup_orphans(&mut self, live: &BTreeSet<EntityPath>) {
        let before = self.cores.len();
        self.cores.retain(|p| live.contains(p));
        if self.cores.len() != before {
            debug!(removed = before - self.cores.len(), "dropped orphaned eco cores");
            self.save();
        }
    }

    /// Persist the set. On failure the partial file is deleted and
    /// the in-memory set stays the source of truth for this process
    /// lifetime.
    fn save(&self) {
        let result = (|| -> anyhow::Result<()> {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = EcoFile {
                version: ECO_FILE_VERSION,
                cores: self.cores.clone(),
            };
            let json = serde_json::to_vec(&file)?;
            std::fs::write(&self.path, json)?;
            Ok(())
        })();

        if let Err(e) = result {
            error!(file = %self.path.display(), "failed to persist eco cores: {e}");
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn path(byte: u8) -> EntityPath {
        EntityPath::from_bytes(&[byte]).unwrap()
    }

    #[test]
    fn test_mark_and_reload() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("eco_cores.json");

        let mut store = EcoCoreStore::load(&file);
        store.mark(path(1), true);
        store.mark(path(2), true);
        store.mark(path(2), false);

        let reloaded = EcoCoreStore::load(&file);
        assert!(reloaded.contains(&path(1)));
        assert!(!reloaded.contains(&path(2)));
        assert_eq!(reloaded.len(), 1);
    }

    #[test]
    fn test_missing_file_starts_empty() {
        let dir = tempdir().unwrap();
        let store = EcoCoreStore::load(dir.path().join("absent.json"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("eco_cores.json");
        std::fs::write(&file, "garbage").unwrap();
        let store = EcoCoreStore::load(&file);
        assert!(store.is_empty());
    }

    #[test]
    fn test_unknown_version_starts_empty() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("eco_cores.json");
        std::fs::write(&file, r#"{"version": 99, "cores": []}"#).unwrap();
        let store = EcoCoreStore::load(&file);
        assert!(store.is_empty());
    }

    #[test]
    fn test_cleanup_orphans() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("eco_cores.json");

        let mut store = EcoCoreStore::load(&file);
        store.mark(path(1), true);
        store.mark(path(2), true);

        let live: BTreeSet<EntityPath> = [path(1)].into_iter().collect();
        store.cleanup_orphans(&live);
        assert!(store.contains(&path(1)));
        assert!(!store.contains(&path(2)));

        // The shrink was persisted.
        let reloaded = EcoCoreStore::load(&file);
        assert_eq!(reloaded.len(), 1);
    }

    #[test]
    fn test_save_failure_keeps_in_memory_set() {
        let dir = tempdir().unwrap();
        // A directory at the persist path makes every save fail.
        let file = dir.path().join("eco_cores.json");
        std::fs::create_dir_all(&file).unwrap();

        let mut store = EcoCoreStore::load(&file);
        store.mark(path(1), true);
        assert!(store.contains(&path(1)));
    }

    #[test]
    fn test_unchanged_mark_does_not_rewrite() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("eco_cores.json");

        let mut store = EcoCoreStore::load(&file);
        store.mark(path(1), false);
        // Removing an absent path is a no-op; nothing was persisted.
        assert!(!file.exists());
    }
}
