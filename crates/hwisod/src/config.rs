//! Daemon configuration.
//!
//! Loaded once at startup from a TOML file. A missing file falls back
//! to defaults so the daemon can start on a fresh system.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the config file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/hwisod.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Authoritative guard record file, shared with host firmware.
    pub guard_file: PathBuf,
    /// Directory for per-entry durable snapshots.
    pub persist_dir: PathBuf,
    /// Persisted eco-core set.
    pub eco_file: PathBuf,
    /// Device-tree snapshot used by the hardware resolver.
    pub devtree_file: PathBuf,
    /// Root under which isolation entries are published.
    pub entry_path_root: String,
    /// Root of published error-log object paths.
    pub error_log_root: String,
    /// File holding the current chassis power state ("on"/"off").
    pub chassis_state_file: PathBuf,
    /// Administrative enable flag for the isolation feature.
    pub isolation_enabled: bool,
    /// Debounce window between a guard-file change signal and the
    /// reconciliation pass. Must exceed worst-case firmware write
    /// latency on the shared file.
    pub debounce_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            guard_file: PathBuf::from("/var/lib/hwiso/guard.json"),
            persist_dir: PathBuf::from("/var/lib/hwiso/persistdata/record_entry"),
            eco_file: PathBuf::from("/var/lib/hwiso/persistdata/eco_cores.json"),
            devtree_file: PathBuf::from("/var/lib/hwiso/devtree.json"),
            entry_path_root: String::from("/hardware_isolation/entry"),
            error_log_root: String::from("/logging/entry"),
            chassis_state_file: PathBuf::from("/run/hwiso/chassis_state"),
            isolation_enabled: true,
            debounce_secs: 5,
        }
    }
}

impl DaemonConfig {
    /// Load from `path`, falling back to defaults when the file does
    /// not exist. A present-but-invalid file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_secs(self.debounce_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = DaemonConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert!(config.isolation_enabled);
        assert_eq!(config.debounce_secs, 5);
    }

    #[test]
    fn test_partial_file_keeps_defaults_for_rest() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hwisod.toml");
        std::fs::write(&path, "debounce_secs = 9\nisolation_enabled = false\n").unwrap();

        let config = DaemonConfig::load(&path).unwrap();
        assert_eq!(config.debounce_secs, 9);
        assert!(!config.isolation_enabled);
        assert_eq!(config.entry_path_root, "/hardware_isolation/entry");
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hwisod.toml");
        std::fs::write(&path, "debounce_secs = \"soon\"\n").unwrap();
        assert!(DaemonConfig::load(&path).is_err());
    }
}
