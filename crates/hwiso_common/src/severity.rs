//! Severity classes, guard-type mappings, and precedence resolution.

use serde::{Deserialize, Serialize};
use std::fmt;

/// On-disk guard record class, owned by the record store and firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuardType {
    Fatal,
    Unrecoverable,
    Predictive,
    UserManual,
    Spare,
    /// Firmware-internal reconfiguration record.
    Reconfig,
    /// Firmware-internal sticky deconfiguration record.
    StickyDeconfig,
}

impl GuardType {
    /// Ephemeral records exist for firmware bookkeeping only and are
    /// excluded from the reconciliation view of the store.
    pub fn is_ephemeral(&self) -> bool {
        matches!(self, GuardType::Reconfig | GuardType::StickyDeconfig)
    }
}

/// Published severity of an isolation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IsolationSeverity {
    /// Fault that triggered a spare activation.
    Spare,
    Critical,
    /// Predictive fault.
    Warning,
    /// Operator-requested isolation.
    Manual,
}

impl IsolationSeverity {
    /// Guard type written to the store when this severity is isolated.
    pub fn guard_type(&self) -> GuardType {
        match self {
            IsolationSeverity::Critical => GuardType::Fatal,
            IsolationSeverity::Warning => GuardType::Predictive,
            IsolationSeverity::Manual => GuardType::UserManual,
            IsolationSeverity::Spare => GuardType::Spare,
        }
    }

    /// Severity of a record read back from the store.
    ///
    /// Ephemeral guard types have no published severity.
    pub fn from_guard_type(guard_type: GuardType) -> Option<Self> {
        match guard_type {
            GuardType::Fatal | GuardType::Unrecoverable => Some(IsolationSeverity::Critical),
            GuardType::Predictive => Some(IsolationSeverity::Warning),
            GuardType::UserManual => Some(IsolationSeverity::Manual),
            GuardType::Spare => Some(IsolationSeverity::Spare),
            GuardType::Reconfig | GuardType::StickyDeconfig => None,
        }
    }
}

impl fmt::Display for IsolationSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IsolationSeverity::Spare => "spare",
            IsolationSeverity::Critical => "critical",
            IsolationSeverity::Warning => "warning",
            IsolationSeverity::Manual => "manual",
        };
        f.write_str(s)
    }
}

/// Precedence order scanned when one inventory path carries several
/// simultaneous records. Most severe and actionable first.
const PRECEDENCE: [IsolationSeverity; 4] = [
    IsolationSeverity::Spare,
    IsolationSeverity::Critical,
    IsolationSeverity::Warning,
    IsolationSeverity::Manual,
];

/// Pick the representative (severity, error log) pair among several
/// unresolved entries for one inventory path.
///
/// Returns the index of the first entry whose severity matches the
/// highest-precedence class present. Deterministic and stateless;
/// falls back to index 0 if nothing matches the closed severity set.
pub fn representative_index(entries: &[(IsolationSeverity, Option<String>)]) -> usize {
    if entries.len() <= 1 {
        return 0;
    }

    for class in PRECEDENCE {
        if let Some(idx) = entries.iter().position(|(severity, _)| *severity == class) {
            return idx;
        }
    }

    0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(severity: IsolationSeverity) -> (IsolationSeverity, Option<String>) {
        (severity, None)
    }

    #[test]
    fn test_single_entry_wins() {
        assert_eq!(representative_index(&[entry(IsolationSeverity::Manual)]), 0);
    }

    #[test]
    fn test_critical_beats_warning_and_manual() {
        let entries = vec![
            entry(IsolationSeverity::Warning),
            entry(IsolationSeverity::Critical),
            entry(IsolationSeverity::Manual),
        ];
        assert_eq!(representative_index(&entries), 1);
    }

    #[test]
    fn test_warning_beats_manual() {
        let entries = vec![entry(IsolationSeverity::Manual), entry(IsolationSeverity::Warning)];
        assert_eq!(representative_index(&entries), 1);
    }

    #[test]
    fn test_spare_beats_everything() {
        let entries = vec![
            entry(IsolationSeverity::Critical),
            entry(IsolationSeverity::Spare),
            entry(IsolationSeverity::Warning),
        ];
        assert_eq!(representative_index(&entries), 1);
    }

    #[test]
    fn test_first_match_within_same_class() {
        let entries = vec![
            entry(IsolationSeverity::Manual),
            entry(IsolationSeverity::Critical),
            entry(IsolationSeverity::Critical),
        ];
        assert_eq!(representative_index(&entries), 1);
    }

    #[test]
    fn test_guard_type_mapping() {
        assert_eq!(
            IsolationSeverity::from_guard_type(GuardType::Unrecoverable),
            Some(IsolationSeverity::Critical)
        );
        assert_eq!(
            IsolationSeverity::from_guard_type(GuardType::Predictive),
            Some(IsolationSeverity::Warning)
        );
        assert_eq!(IsolationSeverity::from_guard_type(GuardType::Reconfig), None);
        assert_eq!(IsolationSeverity::Manual.guard_type(), GuardType::UserManual);
    }

    #[test]
    fn test_ephemeral_types() {
        assert!(GuardType::Reconfig.is_ephemeral());
        assert!(GuardType::StickyDeconfig.is_ephemeral());
        assert!(!GuardType::Fatal.is_ephemeral());
    }
}
