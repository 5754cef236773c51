//! Guard records as read from the authoritative store.

use crate::entity_path::EntityPath;
use crate::severity::GuardType;
use serde::{Deserialize, Serialize};

/// Record identifier allocated by the store.
pub type RecordId = u32;

/// Sentinel id marking a record as resolved. The record is
/// historical, not a demand for isolation.
pub const RESOLVED_RECORD_ID: RecordId = 0xFFFF_FFFF;

/// One isolation decision held by the authoritative store.
///
/// Read-only to the daemon; the store (and firmware) own id
/// allocation and overwrite policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardRecord {
    pub record_id: RecordId,
    pub entity_path: EntityPath,
    /// Error log id that caused the isolation; 0 means none.
    pub error_log_id: u32,
    pub err_type: GuardType,
}

impl GuardRecord {
    /// A resolved record is retained in the store for history but no
    /// longer demands isolation.
    pub fn is_resolved(&self) -> bool {
        self.record_id == RESOLVED_RECORD_ID
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_marks_resolved() {
        let record = GuardRecord {
            record_id: RESOLVED_RECORD_ID,
            entity_path: EntityPath::from_bytes(&[1]).unwrap(),
            error_log_id: 0,
            err_type: GuardType::Fatal,
        };
        assert!(record.is_resolved());
    }

    #[test]
    fn test_ordinary_id_is_valid() {
        let record = GuardRecord {
            record_id: 7,
            entity_path: EntityPath::from_bytes(&[1]).unwrap(),
            error_log_id: 0x5001,
            err_type: GuardType::Predictive,
        };
        assert!(!record.is_resolved());
    }
}
