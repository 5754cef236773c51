//! Shared data model for the hardware isolation daemon.
//!
//! Everything in here is plain data: entity paths, guard record
//! types, severity classes and their precedence rules, and the
//! caller-facing error taxonomy. No I/O lives in this crate.

pub mod entity_path;
pub mod error;
pub mod record;
pub mod severity;

pub use entity_path::EntityPath;
pub use error::IsolationError;
pub use record::{GuardRecord, RecordId, RESOLVED_RECORD_ID};
pub use severity::{representative_index, GuardType, IsolationSeverity};
