//! Caller-facing error taxonomy.

use crate::entity_path::EntityPath;
use thiserror::Error;

/// Errors surfaced synchronously to callers of the isolation API.
///
/// Reconciliation-time failures never use this type; they are logged
/// and the offending record is skipped.
#[derive(Error, Debug)]
pub enum IsolationError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("operation not allowed: {0}")]
    NotAllowed(String),

    #[error("hardware isolation is disabled")]
    Unavailable,

    #[error("internal failure: {0}")]
    InternalFailure(String),

    #[error("no isolation entry found for {0}")]
    NotFound(String),

    #[error("an unresolved isolation entry already exists for {0}")]
    DuplicateEntity(EntityPath),
}
