//! Error taxonomy for audit runs
//!
//! Only `InventoryUnavailable` aborts a run; every other variant is
//! recorded at task or record level and the run keeps going.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by the audit pipeline and its collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum AuditError {
    /// Inventory fetch failed. The run is aborted; there is no partial
    /// audit without inventory.
    #[error("inventory unavailable: {0}")]
    InventoryUnavailable(String),

    /// A local save through the inventory source failed.
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),

    /// A device session could not be opened or died mid-use.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// A session or command deadline expired. The session is still
    /// released; the remote state is unknown.
    #[error("session timed out after {seconds}s")]
    SessionTimeout { seconds: u64 },

    /// The device rejected a command mid-sequence. Remaining commands in
    /// that sequence are not sent.
    #[error("command '{command}' rejected: {reason}")]
    CommandRejected { command: String, reason: String },

    /// A record is missing a field a rule or task requires, or a task
    /// target does not resolve to a live record at all.
    #[error("record '{key}': missing {missing}")]
    MalformedRecord { key: String, missing: String },
}

impl AuditError {
    /// True for errors that abort the whole run rather than a single task.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AuditError::InventoryUnavailable(_))
    }
}
