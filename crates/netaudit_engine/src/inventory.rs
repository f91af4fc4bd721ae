//! Inventory collaborator boundary
//!
//! The pipeline consumes inventory through `InventorySource` and never
//! talks to a backing datastore directly. A fetch is total (never partial)
//! and consistent for the duration of one run. `MemoryInventory` is the
//! in-memory implementation used by tests; it counts calls and can inject
//! failures so executor and pipeline behavior stay deterministic to test.

use async_trait::async_trait;
use netaudit_common::{AuditError, InventoryRecord, RecordFilter};
use std::sync::Mutex;

/// Source of inventory records for one pipeline run.
#[async_trait]
pub trait InventorySource: Send + Sync {
    /// Fetch every record matching the filter. Failure means the whole
    /// run aborts (`InventoryUnavailable`).
    async fn fetch(&self, filter: &RecordFilter) -> Result<Vec<InventoryRecord>, AuditError>;

    /// Persist a mutated record back to the store. Failure is task-level
    /// (`PersistenceFailure`); the store must be left unchanged.
    async fn save(&self, record: &InventoryRecord) -> Result<(), AuditError>;
}

/// In-memory inventory with call counting and failure injection.
#[derive(Default)]
pub struct MemoryInventory {
    records: Mutex<Vec<InventoryRecord>>,
    fetch_calls: Mutex<usize>,
    save_calls: Mutex<usize>,
    fetch_error: Mutex<Option<String>>,
    save_error: Mutex<Option<String>>,
}

impl MemoryInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<InventoryRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Self::default()
        }
    }

    pub fn push(&self, record: InventoryRecord) {
        self.records.lock().unwrap().push(record);
    }

    /// Current copy of a record by identity key.
    pub fn get(&self, key: &str) -> Option<InventoryRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.key() == key)
            .cloned()
    }

    pub fn fetch_count(&self) -> usize {
        *self.fetch_calls.lock().unwrap()
    }

    pub fn save_count(&self) -> usize {
        *self.save_calls.lock().unwrap()
    }

    /// Make every subsequent fetch fail with `InventoryUnavailable`.
    pub fn set_fetch_error(&self, message: &str) {
        *self.fetch_error.lock().unwrap() = Some(message.to_string());
    }

    /// Make every subsequent save fail with `PersistenceFailure` without
    /// touching the stored records.
    pub fn set_save_error(&self, message: &str) {
        *self.save_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn clear_save_error(&self) {
        *self.save_error.lock().unwrap() = None;
    }
}

#[async_trait]
impl InventorySource for MemoryInventory {
    async fn fetch(&self, filter: &RecordFilter) -> Result<Vec<InventoryRecord>, AuditError> {
        *self.fetch_calls.lock().unwrap() += 1;
        if let Some(message) = self.fetch_error.lock().unwrap().clone() {
            return Err(AuditError::InventoryUnavailable(message));
        }
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    async fn save(&self, record: &InventoryRecord) -> Result<(), AuditError> {
        *self.save_calls.lock().unwrap() += 1;
        if let Some(message) = self.save_error.lock().unwrap().clone() {
            return Err(AuditError::PersistenceFailure(message));
        }
        let mut records = self.records.lock().unwrap();
        match records
            .iter_mut()
            .find(|r| r.variant() == record.variant() && r.key() == record.key())
        {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(AuditError::PersistenceFailure(format!(
                "no {} record with key '{}'",
                record.variant(),
                record.key()
            ))),
        }
    }
}
