//! Collaborator stores
//!
//! The pipeline only talks to these traits. [`memory::InMemoryStore`]
//! implements all of them; [`audit_log::JsonlAuditStore`] persists the audit
//! trail to a locked JSONL file.

pub mod audit_log;
pub mod memory;

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::StoreResult;
use crate::model::{
    Alert, AuditRecord, DeviceRecord, DeviceUpdate, IngredientLogEntry, NewAlert, SlotStatus, User,
};

pub use audit_log::JsonlAuditStore;
pub use memory::InMemoryStore;

/// Device identity and last-known status.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    async fn find_by_rack_id(&self, rack_id: &str) -> StoreResult<Option<DeviceRecord>>;

    /// Partial update; returns `false` when the device does not exist.
    async fn apply_update(&self, rack_id: &str, update: &DeviceUpdate) -> StoreResult<bool>;
}

#[async_trait]
pub trait SlotStatusStore: Send + Sync {
    async fn upsert(&self, status: SlotStatus) -> StoreResult<()>;

    /// Set the tag read for a slot, creating the row if needed.
    async fn set_tag(
        &self,
        device_id: &str,
        slot_id: &str,
        tag_uid: Option<String>,
        ingredient: Option<String>,
    ) -> StoreResult<()>;

    async fn get(&self, device_id: &str, slot_id: &str) -> StoreResult<Option<SlotStatus>>;
}

/// Outcome of appending a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Inserted,
    /// An entry with the same (device, slot, timestamp) already exists
    Duplicate,
}

/// Append-only ingredient log, unique on (device, slot, timestamp).
#[async_trait]
pub trait IngredientLogStore: Send + Sync {
    async fn latest(&self, device_id: &str, slot_id: &str)
        -> StoreResult<Option<IngredientLogEntry>>;

    async fn append(&self, entry: IngredientLogEntry) -> StoreResult<AppendOutcome>;
}

/// Alert rows. `create_if_absent` is the atomic compare-and-create that
/// backs deduplication.
#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn find_open(&self, key: &str) -> StoreResult<Option<Alert>>;

    /// Create the alert unless an unacknowledged alert with `key` exists.
    /// Returns the new row, or `None` when one was already open.
    async fn create_if_absent(&self, key: &str, alert: &NewAlert) -> StoreResult<Option<Alert>>;

    /// External acknowledgement; returns `false` for an unknown id.
    async fn acknowledge(&self, id: uuid::Uuid) -> StoreResult<bool>;
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, record: AuditRecord) -> StoreResult<()>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(&self, user_id: &str) -> StoreResult<Option<User>>;
}

/// Handles to every collaborator the pipeline needs.
#[derive(Clone)]
pub struct Stores {
    pub devices: Arc<dyn DeviceRegistry>,
    pub slots: Arc<dyn SlotStatusStore>,
    pub logs: Arc<dyn IngredientLogStore>,
    pub alerts: Arc<dyn AlertStore>,
    pub audit: Arc<dyn AuditStore>,
    pub users: Arc<dyn UserDirectory>,
}

impl Stores {
    /// Every collaborator backed by the same in-memory store.
    pub fn in_memory(store: Arc<InMemoryStore>) -> Self {
        Self {
            devices: store.clone(),
            slots: store.clone(),
            logs: store.clone(),
            alerts: store.clone(),
            audit: store.clone(),
            users: store,
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditStore>) -> Self {
        self.audit = audit;
        self
    }
}
