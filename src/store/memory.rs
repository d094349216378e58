use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::{
    AlertStore, AppendOutcome, AuditStore, DeviceRegistry, IngredientLogStore, SlotStatusStore,
    UserDirectory,
};
use crate::error::StoreResult;
use crate::model::{
    Alert, AuditRecord, DeviceRecord, DeviceUpdate, IngredientLogEntry, NewAlert, SlotStatus, User,
};

type SlotKey = (String, String);

fn slot_key(device_id: &str, slot_id: &str) -> SlotKey {
    (device_id.to_string(), slot_id.to_string())
}

/// Registry file used to seed devices and users.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RegistryFile {
    pub devices: Vec<DeviceRecord>,
    pub users: Vec<User>,
}

/// In-memory implementation of every store trait.
#[derive(Default)]
pub struct InMemoryStore {
    devices: RwLock<HashMap<String, DeviceRecord>>,
    users: RwLock<HashMap<String, User>>,
    slots: RwLock<HashMap<SlotKey, SlotStatus>>,
    logs: RwLock<HashMap<SlotKey, Vec<IngredientLogEntry>>>,
    // one lock for lookup and insert keeps create_if_absent atomic
    alerts: Mutex<Vec<Alert>>,
    audit: RwLock<Vec<AuditRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store seeded from a registry JSON file.
    pub async fn from_registry_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read registry file {}", path.display()))?;
        let registry: RegistryFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse registry file {}", path.display()))?;

        let store = Self::new();
        for device in registry.devices {
            store.insert_device(device).await;
        }
        for user in registry.users {
            store.insert_user(user).await;
        }
        Ok(store)
    }

    pub async fn insert_device(&self, device: DeviceRecord) {
        self.devices
            .write()
            .await
            .insert(device.rack_id.clone(), device);
    }

    pub async fn insert_user(&self, user: User) {
        self.users.write().await.insert(user.id.clone(), user);
    }

    pub async fn device_count(&self) -> usize {
        self.devices.read().await.len()
    }

    pub async fn logs_for(&self, device_id: &str, slot_id: &str) -> Vec<IngredientLogEntry> {
        self.logs
            .read()
            .await
            .get(&slot_key(device_id, slot_id))
            .cloned()
            .unwrap_or_default()
    }

    pub async fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().await.clone()
    }

    pub async fn open_alerts(&self) -> Vec<Alert> {
        self.alerts
            .lock()
            .await
            .iter()
            .filter(|a| !a.acknowledged)
            .cloned()
            .collect()
    }

    pub async fn audit_records(&self) -> Vec<AuditRecord> {
        self.audit.read().await.clone()
    }
}

#[async_trait]
impl DeviceRegistry for InMemoryStore {
    async fn find_by_rack_id(&self, rack_id: &str) -> StoreResult<Option<DeviceRecord>> {
        Ok(self.devices.read().await.get(rack_id).cloned())
    }

    async fn apply_update(&self, rack_id: &str, update: &DeviceUpdate) -> StoreResult<bool> {
        let mut devices = self.devices.write().await;
        match devices.get_mut(rack_id) {
            Some(record) => {
                update.apply_to(record);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl SlotStatusStore for InMemoryStore {
    async fn upsert(&self, status: SlotStatus) -> StoreResult<()> {
        let key = slot_key(&status.device_id, &status.slot_id);
        let mut slots = self.slots.write().await;
        // tag is owned by tag reads; keep it when a reading does not carry one
        let tag_uid = status
            .tag_uid
            .clone()
            .or_else(|| slots.get(&key).and_then(|s| s.tag_uid.clone()));
        slots.insert(key, SlotStatus { tag_uid, ..status });
        Ok(())
    }

    async fn set_tag(
        &self,
        device_id: &str,
        slot_id: &str,
        tag_uid: Option<String>,
        ingredient: Option<String>,
    ) -> StoreResult<()> {
        let mut slots = self.slots.write().await;
        let entry = slots
            .entry(slot_key(device_id, slot_id))
            .or_insert_with(|| SlotStatus {
                device_id: device_id.to_string(),
                slot_id: slot_id.to_string(),
                ingredient: None,
                tag_uid: None,
                weight: None,
                status: None,
                last_updated: Utc::now(),
            });
        if tag_uid.is_some() {
            entry.tag_uid = tag_uid;
        }
        if ingredient.is_some() {
            entry.ingredient = ingredient;
        }
        entry.last_updated = Utc::now();
        Ok(())
    }

    async fn get(&self, device_id: &str, slot_id: &str) -> StoreResult<Option<SlotStatus>> {
        Ok(self
            .slots
            .read()
            .await
            .get(&slot_key(device_id, slot_id))
            .cloned())
    }
}

#[async_trait]
impl IngredientLogStore for InMemoryStore {
    async fn latest(
        &self,
        device_id: &str,
        slot_id: &str,
    ) -> StoreResult<Option<IngredientLogEntry>> {
        Ok(self
            .logs
            .read()
            .await
            .get(&slot_key(device_id, slot_id))
            .and_then(|entries| entries.iter().max_by_key(|e| e.timestamp))
            .cloned())
    }

    async fn append(&self, entry: IngredientLogEntry) -> StoreResult<AppendOutcome> {
        let mut logs = self.logs.write().await;
        let entries = logs
            .entry(slot_key(&entry.device_id, &entry.slot_id))
            .or_default();
        if entries.iter().any(|e| e.timestamp == entry.timestamp) {
            return Ok(AppendOutcome::Duplicate);
        }
        entries.push(entry);
        Ok(AppendOutcome::Inserted)
    }
}

#[async_trait]
impl AlertStore for InMemoryStore {
    async fn find_open(&self, key: &str) -> StoreResult<Option<Alert>> {
        Ok(self
            .alerts
            .lock()
            .await
            .iter()
            .find(|a| a.key == key && !a.acknowledged)
            .cloned())
    }

    async fn create_if_absent(&self, key: &str, alert: &NewAlert) -> StoreResult<Option<Alert>> {
        let mut alerts = self.alerts.lock().await;
        if alerts.iter().any(|a| a.key == key && !a.acknowledged) {
            return Ok(None);
        }
        let row = Alert {
            id: Uuid::new_v4(),
            key: key.to_string(),
            subject: alert.subject.clone(),
            alert_type: alert.alert_type,
            user_id: alert.user_id.clone(),
            details: alert.details.clone(),
            acknowledged: false,
            created_at: Utc::now(),
        };
        alerts.push(row.clone());
        Ok(Some(row))
    }

    async fn acknowledge(&self, id: Uuid) -> StoreResult<bool> {
        let mut alerts = self.alerts.lock().await;
        match alerts.iter_mut().find(|a| a.id == id) {
            Some(alert) => {
                alert.acknowledged = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl AuditStore for InMemoryStore {
    async fn append(&self, record: AuditRecord) -> StoreResult<()> {
        self.audit.write().await.push(record);
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for InMemoryStore {
    async fn find_user(&self, user_id: &str) -> StoreResult<Option<User>> {
        Ok(self.users.read().await.get(user_id).cloned())
    }
}
