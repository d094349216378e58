//! Domain records shared by the pipeline, the stores and the notifiers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status written to a log entry when the reading is physically implausible.
pub const SENSOR_ERROR_STATUS: &str = "SENSOR_ERROR";

/// Status used when a device reports none.
pub const UNKNOWN_STATUS: &str = "UNKNOWN";

/// A registered rack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    /// Stable rack identifier, unique across the registry
    pub rack_id: String,
    #[serde(default)]
    pub name: String,
    /// Owning user
    pub owner_id: String,
    #[serde(default)]
    pub is_online: bool,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_weight: Option<f64>,
    #[serde(default)]
    pub last_status: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub firmware_version: Option<String>,
}

impl DeviceRecord {
    pub fn new(rack_id: impl Into<String>, owner_id: impl Into<String>) -> Self {
        let rack_id = rack_id.into();
        Self {
            name: rack_id.clone(),
            rack_id,
            owner_id: owner_id.into(),
            is_online: false,
            last_seen: None,
            last_weight: None,
            last_status: None,
            ip_address: None,
            firmware_version: None,
        }
    }
}

/// Partial update of a [`DeviceRecord`]. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceUpdate {
    pub is_online: Option<bool>,
    pub last_seen: Option<DateTime<Utc>>,
    pub last_weight: Option<f64>,
    pub last_status: Option<String>,
    pub ip_address: Option<String>,
    pub firmware_version: Option<String>,
}

impl DeviceUpdate {
    /// Update recorded for any message proving the device is alive.
    pub fn seen_at(now: DateTime<Utc>) -> Self {
        Self {
            is_online: Some(true),
            last_seen: Some(now),
            ..Default::default()
        }
    }

    /// Update applied by the heartbeat monitor on a liveness transition.
    pub fn online(is_online: bool) -> Self {
        Self {
            is_online: Some(is_online),
            ..Default::default()
        }
    }

    pub fn apply_to(&self, record: &mut DeviceRecord) {
        if let Some(is_online) = self.is_online {
            record.is_online = is_online;
        }
        if let Some(last_seen) = self.last_seen {
            record.last_seen = Some(last_seen);
        }
        if let Some(weight) = self.last_weight {
            record.last_weight = Some(weight);
        }
        if let Some(status) = &self.last_status {
            record.last_status = Some(status.clone());
        }
        if let Some(ip) = &self.ip_address {
            record.ip_address = Some(ip.clone());
        }
        if let Some(firmware) = &self.firmware_version {
            record.firmware_version = Some(firmware.clone());
        }
    }
}

/// Live state of one slot on a rack. One row per (device, slot).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotStatus {
    pub device_id: String,
    pub slot_id: String,
    pub ingredient: Option<String>,
    #[serde(rename = "tagUID")]
    pub tag_uid: Option<String>,
    pub weight: Option<f64>,
    pub status: Option<String>,
    pub last_updated: DateTime<Utc>,
}

/// Stock event recognised by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventTag {
    Restock,
    BatchUsage,
}

/// Append-only log entry, unique per (device, slot, timestamp).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngredientLogEntry {
    pub device_id: String,
    pub slot_id: String,
    pub user_id: Option<String>,
    pub ingredient: String,
    #[serde(rename = "tagUID")]
    pub tag_uid: Option<String>,
    pub weight: f64,
    pub status: String,
    pub event_tag: Option<EventTag>,
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    LowStock,
    Empty,
    Overweight,
    Depletion,
    Restock,
    BatchUsage,
    SensorError,
    Offline,
    Online,
    Anomaly,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::LowStock => "LOW_STOCK",
            AlertType::Empty => "EMPTY",
            AlertType::Overweight => "OVERWEIGHT",
            AlertType::Depletion => "DEPLETION",
            AlertType::Restock => "RESTOCK",
            AlertType::BatchUsage => "BATCH_USAGE",
            AlertType::SensorError => "SENSOR_ERROR",
            AlertType::Offline => "OFFLINE",
            AlertType::Online => "ONLINE",
            AlertType::Anomaly => "ANOMALY",
        }
    }

    /// Stock alert raised for a critical status tag, if the tag is critical.
    ///
    /// `LOW`, `VLOW` and `EMPTY` (any case, `VERY_LOW`/`VERY-LOW` accepted) are critical.
    pub fn for_critical_status(status: &str) -> Option<AlertType> {
        let normalized = status.trim().to_ascii_uppercase().replace('-', "_");
        match normalized.as_str() {
            "EMPTY" => Some(AlertType::Empty),
            "LOW" | "VLOW" | "VERY_LOW" => Some(AlertType::LowStock),
            _ => None,
        }
    }
}

impl From<EventTag> for AlertType {
    fn from(tag: EventTag) -> Self {
        match tag {
            EventTag::Restock => AlertType::Restock,
            EventTag::BatchUsage => AlertType::BatchUsage,
        }
    }
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an alert is about. Liveness alerts are keyed by device only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum AlertSubject {
    Device {
        device_id: String,
    },
    Slot {
        device_id: String,
        slot_id: String,
        ingredient: String,
        user_id: String,
    },
}

impl AlertSubject {
    pub fn device(device_id: impl Into<String>) -> Self {
        AlertSubject::Device {
            device_id: device_id.into(),
        }
    }

    pub fn slot(
        device_id: impl Into<String>,
        slot_id: impl Into<String>,
        ingredient: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        AlertSubject::Slot {
            device_id: device_id.into(),
            slot_id: slot_id.into(),
            ingredient: ingredient.into(),
            user_id: user_id.into(),
        }
    }

    pub fn device_id(&self) -> &str {
        match self {
            AlertSubject::Device { device_id } | AlertSubject::Slot { device_id, .. } => device_id,
        }
    }

    pub fn slot_id(&self) -> Option<&str> {
        match self {
            AlertSubject::Device { .. } => None,
            AlertSubject::Slot { slot_id, .. } => Some(slot_id),
        }
    }

    pub fn ingredient(&self) -> Option<&str> {
        match self {
            AlertSubject::Device { .. } => None,
            AlertSubject::Slot { ingredient, .. } => Some(ingredient),
        }
    }
}

/// Request to raise an alert; the deduplicator decides whether it becomes a row.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAlert {
    pub subject: AlertSubject,
    pub alert_type: AlertType,
    /// User to notify. For slot alerts this is also part of the subject.
    pub user_id: Option<String>,
    pub details: Option<String>,
    /// Status tag that triggered the alert, echoed on the realtime channel
    pub status: Option<String>,
}

impl NewAlert {
    pub fn new(subject: AlertSubject, alert_type: AlertType) -> Self {
        Self {
            subject,
            alert_type,
            user_id: None,
            details: None,
            status: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_details(mut self, details: Option<String>) -> Self {
        self.details = details;
        self
    }

    pub fn with_status(mut self, status: Option<String>) -> Self {
        self.status = status;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: Uuid,
    /// Dedup key: at most one unacknowledged alert exists per key
    pub key: String,
    pub subject: AlertSubject,
    pub alert_type: AlertType,
    pub user_id: Option<String>,
    pub details: Option<String>,
    pub acknowledged: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    LogCreated,
    AlertCreated,
}

/// One row per mutating action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub ts: DateTime<Utc>,
    pub action: AuditAction,
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl AuditRecord {
    pub fn log_created(entry: &IngredientLogEntry) -> Self {
        Self {
            ts: Utc::now(),
            action: AuditAction::LogCreated,
            device_id: entry.device_id.clone(),
            slot_id: Some(entry.slot_id.clone()),
            user_id: entry.user_id.clone(),
            detail: Some(serde_json::json!({
                "ingredient": entry.ingredient,
                "weight": entry.weight,
                "status": entry.status,
                "eventTag": entry.event_tag,
                "timestamp": entry.timestamp,
            })),
        }
    }

    pub fn alert_created(alert: &Alert) -> Self {
        Self {
            ts: Utc::now(),
            action: AuditAction::AlertCreated,
            device_id: alert.subject.device_id().to_string(),
            slot_id: alert.subject.slot_id().map(str::to_string),
            user_id: alert.user_id.clone(),
            detail: Some(serde_json::json!({
                "alertId": alert.id,
                "alertType": alert.alert_type,
                "key": alert.key,
                "details": alert.details,
            })),
        }
    }
}

/// Account owning devices; only the webhook target matters here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_update_leaves_absent_fields() {
        let mut record = DeviceRecord::new("rack-1", "user-1");
        record.ip_address = Some("10.0.0.5".to_string());
        record.last_weight = Some(420.0);

        let update = DeviceUpdate {
            last_status: Some("OK".to_string()),
            ..DeviceUpdate::seen_at(Utc::now())
        };
        update.apply_to(&mut record);

        assert!(record.is_online);
        assert_eq!(record.ip_address.as_deref(), Some("10.0.0.5"));
        assert_eq!(record.last_weight, Some(420.0));
        assert_eq!(record.last_status.as_deref(), Some("OK"));
    }

    #[test]
    fn test_critical_status_mapping() {
        assert_eq!(AlertType::for_critical_status("EMPTY"), Some(AlertType::Empty));
        assert_eq!(AlertType::for_critical_status("low"), Some(AlertType::LowStock));
        assert_eq!(AlertType::for_critical_status("VLOW"), Some(AlertType::LowStock));
        assert_eq!(AlertType::for_critical_status("very-low"), Some(AlertType::LowStock));
        assert_eq!(AlertType::for_critical_status("GOOD"), None);
        assert_eq!(AlertType::for_critical_status(""), None);
    }

    #[test]
    fn test_alert_type_serializes_screaming_case() {
        let json = serde_json::to_string(&AlertType::BatchUsage).unwrap();
        assert_eq!(json, "\"BATCH_USAGE\"");
        assert_eq!(AlertType::SensorError.to_string(), "SENSOR_ERROR");
    }

    #[test]
    fn test_device_record_from_registry_json() {
        let json = r#"{"rackId":"rack-7","ownerId":"u-1","name":"Pantry"}"#;
        let record: DeviceRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.rack_id, "rack-7");
        assert!(!record.is_online);
        assert!(record.last_seen.is_none());
    }
}
