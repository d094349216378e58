//! Realtime push - best-effort broadcast of state changes to subscribers
//!
//! Backed by a `tokio::sync::broadcast` channel. Publishing never waits:
//! with no subscribers the event is dropped, and a subscriber that falls
//! behind loses the oldest events (`RecvError::Lagged`) instead of slowing
//! ingestion down.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::model::AlertType;

/// `update` channel payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePush {
    pub device_id: String,
    pub slot_id: String,
    pub ingredient: Option<String>,
    pub weight: Option<f64>,
    pub status: Option<String>,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
    pub ip_address: Option<String>,
}

/// `deviceStatus` channel payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatusPush {
    pub device_id: String,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub weight: Option<f64>,
    pub status: Option<String>,
    pub ingredient: Option<String>,
}

/// `alert` channel payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertPush {
    pub device_id: String,
    pub slot_id: Option<String>,
    pub ingredient: Option<String>,
    pub status: Option<String>,
    pub alert_type: AlertType,
}

/// Kind of tag operation reported on `nfcEvent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NfcEventType {
    Read,
    Write,
    Clear,
    Format,
    Removed,
    Other,
}

/// `nfcEvent` channel payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NfcEventPush {
    #[serde(rename = "type")]
    pub event_type: NfcEventType,
    pub device_id: String,
    #[serde(rename = "tagUID", skip_serializing_if = "Option::is_none")]
    pub tag_uid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingredient: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// `commandResponse` channel payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponsePush {
    pub device_id: String,
    pub command: String,
    pub response: String,
    pub timestamp: DateTime<Utc>,
}

/// One message on one realtime channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "channel", content = "data")]
pub enum RealtimeEvent {
    #[serde(rename = "update")]
    Update(UpdatePush),
    #[serde(rename = "deviceStatus")]
    DeviceStatus(DeviceStatusPush),
    #[serde(rename = "alert")]
    Alert(AlertPush),
    #[serde(rename = "nfcEvent")]
    NfcEvent(NfcEventPush),
    #[serde(rename = "commandResponse")]
    CommandResponse(CommandResponsePush),
}

impl RealtimeEvent {
    pub fn channel(&self) -> &'static str {
        match self {
            RealtimeEvent::Update(_) => "update",
            RealtimeEvent::DeviceStatus(_) => "deviceStatus",
            RealtimeEvent::Alert(_) => "alert",
            RealtimeEvent::NfcEvent(_) => "nfcEvent",
            RealtimeEvent::CommandResponse(_) => "commandResponse",
        }
    }
}

const DEFAULT_CAPACITY: usize = 1024;

/// Fan-out hub for [`RealtimeEvent`]s, shared via `Arc`.
#[derive(Debug)]
pub struct RealtimeHub {
    sender: broadcast::Sender<RealtimeEvent>,
}

impl RealtimeHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish to every current subscriber; returns how many received it.
    pub fn publish(&self, event: RealtimeEvent) -> usize {
        // Err only means there are no subscribers
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.sender.subscribe()
    }
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
