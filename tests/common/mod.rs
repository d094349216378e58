#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Utc};
use intellirack::config::HeartbeatConfig;
use intellirack::ingress::SlotReading;
use intellirack::notification::NotificationReceiver;
use intellirack::{
    AlertDeduplicator, DeviceRecord, HeartbeatMonitor, InMemoryStore, IngestionPipeline,
    LiveStateCache, NotificationDispatcher, NotificationQueue, RealtimeHub, Stores,
    TelemetryMessage,
};

pub const RACK: &str = "rack-1";
pub const OWNER: &str = "user-1";

/// Pipeline, heartbeat monitor and the store behind them, wired like the service.
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub hub: Arc<RealtimeHub>,
    pub live: Arc<LiveStateCache>,
    pub alerts: Arc<AlertDeduplicator>,
    pub pipeline: Arc<IngestionPipeline>,
    pub monitor: HeartbeatMonitor,
    pub receiver: NotificationReceiver,
}

impl Harness {
    pub async fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        store.insert_device(DeviceRecord::new(RACK, OWNER)).await;
        let stores = Stores::in_memory(store.clone());

        let hub = Arc::new(RealtimeHub::default());
        let (queue, receiver) = NotificationQueue::channel(256);
        let dispatcher = Arc::new(NotificationDispatcher::new(hub.clone(), Arc::new(queue)));
        let live = Arc::new(LiveStateCache::new());
        let alerts = Arc::new(AlertDeduplicator::new(
            stores.alerts.clone(),
            dispatcher.clone(),
        ));
        let pipeline = Arc::new(IngestionPipeline::new(
            stores.clone(),
            live.clone(),
            alerts.clone(),
            dispatcher.clone(),
        ));
        let monitor = HeartbeatMonitor::new(
            stores.devices.clone(),
            live.clone(),
            alerts.clone(),
            dispatcher,
            &HeartbeatConfig::default(),
        );

        Self {
            store,
            hub,
            live,
            alerts,
            pipeline,
            monitor,
            receiver,
        }
    }
}

pub fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-05-01T08:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// A slot reading for `RACK`/`S1` with a GOOD status.
pub fn reading(ingredient: &str, weight: f64) -> SlotReading {
    SlotReading {
        device_id: RACK.to_string(),
        slot_id: "S1".to_string(),
        ingredient: Some(ingredient.to_string()),
        tag_uid: None,
        weight: Some(weight),
        status: Some("GOOD".to_string()),
        timestamp: None,
        ip_address: None,
        firmware_version: None,
        command: None,
    }
}

pub fn with_status(mut reading: SlotReading, status: &str) -> TelemetryMessage {
    reading.status = Some(status.to_string());
    TelemetryMessage::Reading(reading)
}

pub fn msg(reading: SlotReading) -> TelemetryMessage {
    TelemetryMessage::Reading(reading)
}
