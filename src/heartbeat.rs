//! Heartbeat monitor - periodic sweep flipping devices online/offline
//!
//! A device is offline once `now - last_heartbeat > offline_threshold`.
//! The monitor keeps its own view of each device's liveness and acts only
//! on transitions: the device record is updated, `deviceStatus` is pushed
//! and an OFFLINE/ONLINE alert is raised through the deduplicator.
//!
//! Each device check is bounded by `check_timeout`; a slow or failing check
//! is logged and retried on the next sweep without holding up the others.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::HeartbeatConfig;
use crate::error::{IngestError, IngestResult};
use crate::live_state::LiveStateCache;
use crate::model::{AlertSubject, AlertType, DeviceUpdate, NewAlert};
use crate::notification::{AlertDeduplicator, DeviceStatusPush, NotificationDispatcher, RealtimeEvent};
use crate::store::DeviceRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Online,
    Offline,
}

impl Liveness {
    pub fn alert_type(&self) -> AlertType {
        match self {
            Liveness::Online => AlertType::Online,
            Liveness::Offline => AlertType::Offline,
        }
    }
}

/// Result of one sweep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    pub checked: usize,
    pub went_offline: Vec<String>,
    pub came_online: Vec<String>,
    /// Checks that errored or timed out; retried next sweep
    pub failed: Vec<String>,
}

pub struct HeartbeatMonitor {
    devices: Arc<dyn DeviceRegistry>,
    live: Arc<LiveStateCache>,
    alerts: Arc<AlertDeduplicator>,
    dispatcher: Arc<NotificationDispatcher>,
    offline_threshold: chrono::Duration,
    check_timeout: Duration,
    /// Last liveness acted on per device; unknown devices count as online
    states: DashMap<String, Liveness>,
}

impl HeartbeatMonitor {
    pub fn new(
        devices: Arc<dyn DeviceRegistry>,
        live: Arc<LiveStateCache>,
        alerts: Arc<AlertDeduplicator>,
        dispatcher: Arc<NotificationDispatcher>,
        config: &HeartbeatConfig,
    ) -> Self {
        Self {
            devices,
            live,
            alerts,
            dispatcher,
            offline_threshold: chrono::Duration::milliseconds(
                i64::try_from(config.offline_threshold_ms).unwrap_or(i64::MAX),
            ),
            check_timeout: config.check_timeout(),
            states: DashMap::new(),
        }
    }

    pub fn liveness(&self, device_id: &str) -> Option<Liveness> {
        self.states.get(device_id).map(|state| *state)
    }

    /// Sweep using the current time.
    pub async fn sweep(&self) -> SweepReport {
        self.sweep_at(Utc::now()).await
    }

    /// Check every tracked device against `now`.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        for (device_id, last_heartbeat) in self.live.heartbeats() {
            report.checked += 1;
            let check = self.check_device(&device_id, last_heartbeat, now);
            match tokio::time::timeout(self.check_timeout, check).await {
                Ok(Ok(Some(Liveness::Offline))) => report.went_offline.push(device_id),
                Ok(Ok(Some(Liveness::Online))) => report.came_online.push(device_id),
                Ok(Ok(None)) => {}
                Ok(Err(e)) => {
                    warn!(device_id = %device_id, error = %e, "Heartbeat check failed");
                    report.failed.push(device_id);
                }
                Err(_) => {
                    warn!(
                        device_id = %device_id,
                        timeout_ms = self.check_timeout.as_millis() as u64,
                        "Heartbeat check timed out"
                    );
                    report.failed.push(device_id);
                }
            }
        }

        if !report.went_offline.is_empty() || !report.came_online.is_empty() {
            info!(
                checked = report.checked,
                offline = report.went_offline.len(),
                online = report.came_online.len(),
                "Heartbeat sweep applied transitions"
            );
        }
        report
    }

    /// Returns the new liveness when the device transitioned.
    async fn check_device(
        &self,
        device_id: &str,
        last_heartbeat: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> IngestResult<Option<Liveness>> {
        let next = if now - last_heartbeat > self.offline_threshold {
            Liveness::Offline
        } else {
            Liveness::Online
        };
        let previous = self.liveness(device_id).unwrap_or(Liveness::Online);
        if previous == next {
            return Ok(None);
        }

        let device = self
            .devices
            .find_by_rack_id(device_id)
            .await
            .map_err(|e| IngestError::persistence("resolve_device", e))?
            .ok_or_else(|| IngestError::UnknownDevice(device_id.to_string()))?;

        let online = next == Liveness::Online;
        self.devices
            .apply_update(device_id, &DeviceUpdate::online(online))
            .await
            .map_err(|e| IngestError::persistence("device_update", e))?;

        let last_reading = self.live.get(device_id).and_then(|entry| entry.last_reading);
        self.dispatcher.push(RealtimeEvent::DeviceStatus(DeviceStatusPush {
            device_id: device_id.to_string(),
            is_online: online,
            last_seen: device.last_seen.or(Some(last_heartbeat)),
            weight: device.last_weight,
            status: device.last_status.clone(),
            ingredient: last_reading.and_then(|reading| reading.ingredient),
        }));

        let silent_secs = (now - last_heartbeat).num_seconds();
        let details = match next {
            Liveness::Offline => format!("No heartbeat for {}s", silent_secs),
            Liveness::Online => "Heartbeat resumed".to_string(),
        };
        let alert_type = next.alert_type();
        let request = NewAlert::new(AlertSubject::device(device_id), alert_type)
            .with_user(device.owner_id.as_str())
            .with_details(Some(details))
            .with_status(Some(alert_type.as_str().to_string()));
        self.alerts
            .raise(request)
            .await
            .map_err(|e| IngestError::persistence("raise_alert", e))?;

        // recorded last so a failed transition is retried next sweep
        self.states.insert(device_id.to_string(), next);
        info!(device_id = %device_id, online, "Device liveness changed");
        Ok(Some(next))
    }

    /// Sweep every `interval` until shutdown.
    pub async fn run(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_ms = interval.as_millis() as u64, "Heartbeat monitor started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let report = self.sweep().await;
                    debug!(checked = report.checked, failed = report.failed.len(), "Heartbeat sweep done");
                }
            }
        }

        info!("Heartbeat monitor stopped");
    }
}
