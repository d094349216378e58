//! Ingestion pipeline - one telemetry message in, state changes and
//! notifications out.
//!
//! Each message is an isolated unit of work: [`IngestionPipeline::handle`]
//! never returns an error. Failures are logged and collected in the
//! [`IngestReport`], and processing of later messages is unaffected.
//!
//! The "read last log, classify, write log" sequence for one (device, slot)
//! runs under a per-slot async mutex, so concurrent readings for the same
//! slot are classified against each other's results. Different slots and
//! devices proceed in parallel.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::classifier::{Classifier, Decision, Reading, Thresholds};
use crate::command::CommandHandler;
use crate::error::{IngestError, IngestResult};
use crate::ingress::{CommandResponse, Heartbeat, SlotReading, TelemetryMessage};
use crate::live_state::{LastReading, LiveStateCache};
use crate::model::{
    AlertSubject, AlertType, AuditRecord, DeviceRecord, DeviceUpdate, IngredientLogEntry,
    NewAlert, SlotStatus, UNKNOWN_STATUS,
};
use crate::notification::{
    AlertDeduplicator, DeviceStatusPush, NfcEventType, NotificationDispatcher, RaiseOutcome,
    RealtimeEvent, UpdatePush,
};
use crate::store::{AppendOutcome, DeviceRegistry, IngredientLogStore, SlotStatusStore, Stores};

/// Source recorded on log entries written from device telemetry.
pub const DEVICE_SOURCE: &str = "device";

/// How far a message got through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Unknown device or device lookup failure
    Dropped,
    Heartbeat,
    /// Reading without an ingredient: live state only
    Untracked,
    Classified,
    /// Reading not newer than the slot's latest log entry: no slot update, no alerts
    Stale,
    Command,
}

/// What happened to one message.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
    pub device_id: String,
    pub outcome: IngestOutcome,
    pub decision: Option<Decision>,
    /// A new log entry was appended
    pub logged: bool,
    pub alerts_created: Vec<AlertType>,
    pub alerts_suppressed: Vec<AlertType>,
    pub command: Option<NfcEventType>,
    /// Step failures, already logged
    pub failures: Vec<String>,
}

impl IngestReport {
    fn new(device_id: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            outcome: IngestOutcome::Dropped,
            decision: None,
            logged: false,
            alerts_created: Vec::new(),
            alerts_suppressed: Vec::new(),
            command: None,
            failures: Vec::new(),
        }
    }

    fn fail(&mut self, err: IngestError) {
        warn!(device_id = %self.device_id, error = %err, "Ingestion step failed");
        self.failures.push(err.to_string());
    }
}

pub struct IngestionPipeline {
    stores: Stores,
    live: Arc<LiveStateCache>,
    classifier: Classifier,
    alerts: Arc<AlertDeduplicator>,
    dispatcher: Arc<NotificationDispatcher>,
    commands: CommandHandler,
    slot_locks: DashMap<(String, String), Arc<Mutex<()>>>,
}

impl IngestionPipeline {
    pub fn new(
        stores: Stores,
        live: Arc<LiveStateCache>,
        alerts: Arc<AlertDeduplicator>,
        dispatcher: Arc<NotificationDispatcher>,
    ) -> Self {
        let commands = CommandHandler::new(stores.slots.clone(), dispatcher.clone());
        Self {
            stores,
            live,
            classifier: Classifier::default(),
            alerts,
            dispatcher,
            commands,
            slot_locks: DashMap::new(),
        }
    }

    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.classifier = Classifier::new(thresholds);
        self
    }

    pub fn live_state(&self) -> &Arc<LiveStateCache> {
        &self.live
    }

    pub fn alerts(&self) -> &Arc<AlertDeduplicator> {
        &self.alerts
    }

    /// Process one message using the current time as receive time.
    pub async fn handle(&self, message: TelemetryMessage) -> IngestReport {
        self.handle_at(message, Utc::now()).await
    }

    /// Process one message received at `now`.
    pub async fn handle_at(&self, message: TelemetryMessage, now: DateTime<Utc>) -> IngestReport {
        let mut report = IngestReport::new(message.device_id());
        let result = match message {
            TelemetryMessage::Heartbeat(heartbeat) => {
                self.ingest_heartbeat(heartbeat, now, &mut report).await
            }
            TelemetryMessage::Reading(reading) => self.ingest_reading(reading, now, &mut report).await,
            TelemetryMessage::CommandResponse(response) => {
                self.ingest_command(response, now, &mut report).await
            }
        };

        match result {
            Ok(()) => {}
            Err(IngestError::UnknownDevice(device_id)) => {
                warn!(device_id = %device_id, "Device not registered, dropping message");
                report.outcome = IngestOutcome::Dropped;
            }
            Err(e) => {
                report.outcome = IngestOutcome::Dropped;
                report.fail(e);
            }
        }
        report
    }

    async fn resolve(&self, device_id: &str) -> IngestResult<DeviceRecord> {
        self.stores
            .devices
            .find_by_rack_id(device_id)
            .await
            .map_err(|e| IngestError::persistence("resolve_device", e))?
            .ok_or_else(|| IngestError::UnknownDevice(device_id.to_string()))
    }

    async fn update_device(&self, rack_id: &str, update: &DeviceUpdate, report: &mut IngestReport) {
        match self.stores.devices.apply_update(rack_id, update).await {
            Ok(true) => {}
            Ok(false) => debug!(device_id = %rack_id, "Device vanished before update"),
            Err(e) => report.fail(IngestError::persistence("device_update", e)),
        }
    }

    async fn ingest_heartbeat(
        &self,
        heartbeat: Heartbeat,
        now: DateTime<Utc>,
        report: &mut IngestReport,
    ) -> IngestResult<()> {
        let device = self.resolve(&heartbeat.device_id).await?;

        let update = DeviceUpdate {
            ip_address: heartbeat.ip_address,
            firmware_version: heartbeat.firmware_version,
            ..DeviceUpdate::seen_at(now)
        };
        self.update_device(&device.rack_id, &update, report).await;
        self.live.touch(&device.rack_id, now);

        let ingredient = self
            .live
            .get(&device.rack_id)
            .and_then(|entry| entry.last_reading)
            .and_then(|reading| reading.ingredient);
        self.dispatcher.push(RealtimeEvent::DeviceStatus(DeviceStatusPush {
            device_id: device.rack_id.clone(),
            is_online: true,
            last_seen: Some(now),
            weight: device.last_weight,
            status: device.last_status.clone(),
            ingredient,
        }));

        report.outcome = IngestOutcome::Heartbeat;
        Ok(())
    }

    async fn ingest_command(
        &self,
        response: CommandResponse,
        now: DateTime<Utc>,
        report: &mut IngestReport,
    ) -> IngestResult<()> {
        let device = self.resolve(&response.device_id).await?;
        self.update_device(&device.rack_id, &DeviceUpdate::seen_at(now), report)
            .await;
        self.live.touch(&device.rack_id, now);

        let at = response.timestamp.unwrap_or(now);
        match self
            .commands
            .handle(&device.rack_id, response.slot_id.as_deref(), &response.exchange, at)
            .await
        {
            Ok(event_type) => report.command = Some(event_type),
            Err(e) => report.fail(e),
        }

        report.outcome = IngestOutcome::Command;
        Ok(())
    }

    async fn ingest_reading(
        &self,
        reading: SlotReading,
        now: DateTime<Utc>,
        report: &mut IngestReport,
    ) -> IngestResult<()> {
        // 1. resolve
        let device = self.resolve(&reading.device_id).await?;

        // 2. device record
        let update = DeviceUpdate {
            last_weight: reading.weight,
            last_status: reading.status.clone(),
            ip_address: reading.ip_address.clone(),
            firmware_version: reading.firmware_version.clone(),
            ..DeviceUpdate::seen_at(now)
        };
        self.update_device(&device.rack_id, &update, report).await;

        // 3. live state
        self.live.record_reading(
            &device.rack_id,
            now,
            LastReading {
                slot_id: reading.slot_id.clone(),
                ingredient: reading.ingredient.clone(),
                weight: reading.weight,
                status: reading.status.clone(),
            },
        );

        // 4. realtime
        self.dispatcher.push(RealtimeEvent::Update(UpdatePush {
            device_id: device.rack_id.clone(),
            slot_id: reading.slot_id.clone(),
            ingredient: reading.ingredient.clone(),
            weight: reading.weight,
            status: reading.status.clone(),
            is_online: true,
            last_seen: now,
            ip_address: reading.ip_address.clone().or_else(|| device.ip_address.clone()),
        }));
        self.dispatcher.push(RealtimeEvent::DeviceStatus(DeviceStatusPush {
            device_id: device.rack_id.clone(),
            is_online: true,
            last_seen: Some(now),
            weight: reading.weight,
            status: reading.status.clone(),
            ingredient: reading.ingredient.clone(),
        }));

        // 9. command side channel
        if let Some(exchange) = &reading.command {
            let at = reading.timestamp.unwrap_or(now);
            match self
                .commands
                .handle(&device.rack_id, Some(&reading.slot_id), exchange, at)
                .await
            {
                Ok(event_type) => report.command = Some(event_type),
                Err(e) => report.fail(e),
            }
        }

        // 5. untracked slot
        let Some(ingredient) = reading.ingredient.clone() else {
            debug!(
                device_id = %device.rack_id,
                slot_id = %reading.slot_id,
                "No ingredient, skipping classification"
            );
            report.outcome = IngestOutcome::Untracked;
            return Ok(());
        };
        report.outcome = IngestOutcome::Classified;

        // 6-7. classify and persist under the slot lock
        let lock = self.slot_lock(&device.rack_id, &reading.slot_id);
        {
            let _guard = lock.lock().await;
            if let Err(e) = self
                .classify_and_record(&device, &reading, &ingredient, now, report)
                .await
            {
                report.fail(e);
            }
        }

        if report.outcome == IngestOutcome::Stale {
            return Ok(());
        }

        // 8. critical status
        if let Some(status) = &reading.status {
            if let Some(alert_type) = AlertType::for_critical_status(status) {
                let request = NewAlert::new(
                    AlertSubject::slot(
                        device.rack_id.as_str(),
                        reading.slot_id.as_str(),
                        ingredient.as_str(),
                        device.owner_id.as_str(),
                    ),
                    alert_type,
                )
                .with_user(device.owner_id.as_str())
                .with_status(Some(status.clone()));
                self.raise(request, report).await;
            }
        }

        Ok(())
    }

    async fn classify_and_record(
        &self,
        device: &DeviceRecord,
        reading: &SlotReading,
        ingredient: &str,
        now: DateTime<Utc>,
        report: &mut IngestReport,
    ) -> IngestResult<()> {
        let previous = self
            .stores
            .logs
            .latest(&device.rack_id, &reading.slot_id)
            .await
            .map_err(|e| IngestError::persistence("latest_log", e))?;
        if let (Some(at), Some(latest)) = (reading.timestamp, previous.as_ref()) {
            if at <= latest.timestamp {
                debug!(
                    device_id = %device.rack_id,
                    slot_id = %reading.slot_id,
                    timestamp = %at,
                    latest = %latest.timestamp,
                    "Reading not newer than latest log, skipped"
                );
                report.outcome = IngestOutcome::Stale;
                return Ok(());
            }
        }
        let previous_reading = previous.as_ref().map(Reading::from);

        let weight = reading
            .weight
            .or_else(|| previous.as_ref().map(|entry| entry.weight));
        let current = Reading {
            slot_id: reading.slot_id.clone(),
            ingredient: ingredient.to_string(),
            weight: weight.unwrap_or(0.0),
            status: reading
                .status
                .clone()
                .unwrap_or_else(|| UNKNOWN_STATUS.to_string()),
        };
        let decision = self.classifier.classify(previous_reading.as_ref(), &current);
        debug!(
            device_id = %device.rack_id,
            slot_id = %reading.slot_id,
            should_log = decision.should_log,
            rules = ?decision.matched_rules,
            "Reading classified"
        );

        let existing_tag = match &reading.tag_uid {
            Some(_) => None,
            None => match self.stores.slots.get(&device.rack_id, &reading.slot_id).await {
                Ok(slot) => slot.and_then(|s| s.tag_uid),
                Err(e) => {
                    report.fail(IngestError::persistence("slot_lookup", e));
                    None
                }
            },
        };
        let tag_uid = reading.tag_uid.clone().or(existing_tag);

        let slot = SlotStatus {
            device_id: device.rack_id.clone(),
            slot_id: reading.slot_id.clone(),
            ingredient: Some(ingredient.to_string()),
            tag_uid: tag_uid.clone(),
            weight,
            status: Some(decision.logged_status.clone()),
            last_updated: now,
        };
        if let Err(e) = self.stores.slots.upsert(slot).await {
            report.fail(IngestError::persistence("slot_upsert", e));
        }

        let mut duplicate = false;
        if decision.should_log {
            let entry = IngredientLogEntry {
                device_id: device.rack_id.clone(),
                slot_id: reading.slot_id.clone(),
                user_id: Some(device.owner_id.clone()),
                ingredient: ingredient.to_string(),
                tag_uid,
                weight: current.weight,
                status: decision.logged_status.clone(),
                event_tag: decision.event_tag,
                source: DEVICE_SOURCE.to_string(),
                timestamp: reading.timestamp.unwrap_or(now),
            };
            match self.stores.logs.append(entry.clone()).await {
                Ok(AppendOutcome::Inserted) => {
                    info!(
                        device_id = %entry.device_id,
                        slot_id = %entry.slot_id,
                        weight = entry.weight,
                        status = %entry.status,
                        event_tag = ?entry.event_tag,
                        "Ingredient log appended"
                    );
                    report.logged = true;
                    self.dispatcher.audit(AuditRecord::log_created(&entry));
                }
                Ok(AppendOutcome::Duplicate) => {
                    duplicate = true;
                    debug!(
                        device_id = %entry.device_id,
                        slot_id = %entry.slot_id,
                        timestamp = %entry.timestamp,
                        "Log entry with same timestamp exists, skipped"
                    );
                }
                Err(e) => report.fail(IngestError::persistence("append_log", e)),
            }
        }

        if let Some(alert_type) = decision.alert_type.filter(|_| !duplicate) {
            let request = NewAlert::new(
                AlertSubject::slot(
                    device.rack_id.as_str(),
                    reading.slot_id.as_str(),
                    ingredient,
                    device.owner_id.as_str(),
                ),
                alert_type,
            )
            .with_user(device.owner_id.as_str())
            .with_details(decision.alert_details.clone())
            .with_status(Some(decision.logged_status.clone()));
            self.raise(request, report).await;
        }

        report.decision = Some(decision);
        Ok(())
    }

    async fn raise(&self, request: NewAlert, report: &mut IngestReport) {
        let alert_type = request.alert_type;
        match self.alerts.raise(request).await {
            Ok(RaiseOutcome::Created(_)) => report.alerts_created.push(alert_type),
            Ok(RaiseOutcome::Suppressed { .. }) => report.alerts_suppressed.push(alert_type),
            Err(e) => report.fail(IngestError::persistence("raise_alert", e)),
        }
    }

    fn slot_lock(&self, device_id: &str, slot_id: &str) -> Arc<Mutex<()>> {
        self.slot_locks
            .entry((device_id.to_string(), slot_id.to_string()))
            .or_default()
            .clone()
    }
}
