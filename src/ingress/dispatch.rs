//! Per-device dispatch lanes
//!
//! Every device gets one lane: a bounded FIFO queue drained by a single
//! worker task. Frames from one rack are processed in arrival order while
//! different racks proceed in parallel. A full lane makes [`DeviceLanes::dispatch`]
//! wait, which stalls the MQTT event loop and so pushes back on the broker.
//!
//! Lanes retire after `idle_timeout` without traffic and are respawned on
//! the next frame for that device.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn, Instrument, Span};

use super::TelemetryMessage;
use crate::pipeline::IngestionPipeline;

type Queued = (TelemetryMessage, Span);

struct Lane {
    sender: mpsc::Sender<Queued>,
    handle: JoinHandle<()>,
}

/// Ordered, bounded hand-off from the transport to the pipeline.
pub struct DeviceLanes {
    pipeline: Arc<IngestionPipeline>,
    lanes: Arc<DashMap<String, Lane>>,
    capacity: usize,
    idle_timeout: Duration,
}

impl DeviceLanes {
    pub fn new(pipeline: Arc<IngestionPipeline>, capacity: usize, idle_timeout: Duration) -> Self {
        Self {
            pipeline,
            lanes: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
            idle_timeout,
        }
    }

    /// Number of devices with a live lane.
    pub fn active_lanes(&self) -> usize {
        self.lanes.len()
    }

    /// Queue `message` behind earlier frames from the same device.
    ///
    /// Waits while the device's lane is full.
    pub async fn dispatch(&self, message: TelemetryMessage, span: Span) {
        let device_id = message.device_id().to_string();
        let mut item = (message, span);
        loop {
            let sender = self.sender_for(&device_id);
            match sender.send(item).await {
                Ok(()) => return,
                // lane retired between lookup and send; the next lookup respawns it
                Err(mpsc::error::SendError(returned)) => item = returned,
            }
        }
    }

    /// Stop accepting frames and wait for every lane to drain.
    pub async fn close(self) {
        debug!(lanes = self.active_lanes(), "closing device lanes");
        let keys: Vec<String> = self.lanes.iter().map(|lane| lane.key().clone()).collect();
        let mut handles = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some((_, lane)) = self.lanes.remove(&key) {
                drop(lane.sender);
                handles.push(lane.handle);
            }
        }
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "device lane ended abnormally");
            }
        }
    }

    fn sender_for(&self, device_id: &str) -> mpsc::Sender<Queued> {
        let mut lane = self
            .lanes
            .entry(device_id.to_string())
            .or_insert_with(|| self.spawn_lane(device_id));
        if lane.sender.is_closed() {
            *lane = self.spawn_lane(device_id);
        }
        lane.sender.clone()
    }

    fn spawn_lane(&self, device_id: &str) -> Lane {
        let (sender, receiver) = mpsc::channel(self.capacity);
        let handle = tokio::spawn(run_lane(
            device_id.to_string(),
            receiver,
            Arc::clone(&self.pipeline),
            Arc::clone(&self.lanes),
            self.idle_timeout,
        ));
        debug!(device_id = %device_id, "device lane started");
        Lane { sender, handle }
    }
}

async fn run_lane(
    device_id: String,
    mut receiver: mpsc::Receiver<Queued>,
    pipeline: Arc<IngestionPipeline>,
    lanes: Arc<DashMap<String, Lane>>,
    idle_timeout: Duration,
) {
    loop {
        match tokio::time::timeout(idle_timeout, receiver.recv()).await {
            Ok(Some((message, span))) => {
                pipeline.handle(message).instrument(span).await;
            }
            Ok(None) => break,
            Err(_) => {
                receiver.close();
                // frames queued before the close are still ours
                while let Some((message, span)) = receiver.recv().await {
                    pipeline.handle(message).instrument(span).await;
                }
                lanes.remove_if(&device_id, |_, lane| lane.sender.is_closed());
                debug!(device_id = %device_id, "device lane idle, retired");
                break;
            }
        }
    }
}
