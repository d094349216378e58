//! Service - wires stores, pipeline, heartbeat monitor, queue workers and
//! MQTT ingress under one shutdown token.

pub mod replay;

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::heartbeat::HeartbeatMonitor;
use crate::ingress::run_mqtt_ingress;
use crate::live_state::LiveStateCache;
use crate::notification::{
    spawn_workers, AlertDeduplicator, NotificationDispatcher, NotificationQueue,
    NotificationReceiver, RealtimeHub, WebhookClient, WebhookSender, WorkerContext,
};
use crate::pipeline::IngestionPipeline;
use crate::store::{InMemoryStore, JsonlAuditStore, Stores};

pub use replay::{replay, ReplayFrame, ReplaySummary};

pub struct Service {
    config: AppConfig,
    stores: Stores,
    hub: Arc<RealtimeHub>,
    live: Arc<LiveStateCache>,
    alerts: Arc<AlertDeduplicator>,
    pipeline: Arc<IngestionPipeline>,
    monitor: Arc<HeartbeatMonitor>,
    receiver: Option<NotificationReceiver>,
    webhook: Arc<dyn WebhookSender>,
    dry_run: bool,
    shutdown: CancellationToken,
}

impl Service {
    pub fn new(config: AppConfig, stores: Stores, webhook: Arc<dyn WebhookSender>) -> Self {
        let hub = Arc::new(RealtimeHub::new(config.realtime_capacity));
        let (queue, receiver) = NotificationQueue::channel(config.queue.capacity);
        let dispatcher = Arc::new(NotificationDispatcher::new(hub.clone(), Arc::new(queue)));
        let live = Arc::new(LiveStateCache::new());
        let alerts = Arc::new(AlertDeduplicator::new(
            stores.alerts.clone(),
            dispatcher.clone(),
        ));
        let pipeline = Arc::new(
            IngestionPipeline::new(stores.clone(), live.clone(), alerts.clone(), dispatcher.clone())
                .with_thresholds(config.thresholds),
        );
        let monitor = Arc::new(HeartbeatMonitor::new(
            stores.devices.clone(),
            live.clone(),
            alerts.clone(),
            dispatcher,
            &config.heartbeat,
        ));

        Self {
            config,
            stores,
            hub,
            live,
            alerts,
            pipeline,
            monitor,
            receiver: Some(receiver),
            webhook,
            dry_run: false,
            shutdown: CancellationToken::new(),
        }
    }

    /// Build from configuration: in-memory stores seeded from the registry
    /// file, JSONL audit log when `audit_path` is set, HTTP webhooks.
    pub async fn from_config(config: AppConfig) -> Result<Self> {
        let store = match &config.registry_path {
            Some(path) => InMemoryStore::from_registry_file(path).await?,
            None => InMemoryStore::new(),
        };
        info!(devices = store.device_count().await, "Device registry loaded");

        let mut stores = Stores::in_memory(Arc::new(store));
        if let Some(path) = &config.audit_path {
            info!(path = %path.display(), "Writing audit log");
            stores = stores.with_audit(Arc::new(JsonlAuditStore::new(path)));
        }

        let webhook =
            WebhookClient::new(&config.webhook).context("Failed to create webhook client")?;
        Ok(Self::new(config, stores, Arc::new(webhook)))
    }

    /// Log webhooks instead of sending them
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn hub(&self) -> &Arc<RealtimeHub> {
        &self.hub
    }

    pub fn live_state(&self) -> &Arc<LiveStateCache> {
        &self.live
    }

    pub fn alerts(&self) -> &Arc<AlertDeduplicator> {
        &self.alerts
    }

    pub fn pipeline(&self) -> &Arc<IngestionPipeline> {
        &self.pipeline
    }

    pub fn monitor(&self) -> &Arc<HeartbeatMonitor> {
        &self.monitor
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Start the background notification workers. Only the first call
    /// starts anything.
    pub fn start_workers(&mut self) -> Vec<JoinHandle<()>> {
        let Some(receiver) = self.receiver.take() else {
            warn!("Notification workers already started");
            return Vec::new();
        };
        let context = WorkerContext {
            webhook: self.webhook.clone(),
            users: self.stores.users.clone(),
            audit: self.stores.audit.clone(),
            dry_run: self.dry_run,
        };
        spawn_workers(
            receiver,
            self.config.queue.workers,
            context,
            self.shutdown.clone(),
        )
    }

    /// Cancel every loop started by this service.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Run workers, heartbeat monitor and MQTT ingress until shutdown.
    pub async fn run(mut self) -> Result<()> {
        let mut handles = self.start_workers();

        handles.push(tokio::spawn(Arc::clone(&self.monitor).run(
            self.config.heartbeat.sweep_interval(),
            self.shutdown.clone(),
        )));
        handles.push(tokio::spawn(run_mqtt_ingress(
            self.config.mqtt.clone(),
            Arc::clone(&self.pipeline),
            self.shutdown.clone(),
        )));

        info!(
            broker = %self.config.mqtt.url,
            namespace = %self.config.mqtt.namespace,
            "Service running"
        );
        self.shutdown.cancelled().await;

        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Service task ended abnormally");
            }
        }
        info!("Service stopped");
        Ok(())
    }
}
