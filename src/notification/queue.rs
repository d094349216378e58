//! Background notification queue
//!
//! Webhook deliveries and audit writes leave the ingestion path through a
//! bounded channel. Enqueueing never waits: when the queue is full the task
//! is dropped with a warning. A small worker pool drains the channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::webhook::{WebhookPayload, WebhookSender};
use crate::error::{IngestError, IngestResult};
use crate::model::AuditRecord;
use crate::store::{AuditStore, UserDirectory};

/// Side effect executed off the ingestion path.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationTask {
    /// POST to the webhook of `user_id`, if the user has one
    Webhook {
        user_id: String,
        payload: WebhookPayload,
    },
    Audit(AuditRecord),
}

impl NotificationTask {
    fn kind(&self) -> &'static str {
        match self {
            NotificationTask::Webhook { .. } => "webhook",
            NotificationTask::Audit(_) => "audit",
        }
    }
}

/// Producer side, cheap to share.
#[derive(Debug)]
pub struct NotificationQueue {
    sender: mpsc::Sender<NotificationTask>,
    dropped: AtomicU64,
}

/// Consumer side, handed to [`spawn_workers`].
pub type NotificationReceiver = mpsc::Receiver<NotificationTask>;

impl NotificationQueue {
    pub fn channel(capacity: usize) -> (Self, NotificationReceiver) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                sender,
                dropped: AtomicU64::new(0),
            },
            receiver,
        )
    }

    /// Enqueue without waiting. Returns `false` when the task was dropped.
    pub fn enqueue(&self, task: NotificationTask) -> bool {
        match self.sender.try_send(task) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(task)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(task = task.kind(), "Notification queue full, dropping task");
                false
            }
            Err(mpsc::error::TrySendError::Closed(task)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(task = task.kind(), "Notification queue closed, dropping task");
                false
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// What a worker needs to execute tasks.
#[derive(Clone)]
pub struct WorkerContext {
    pub webhook: Arc<dyn WebhookSender>,
    pub users: Arc<dyn UserDirectory>,
    pub audit: Arc<dyn AuditStore>,
    /// Log webhooks instead of sending them
    pub dry_run: bool,
}

/// Start `workers` tasks sharing one receiver. They stop when every
/// producer is gone, or when the shutdown token fires after executing
/// whatever is already queued.
pub fn spawn_workers(
    receiver: NotificationReceiver,
    workers: usize,
    context: WorkerContext,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let receiver = Arc::new(Mutex::new(receiver));
    (0..workers.max(1))
        .map(|worker_id| {
            let receiver = receiver.clone();
            let context = context.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    let next = tokio::select! {
                        _ = shutdown.cancelled() => None,
                        task = async { receiver.lock().await.recv().await } => task,
                    };
                    let Some(task) = next else { break };
                    run_task(worker_id, &context, task).await;
                }

                // drain without waiting for new work
                loop {
                    let next = receiver.lock().await.try_recv();
                    let Ok(task) = next else { break };
                    run_task(worker_id, &context, task).await;
                }
                debug!(worker_id, "Notification worker stopped");
            })
        })
        .collect()
}

async fn run_task(worker_id: usize, context: &WorkerContext, task: NotificationTask) {
    let kind = task.kind();
    if let Err(e) = execute(context, task).await {
        warn!(worker_id, task = kind, error = %e, "Notification task failed");
    }
}

/// Run one task. Failures are returned for logging and never retried.
pub async fn execute(context: &WorkerContext, task: NotificationTask) -> IngestResult<()> {
    match task {
        NotificationTask::Audit(record) => context
            .audit
            .append(record)
            .await
            .map_err(|e| IngestError::persistence("audit", e)),
        NotificationTask::Webhook { user_id, payload } => {
            let url = context
                .users
                .find_user(&user_id)
                .await
                .map_err(|e| IngestError::persistence("webhook_target", e))?
                .and_then(|user| user.webhook_url)
                .filter(|url| !url.trim().is_empty());
            let Some(url) = url else {
                debug!(user_id = %user_id, "User has no webhook configured");
                return Ok(());
            };

            if context.dry_run {
                eprintln!("[DRY-RUN] Would POST {} alert to {}", payload.alert_type, url);
                return Ok(());
            }

            context
                .webhook
                .send(&url, &payload)
                .await
                .map_err(|e| IngestError::Notification(e.to_string()))?;
            debug!(user_id = %user_id, alert_type = %payload.alert_type, "Webhook delivered");
            Ok(())
        }
    }
}
