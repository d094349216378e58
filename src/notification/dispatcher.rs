//! 通知分发器 - 实时推送 + 后台队列
//!
//! 所有方法都是同步且不阻塞的：实时推送走 broadcast，Webhook 与审计写入
//! 进入有界队列由后台 worker 执行，摄取路径从不等待它们。

use std::sync::Arc;
use tracing::debug;

use super::queue::{NotificationQueue, NotificationTask};
use super::realtime::{AlertPush, RealtimeEvent, RealtimeHub};
use super::webhook::WebhookPayload;
use crate::model::{Alert, AuditRecord, NewAlert};

/// 通知分发器
#[derive(Debug)]
pub struct NotificationDispatcher {
    hub: Arc<RealtimeHub>,
    queue: Arc<NotificationQueue>,
}

impl NotificationDispatcher {
    pub fn new(hub: Arc<RealtimeHub>, queue: Arc<NotificationQueue>) -> Self {
        Self { hub, queue }
    }

    pub fn hub(&self) -> &Arc<RealtimeHub> {
        &self.hub
    }

    /// 推送实时事件（无订阅者时丢弃）
    pub fn push(&self, event: RealtimeEvent) {
        let channel = event.channel();
        let receivers = self.hub.publish(event);
        debug!(channel, receivers, "Realtime event published");
    }

    /// 审计记录入队
    pub fn audit(&self, record: AuditRecord) {
        self.queue.enqueue(NotificationTask::Audit(record));
    }

    /// 新告警创建后的分发：实时 `alert`、审计记录、用户 Webhook
    pub fn alert_created(&self, alert: &Alert, request: &NewAlert) {
        self.push(RealtimeEvent::Alert(AlertPush {
            device_id: alert.subject.device_id().to_string(),
            slot_id: alert.subject.slot_id().map(str::to_string),
            ingredient: alert.subject.ingredient().map(str::to_string),
            status: request.status.clone(),
            alert_type: alert.alert_type,
        }));

        self.audit(AuditRecord::alert_created(alert));

        if let Some(user_id) = &alert.user_id {
            self.queue.enqueue(NotificationTask::Webhook {
                user_id: user_id.clone(),
                payload: WebhookPayload::for_alert(alert, request, user_id),
            });
        }
    }
}
