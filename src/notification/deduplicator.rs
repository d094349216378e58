//! 告警去重器 - 同一键在被确认前只存在一条未确认告警
//!
//! ## 去重策略
//! 1. 由主体与类型生成去重键（见 [`super::dedup_key`]）
//! 2. 先查询是否已有未确认告警（快速路径）
//! 3. 再调用存储层的原子 `create_if_absent`，并发触发时只有一个成功
//! 4. 只有真正创建了告警才触发分发（实时推送、审计、Webhook）

use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::dedup_key::alert_key;
use super::dispatcher::NotificationDispatcher;
use crate::error::StoreResult;
use crate::model::{Alert, NewAlert};
use crate::store::AlertStore;

/// 告警请求的处理结果
#[derive(Debug, Clone, PartialEq)]
pub enum RaiseOutcome {
    /// 新建了告警并已分发
    Created(Alert),
    /// 已存在同键未确认告警，本次被抑制
    Suppressed { key: String },
}

impl RaiseOutcome {
    pub fn is_created(&self) -> bool {
        matches!(self, RaiseOutcome::Created(_))
    }
}

/// 告警去重器
pub struct AlertDeduplicator {
    alerts: Arc<dyn AlertStore>,
    dispatcher: Arc<NotificationDispatcher>,
}

impl AlertDeduplicator {
    pub fn new(alerts: Arc<dyn AlertStore>, dispatcher: Arc<NotificationDispatcher>) -> Self {
        Self { alerts, dispatcher }
    }

    /// 请求告警；已有同键未确认告警时不创建也不分发
    pub async fn raise(&self, request: NewAlert) -> StoreResult<RaiseOutcome> {
        let key = alert_key(&request.subject, request.alert_type);

        if let Some(existing) = self.alerts.find_open(&key).await? {
            debug!(key = %key, alert_id = %existing.id, "Alert suppressed (open alert exists)");
            return Ok(RaiseOutcome::Suppressed { key });
        }

        match self.alerts.create_if_absent(&key, &request).await? {
            Some(alert) => {
                info!(
                    key = %key,
                    alert_id = %alert.id,
                    alert_type = %alert.alert_type,
                    "Alert created"
                );
                self.dispatcher.alert_created(&alert, &request);
                Ok(RaiseOutcome::Created(alert))
            }
            None => {
                debug!(key = %key, "Alert suppressed (lost creation race)");
                Ok(RaiseOutcome::Suppressed { key })
            }
        }
    }

    /// 外部确认告警；确认后同键可以再次触发
    pub async fn acknowledge(&self, alert_id: Uuid) -> StoreResult<bool> {
        let acknowledged = self.alerts.acknowledge(alert_id).await?;
        if acknowledged {
            info!(alert_id = %alert_id, "Alert acknowledged");
        }
        Ok(acknowledged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AlertSubject, AlertType};
    use crate::notification::queue::NotificationQueue;
    use crate::notification::realtime::RealtimeHub;
    use crate::store::InMemoryStore;

    fn deduplicator(store: Arc<InMemoryStore>) -> (AlertDeduplicator, Arc<RealtimeHub>) {
        let hub = Arc::new(RealtimeHub::default());
        let (queue, _receiver) = NotificationQueue::channel(64);
        let dispatcher = Arc::new(NotificationDispatcher::new(hub.clone(), Arc::new(queue)));
        (AlertDeduplicator::new(store, dispatcher), hub)
    }

    fn empty_alert(ingredient: &str) -> NewAlert {
        NewAlert::new(
            AlertSubject::slot("rack-1", "S1", ingredient, "u-1"),
            AlertType::Empty,
        )
        .with_user("u-1")
    }

    #[tokio::test]
    async fn test_second_raise_is_suppressed() {
        let store = Arc::new(InMemoryStore::new());
        let (dedup, _hub) = deduplicator(store.clone());

        assert!(dedup.raise(empty_alert("Flour")).await.unwrap().is_created());
        assert!(!dedup.raise(empty_alert("flour")).await.unwrap().is_created());
        assert_eq!(store.alerts().await.len(), 1);
    }

    #[tokio::test]
    async fn test_acknowledge_allows_new_alert() {
        let store = Arc::new(InMemoryStore::new());
        let (dedup, _hub) = deduplicator(store.clone());

        let first = match dedup.raise(empty_alert("Flour")).await.unwrap() {
            RaiseOutcome::Created(alert) => alert,
            other => panic!("expected creation, got {:?}", other),
        };
        assert!(dedup.acknowledge(first.id).await.unwrap());
        assert!(dedup.raise(empty_alert("Flour")).await.unwrap().is_created());
        assert_eq!(store.alerts().await.len(), 2);
    }

    #[tokio::test]
    async fn test_suppressed_raise_pushes_nothing() {
        let store = Arc::new(InMemoryStore::new());
        let (dedup, hub) = deduplicator(store);
        dedup.raise(empty_alert("Flour")).await.unwrap();

        let mut realtime = hub.subscribe();
        dedup.raise(empty_alert("Flour")).await.unwrap();
        assert!(realtime.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_acknowledge_unknown_id() {
        let (dedup, _hub) = deduplicator(Arc::new(InMemoryStore::new()));
        assert!(!dedup.acknowledge(Uuid::new_v4()).await.unwrap());
    }
}
