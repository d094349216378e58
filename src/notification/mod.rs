//! 通知层 - 告警去重与多路分发
//!
//! # 组成
//! 1. `RealtimeHub`：按频道广播状态变化（update / deviceStatus / alert / nfcEvent / commandResponse）
//! 2. `AlertDeduplicator`：同一键只保留一条未确认告警
//! 3. `NotificationDispatcher`：告警创建后推送实时事件、写审计、投递 Webhook
//! 4. `NotificationQueue`：有界后台队列，满时丢弃，不阻塞摄取路径
//!
//! # 使用示例
//! ```ignore
//! use intellirack::notification::{NotificationDispatcher, NotificationQueue, RealtimeHub};
//!
//! let hub = Arc::new(RealtimeHub::default());
//! let (queue, receiver) = NotificationQueue::channel(1024);
//! let dispatcher = NotificationDispatcher::new(hub, Arc::new(queue));
//! ```

pub mod dedup_key;
pub mod deduplicator;
pub mod dispatcher;
pub mod queue;
pub mod realtime;
pub mod webhook;

pub use dedup_key::alert_key;
pub use deduplicator::{AlertDeduplicator, RaiseOutcome};
pub use dispatcher::NotificationDispatcher;
pub use queue::{spawn_workers, NotificationQueue, NotificationReceiver, NotificationTask, WorkerContext};
pub use realtime::{
    AlertPush, CommandResponsePush, DeviceStatusPush, NfcEventPush, NfcEventType, RealtimeEvent,
    RealtimeHub, UpdatePush,
};
pub use webhook::{WebhookClient, WebhookError, WebhookPayload, WebhookSender};
