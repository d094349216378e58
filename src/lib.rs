//! IntelliRack - 货架称重遥测接入、设备在线监测、库存事件分类与告警分发

pub mod classifier;
pub mod command;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod ingress;
pub mod live_state;
pub mod model;
pub mod notification;
pub mod pipeline;
pub mod service;
pub mod store;

pub use classifier::{Classifier, Decision, Reading, Rule, Snapshot, Thresholds};
pub use command::{parse_tag_read, CommandHandler, TagRead};
pub use config::AppConfig;
pub use error::{IngestError, IngestResult, IngressError, StoreError, StoreResult};
pub use heartbeat::{HeartbeatMonitor, Liveness, SweepReport};
pub use ingress::{
    parse_topic, route_frame, DeviceLanes, MessageKind, ParsedTopic, TelemetryMessage,
};
pub use live_state::{LastReading, LiveEntry, LiveStateCache};
pub use model::{
    Alert, AlertSubject, AlertType, AuditRecord, DeviceRecord, DeviceUpdate, EventTag,
    IngredientLogEntry, NewAlert, SlotStatus, User,
};
pub use notification::{
    AlertDeduplicator, NotificationDispatcher, NotificationQueue, RaiseOutcome, RealtimeEvent,
    RealtimeHub,
};
pub use pipeline::{IngestOutcome, IngestReport, IngestionPipeline};
pub use service::{replay, ReplayFrame, ReplaySummary, Service};
pub use store::{InMemoryStore, JsonlAuditStore, Stores};
