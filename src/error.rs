//! 错误类型 - 摄取链路的错误分类
//!
//! 没有任何错误会冒泡到传输层：每条消息是独立的工作单元，
//! 失败只通过日志可见。

use thiserror::Error;

/// 协作存储（设备注册表、日志库、告警库等）的失败
#[derive(Debug, Error)]
pub enum StoreError {
    /// 存储暂时不可用
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// 单条遥测消息处理失败的分类
#[derive(Debug, Error)]
pub enum IngestError {
    /// 设备未注册：丢弃并告警日志
    #[error("device not registered: {0}")]
    UnknownDevice(String),

    /// 载荷无法解析：丢弃并告警日志
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// 持久化失败：保留原状态，不在本条消息内重试
    #[error("persistence failure during {step}: {source}")]
    Persistence {
        step: &'static str,
        #[source]
        source: StoreError,
    },

    /// 通知失败：吞掉，不影响摄取
    #[error("notification failure: {0}")]
    Notification(String),
}

impl IngestError {
    pub fn persistence(step: &'static str, source: StoreError) -> Self {
        Self::Persistence { step, source }
    }
}

pub type IngestResult<T> = Result<T, IngestError>;

/// 传输边界的解码失败（主题或载荷）
#[derive(Debug, Error, PartialEq)]
pub enum IngressError {
    #[error("invalid topic: {0}")]
    InvalidTopic(String),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

impl From<IngressError> for IngestError {
    fn from(err: IngressError) -> Self {
        IngestError::MalformedPayload(err.to_string())
    }
}
