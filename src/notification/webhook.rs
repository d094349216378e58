//! Webhook 客户端模块
//!
//! 告警创建后向用户配置的 URL 发送一次 HTTP POST。只尝试一次：
//! 失败只记录日志，不重试，也不影响告警本身。

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::config::WebhookConfig;
use crate::model::{Alert, AlertType, NewAlert};

/// Webhook 投递错误
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("webhook returned HTTP {0}")]
    HttpStatus(u16),
}

/// Webhook 请求载荷
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    /// 告警类型
    pub alert_type: AlertType,
    /// 食材名称（设备级告警为空）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingredient: Option<String>,
    /// 设备 rackId
    pub device: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_details: Option<String>,
    /// 接收用户
    pub user: String,
}

impl WebhookPayload {
    /// 由新建的告警行构造载荷
    pub fn for_alert(alert: &Alert, request: &NewAlert, user_id: &str) -> Self {
        Self {
            alert_type: alert.alert_type,
            ingredient: alert.subject.ingredient().map(str::to_string),
            device: alert.subject.device_id().to_string(),
            slot_id: alert.subject.slot_id().map(str::to_string),
            alert_details: request.details.clone(),
            user: user_id.to_string(),
        }
    }
}

/// 发送端抽象，后台 worker 只依赖这个 trait
#[async_trait]
pub trait WebhookSender: Send + Sync {
    async fn send(&self, url: &str, payload: &WebhookPayload) -> Result<(), WebhookError>;
}

/// 基于 reqwest 的 Webhook 客户端
#[derive(Debug, Clone)]
pub struct WebhookClient {
    client: Client,
}

impl WebhookClient {
    /// 创建新的 Webhook 客户端
    pub fn new(config: &WebhookConfig) -> Result<Self, WebhookError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookSender for WebhookClient {
    async fn send(&self, url: &str, payload: &WebhookPayload) -> Result<(), WebhookError> {
        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(WebhookError::HttpStatus(status.as_u16()))
        }
    }
}
