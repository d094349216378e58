//! 配置 - 从 JSON 文件加载，缺省值覆盖全部字段
//!
//! 查找顺序：
//! 1. `--config` 指定的路径
//! 2. `~/.config/intellirack/config.json`（存在时）
//! 3. 内置默认值
//!
//! 环境变量 `MQTT_URL` 覆盖 broker 地址。

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::classifier::Thresholds;

/// 全局配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub mqtt: MqttConfig,
    pub heartbeat: HeartbeatConfig,
    pub thresholds: Thresholds,
    pub webhook: WebhookConfig,
    pub queue: QueueConfig,
    /// 实时广播缓冲区大小，满了之后慢订阅者丢弃旧事件
    pub realtime_capacity: usize,
    /// 审计日志 JSONL 文件；未设置时审计只保存在内存
    pub audit_path: Option<PathBuf>,
    /// 设备/用户注册表 JSON 文件，用于填充内存存储
    pub registry_path: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mqtt: MqttConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            thresholds: Thresholds::default(),
            webhook: WebhookConfig::default(),
            queue: QueueConfig::default(),
            realtime_capacity: 1024,
            audit_path: None,
            registry_path: None,
        }
    }
}

/// MQTT 接入配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// broker 地址，如 mqtt://localhost:1883
    pub url: String,
    pub client_id: String,
    /// topic 前缀：`<namespace>/<deviceId>/<kind>`
    pub namespace: String,
    pub keep_alive_secs: u64,
    /// rumqttc 请求通道容量
    pub channel_capacity: usize,
    /// 连接出错后的重连间隔（秒）
    pub reconnect_delay_secs: u64,
    /// 每台设备的待处理消息上限，满了之后事件循环等待
    pub lane_capacity: usize,
    /// 设备通道空闲多久后回收（秒）
    pub lane_idle_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            url: "mqtt://localhost:1883".to_string(),
            client_id: "intellirack-ingest".to_string(),
            namespace: "intellirack".to_string(),
            keep_alive_secs: 30,
            channel_capacity: 100,
            reconnect_delay_secs: 5,
            lane_capacity: 64,
            lane_idle_secs: 300,
        }
    }
}

impl MqttConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn lane_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.lane_idle_secs)
    }
}

/// 心跳监控配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// 超过该时长没有心跳视为离线（毫秒）
    pub offline_threshold_ms: u64,
    /// 扫描周期（毫秒）
    pub sweep_interval_ms: u64,
    /// 单个设备检查的超时（毫秒）
    pub check_timeout_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            offline_threshold_ms: 30_000,
            sweep_interval_ms: 10_000,
            check_timeout_ms: 2_000,
        }
    }
}

impl HeartbeatConfig {
    pub fn offline_threshold(&self) -> Duration {
        Duration::from_millis(self.offline_threshold_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_millis(self.check_timeout_ms)
    }
}

/// Webhook 客户端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// 单次请求超时（秒）
    pub timeout_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self { timeout_secs: 10 }
    }
}

/// 后台通知队列配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub capacity: usize,
    pub workers: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            workers: 2,
        }
    }
}

impl AppConfig {
    /// 默认配置文件路径
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("intellirack")
            .join("config.json")
    }

    /// 按查找顺序加载配置并校验
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = Self::default_path();
                if default_path.exists() {
                    Self::from_file(&default_path)?
                } else {
                    Self::default()
                }
            }
        };

        if let Ok(url) = std::env::var("MQTT_URL") {
            if !url.trim().is_empty() {
                config.mqtt.url = url;
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: AppConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.heartbeat.offline_threshold_ms == 0 || self.heartbeat.sweep_interval_ms == 0 {
            bail!("heartbeat offline_threshold_ms and sweep_interval_ms must be positive");
        }
        if self.heartbeat.check_timeout_ms == 0 {
            bail!("heartbeat check_timeout_ms must be positive");
        }
        if self.queue.workers == 0 || self.queue.capacity == 0 {
            bail!("queue needs at least one worker and a positive capacity");
        }
        if self.realtime_capacity == 0 {
            bail!("realtime_capacity must be positive");
        }
        if self.mqtt.keep_alive_secs < 5 {
            bail!("mqtt keep_alive_secs must be at least 5");
        }
        if self.mqtt.lane_capacity == 0 || self.mqtt.lane_idle_secs == 0 {
            bail!("mqtt lane_capacity and lane_idle_secs must be positive");
        }
        if self.mqtt.namespace.trim().is_empty() || self.mqtt.namespace.contains(['/', '#', '+']) {
            bail!("mqtt namespace must be a single non-empty topic segment");
        }
        self.thresholds.validate()?;
        Ok(())
    }
}
