//! Telemetry messages, decoded and validated at the ingress boundary.
//!
//! Each topic kind maps to one variant carrying only the fields it needs.
//! Anything that cannot be decoded is rejected here with an
//! [`IngressError`], before the pipeline sees it.

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;

use super::topic::{MessageKind, ParsedTopic};
use crate::error::IngressError;

/// Device timestamps before 2000-01-01T00:00:00Z are uptime counters, not
/// wall-clock time; the receive time is used instead.
const MIN_DEVICE_TIMESTAMP_MS: i64 = 946_684_800_000;

/// Heartbeat or status ping.
#[derive(Debug, Clone, PartialEq)]
pub struct Heartbeat {
    pub device_id: String,
    pub ip_address: Option<String>,
    pub firmware_version: Option<String>,
}

/// A command sent to the device and the device's answer.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandExchange {
    pub command: String,
    pub response: Value,
}

impl CommandExchange {
    /// Response rendered for the realtime channels.
    pub fn response_text(&self) -> String {
        match &self.response {
            Value::Null => String::new(),
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }
}

/// Weight/status reading for one slot.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotReading {
    pub device_id: String,
    pub slot_id: String,
    pub ingredient: Option<String>,
    pub tag_uid: Option<String>,
    pub weight: Option<f64>,
    pub status: Option<String>,
    /// Device-reported time; `None` means "use receive time"
    pub timestamp: Option<DateTime<Utc>>,
    pub ip_address: Option<String>,
    pub firmware_version: Option<String>,
    pub command: Option<CommandExchange>,
}

/// Command response published on the `response` topic.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResponse {
    pub device_id: String,
    pub slot_id: Option<String>,
    pub exchange: CommandExchange,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryMessage {
    Heartbeat(Heartbeat),
    Reading(SlotReading),
    CommandResponse(CommandResponse),
}

impl TelemetryMessage {
    pub fn device_id(&self) -> &str {
        match self {
            TelemetryMessage::Heartbeat(m) => &m.device_id,
            TelemetryMessage::Reading(m) => &m.device_id,
            TelemetryMessage::CommandResponse(m) => &m.device_id,
        }
    }

    /// Decode a JSON payload received on `topic`.
    pub fn decode(topic: &ParsedTopic, payload: &[u8]) -> Result<Self, IngressError> {
        let value: Value = serde_json::from_slice(payload)
            .map_err(|e| IngressError::MalformedPayload(format!("invalid JSON: {}", e)))?;
        if !value.is_object() {
            return Err(IngressError::MalformedPayload(
                "payload must be a JSON object".to_string(),
            ));
        }
        let raw: RawPayload = serde_json::from_value(value)
            .map_err(|e| IngressError::MalformedPayload(e.to_string()))?;

        let device_id = match non_blank(raw.device_id) {
            Some(id) if id != topic.device_id => {
                return Err(IngressError::MalformedPayload(format!(
                    "deviceId '{}' does not match topic device '{}'",
                    id, topic.device_id
                )));
            }
            _ => topic.device_id.clone(),
        };

        if topic.kind.is_liveness() {
            return Ok(TelemetryMessage::Heartbeat(Heartbeat {
                device_id,
                ip_address: non_blank(raw.ip_address),
                firmware_version: non_blank(raw.firmware_version),
            }));
        }

        let timestamp = raw.timestamp.map(parse_timestamp).transpose()?.flatten();
        let slot_id = raw.slot_id.map(Scalar::into_text).and_then(|s| non_blank(Some(s)));
        let command = non_blank(raw.command).map(|command| CommandExchange {
            command,
            response: raw.response.unwrap_or(Value::Null),
        });

        if topic.kind == MessageKind::Response {
            let exchange = command.ok_or_else(|| {
                IngressError::MalformedPayload("response message without command".to_string())
            })?;
            return Ok(TelemetryMessage::CommandResponse(CommandResponse {
                device_id,
                slot_id,
                exchange,
                timestamp,
            }));
        }

        let slot_id = slot_id
            .ok_or_else(|| IngressError::MalformedPayload("slotId is required".to_string()))?;
        let weight = raw.weight.map(Scalar::into_weight).transpose()?;

        Ok(TelemetryMessage::Reading(SlotReading {
            device_id,
            slot_id,
            ingredient: non_blank(raw.ingredient).map(|s| s.trim().to_string()),
            tag_uid: non_blank(raw.tag_uid),
            weight,
            status: non_blank(raw.status).map(|s| s.trim().to_string()),
            timestamp,
            ip_address: non_blank(raw.ip_address),
            firmware_version: non_blank(raw.firmware_version),
            command,
        }))
    }
}

/// Wire shape; every field optional, unknown fields ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPayload {
    device_id: Option<String>,
    slot_id: Option<Scalar>,
    #[serde(alias = "ingredientName")]
    ingredient: Option<String>,
    #[serde(rename = "tagUID", alias = "tagUid")]
    tag_uid: Option<String>,
    weight: Option<Scalar>,
    status: Option<String>,
    timestamp: Option<Scalar>,
    #[serde(alias = "ip")]
    ip_address: Option<String>,
    firmware_version: Option<String>,
    command: Option<String>,
    response: Option<Value>,
}

/// Number or string, as firmware sends either.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Number(f64),
    Text(String),
}

impl Scalar {
    fn into_text(self) -> String {
        match self {
            Scalar::Number(n) if n.fract() == 0.0 => format!("{}", n as i64),
            Scalar::Number(n) => n.to_string(),
            Scalar::Text(text) => text,
        }
    }

    fn into_weight(self) -> Result<f64, IngressError> {
        let weight = match self {
            Scalar::Number(n) => n,
            Scalar::Text(text) => text.trim().parse::<f64>().map_err(|_| {
                IngressError::MalformedPayload(format!("weight '{}' is not a number", text))
            })?,
        };
        if weight.is_finite() {
            Ok(weight)
        } else {
            Err(IngressError::MalformedPayload("weight is not finite".to_string()))
        }
    }
}

/// Epoch milliseconds or RFC 3339. `Ok(None)` for uptime-style values.
fn parse_timestamp(raw: Scalar) -> Result<Option<DateTime<Utc>>, IngressError> {
    let millis = match raw {
        Scalar::Number(n) => n as i64,
        Scalar::Text(text) => {
            let text = text.trim();
            if let Ok(n) = text.parse::<i64>() {
                n
            } else {
                return DateTime::parse_from_rfc3339(text)
                    .map(|dt| Some(dt.with_timezone(&Utc)))
                    .map_err(|e| {
                        IngressError::MalformedPayload(format!("invalid timestamp '{}': {}", text, e))
                    });
            }
        }
    };

    if millis < MIN_DEVICE_TIMESTAMP_MS {
        return Ok(None);
    }
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(Some)
        .ok_or_else(|| IngressError::MalformedPayload(format!("timestamp {} out of range", millis)))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}
