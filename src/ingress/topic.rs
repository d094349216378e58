use crate::error::IngressError;

/// Message kind carried by the last topic segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Heartbeat,
    Status,
    Weight,
    Data,
    Response,
    Default,
}

impl MessageKind {
    /// Unknown kinds are treated as `default`.
    pub fn from_segment(segment: &str) -> Self {
        match segment.trim().to_ascii_lowercase().as_str() {
            "heartbeat" => MessageKind::Heartbeat,
            "status" => MessageKind::Status,
            "weight" => MessageKind::Weight,
            "data" => MessageKind::Data,
            "response" => MessageKind::Response,
            _ => MessageKind::Default,
        }
    }

    /// Heartbeat-only path: refreshes liveness, never touches slot state.
    pub fn is_liveness(&self) -> bool {
        matches!(self, MessageKind::Heartbeat | MessageKind::Status)
    }
}

/// Parsed MQTT topic containing namespace, device and message kind
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTopic {
    pub namespace: String,
    pub device_id: String,
    pub kind: MessageKind,
}

/// Parse an MQTT topic in the format `{namespace}/{device_id}[/{kind}]`
///
/// # Examples
/// ```
/// use intellirack::ingress::{parse_topic, MessageKind};
///
/// let parsed = parse_topic("intellirack/rack-1/weight").unwrap();
/// assert_eq!(parsed.device_id, "rack-1");
/// assert_eq!(parsed.kind, MessageKind::Weight);
/// ```
pub fn parse_topic(topic: &str) -> Result<ParsedTopic, IngressError> {
    let parts: Vec<&str> = topic.split('/').collect();

    if parts.len() != 2 && parts.len() != 3 {
        return Err(IngressError::InvalidTopic(format!(
            "Invalid topic format '{}': expected '{{namespace}}/{{device_id}}[/{{kind}}]'",
            topic
        )));
    }

    let namespace = parts[0].trim();
    let device_id = parts[1].trim();

    if namespace.is_empty() {
        return Err(IngressError::InvalidTopic(
            "Namespace cannot be empty in topic".to_string(),
        ));
    }

    if device_id.is_empty() {
        return Err(IngressError::InvalidTopic(
            "Device ID cannot be empty in topic".to_string(),
        ));
    }

    let kind = parts
        .get(2)
        .map(|segment| MessageKind::from_segment(segment))
        .unwrap_or(MessageKind::Default);

    Ok(ParsedTopic {
        namespace: namespace.to_string(),
        device_id: device_id.to_string(),
        kind,
    })
}
