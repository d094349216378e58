//! Ingress - MQTT transport and frame decoding
//!
//! Topic shape is `<namespace>/<deviceId>/<kind>`. Frames are decoded into
//! a [`TelemetryMessage`] here; malformed frames never reach the pipeline.

pub mod dispatch;
pub mod message;
pub mod mqtt;
pub mod topic;

pub use dispatch::DeviceLanes;
pub use message::{
    CommandExchange, CommandResponse, Heartbeat, SlotReading, TelemetryMessage,
};
pub use mqtt::run_mqtt_ingress;
pub use topic::{parse_topic, MessageKind, ParsedTopic};

use crate::error::IngressError;

/// Parse the topic, check it belongs to `namespace`, and decode the payload.
pub fn route_frame(
    namespace: &str,
    topic: &str,
    payload: &[u8],
) -> Result<TelemetryMessage, IngressError> {
    let parsed = parse_topic(topic)?;
    if parsed.namespace != namespace {
        return Err(IngressError::InvalidTopic(format!(
            "topic namespace '{}' is not '{}'",
            parsed.namespace, namespace
        )));
    }
    TelemetryMessage::decode(&parsed, payload)
}
