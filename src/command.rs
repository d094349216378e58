//! Command/response side channel
//!
//! Devices answer NFC commands (`read`, `write`, `clear`, `format`, ...).
//! Every answer is echoed on `commandResponse` and as a typed `nfcEvent`;
//! a `read` answer also updates the slot's tag UID and ingredient.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

use crate::error::{IngestError, IngestResult};
use crate::ingress::CommandExchange;
use crate::notification::{
    CommandResponsePush, NfcEventPush, NfcEventType, NotificationDispatcher, RealtimeEvent,
};
use crate::store::SlotStatusStore;

impl NfcEventType {
    /// Map a command name to its event type. `nfc_` / `nfc:` prefixes are ignored.
    pub fn from_command(command: &str) -> Self {
        let normalized = command.trim().to_ascii_lowercase();
        let name = normalized
            .strip_prefix("nfc_")
            .or_else(|| normalized.strip_prefix("nfc:"))
            .or_else(|| normalized.strip_prefix("nfc-"))
            .unwrap_or(&normalized);
        match name {
            "read" => NfcEventType::Read,
            "write" => NfcEventType::Write,
            "clear" => NfcEventType::Clear,
            "format" => NfcEventType::Format,
            "removed" | "remove" => NfcEventType::Removed,
            _ => NfcEventType::Other,
        }
    }
}

/// Content of a tag read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagRead {
    pub tag_uid: Option<String>,
    pub ingredient: Option<String>,
}

impl TagRead {
    pub fn is_empty(&self) -> bool {
        self.tag_uid.is_none() && self.ingredient.is_none()
    }
}

fn uid_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:tag)?uid\s*[:=]\s*([0-9a-f]{2}(?:[:\s-]?[0-9a-f]{2})*)").ok()
    })
    .as_ref()
}

fn ingredient_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bingredient\s*[:=]\s*([^;,|\r\n]+)").ok())
        .as_ref()
}

/// Uppercase hex without separators.
pub fn normalize_uid(uid: &str) -> String {
    uid.chars()
        .filter(|c| c.is_ascii_hexdigit())
        .collect::<String>()
        .to_ascii_uppercase()
}

/// Parse a `read` response: a JSON object (`uid`/`tagUID`, `ingredient`),
/// a string holding such an object, or `UID:<hex>` / `INGREDIENT:<name>` text.
pub fn parse_tag_read(response: &Value) -> TagRead {
    match response {
        Value::Object(map) => {
            let text_field = |keys: &[&str]| {
                keys.iter()
                    .find_map(|k| map.get(*k).and_then(Value::as_str))
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            };
            TagRead {
                tag_uid: text_field(&["uid", "UID", "tagUID", "tagUid"])
                    .map(|uid| normalize_uid(&uid))
                    .filter(|uid| !uid.is_empty()),
                ingredient: text_field(&["ingredient", "INGREDIENT", "data"]),
            }
        }
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(inner @ Value::Object(_)) => parse_tag_read(&inner),
            _ => parse_tag_text(text),
        },
        _ => TagRead::default(),
    }
}

fn parse_tag_text(text: &str) -> TagRead {
    let tag_uid = uid_regex()
        .and_then(|re| re.captures(text))
        .and_then(|caps| caps.get(1))
        .map(|m| normalize_uid(m.as_str()))
        .filter(|uid| !uid.is_empty());
    let ingredient = ingredient_regex()
        .and_then(|re| re.captures(text))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty());
    TagRead {
        tag_uid,
        ingredient,
    }
}

/// Routes command responses to slot updates and realtime events.
pub struct CommandHandler {
    slots: Arc<dyn SlotStatusStore>,
    dispatcher: Arc<NotificationDispatcher>,
}

impl CommandHandler {
    pub fn new(slots: Arc<dyn SlotStatusStore>, dispatcher: Arc<NotificationDispatcher>) -> Self {
        Self { slots, dispatcher }
    }

    /// Handle one exchange. Realtime events are emitted even when the slot
    /// update fails; the failure is returned for logging.
    pub async fn handle(
        &self,
        device_id: &str,
        slot_id: Option<&str>,
        exchange: &CommandExchange,
        at: DateTime<Utc>,
    ) -> IngestResult<NfcEventType> {
        let event_type = NfcEventType::from_command(&exchange.command);
        let response = exchange.response_text();

        let mut push = NfcEventPush {
            event_type,
            device_id: device_id.to_string(),
            tag_uid: None,
            ingredient: None,
            response: Some(response.clone()).filter(|r| !r.is_empty()),
            timestamp: at,
        };

        let mut result = Ok(event_type);
        if event_type == NfcEventType::Read {
            let tag = parse_tag_read(&exchange.response);
            match slot_id {
                Some(slot_id) if !tag.is_empty() => {
                    match self
                        .slots
                        .set_tag(device_id, slot_id, tag.tag_uid.clone(), tag.ingredient.clone())
                        .await
                    {
                        Ok(()) => info!(
                            device_id = %device_id,
                            slot_id = %slot_id,
                            tag_uid = ?tag.tag_uid,
                            "Slot tag updated from read"
                        ),
                        Err(e) => result = Err(IngestError::persistence("set_tag", e)),
                    }
                }
                Some(_) => debug!(device_id = %device_id, "Read response carried no tag data"),
                None => debug!(device_id = %device_id, "Read response without slot, tag not stored"),
            }
            push.tag_uid = tag.tag_uid;
            push.ingredient = tag.ingredient;
        }

        self.dispatcher.push(RealtimeEvent::NfcEvent(push));
        self.dispatcher
            .push(RealtimeEvent::CommandResponse(CommandResponsePush {
                device_id: device_id.to_string(),
                command: exchange.command.clone(),
                response,
                timestamp: at,
            }));

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::{NotificationQueue, RealtimeHub};
    use crate::store::InMemoryStore;
    use serde_json::json;

    #[test]
    fn test_command_mapping() {
        assert_eq!(NfcEventType::from_command("read"), NfcEventType::Read);
        assert_eq!(NfcEventType::from_command("NFC_WRITE"), NfcEventType::Write);
        assert_eq!(NfcEventType::from_command(" clear "), NfcEventType::Clear);
        assert_eq!(NfcEventType::from_command("nfc:format"), NfcEventType::Format);
        assert_eq!(NfcEventType::from_command("removed"), NfcEventType::Removed);
        assert_eq!(NfcEventType::from_command("reboot"), NfcEventType::Other);
    }

    #[test]
    fn test_parse_text_response() {
        let tag = parse_tag_read(&json!("UID: 04:a1:B2:c3; INGREDIENT: Brown Sugar"));
        assert_eq!(tag.tag_uid.as_deref(), Some("04A1B2C3"));
        assert_eq!(tag.ingredient.as_deref(), Some("Brown Sugar"));
    }

    #[test]
    fn test_parse_object_response() {
        let tag = parse_tag_read(&json!({"tagUID": "04 A1 B2", "ingredient": "Rice"}));
        assert_eq!(tag.tag_uid.as_deref(), Some("04A1B2"));
        assert_eq!(tag.ingredient.as_deref(), Some("Rice"));
    }

    #[test]
    fn test_parse_json_string_response() {
        let tag = parse_tag_read(&json!(r#"{"uid":"deadbeef"}"#));
        assert_eq!(tag.tag_uid.as_deref(), Some("DEADBEEF"));
        assert!(tag.ingredient.is_none());
    }

    #[test]
    fn test_parse_unrelated_response() {
        assert!(parse_tag_read(&json!("OK")).is_empty());
        assert!(parse_tag_read(&json!(42)).is_empty());
    }

    fn handler(store: Arc<InMemoryStore>) -> (CommandHandler, Arc<RealtimeHub>) {
        let hub = Arc::new(RealtimeHub::default());
        let (queue, _receiver) = NotificationQueue::channel(8);
        let dispatcher = Arc::new(NotificationDispatcher::new(hub.clone(), Arc::new(queue)));
        (CommandHandler::new(store, dispatcher), hub)
    }

    #[tokio::test]
    async fn test_read_updates_slot_and_emits_events() {
        let store = Arc::new(InMemoryStore::new());
        let (handler, hub) = handler(store.clone());
        let mut realtime = hub.subscribe();

        let exchange = CommandExchange {
            command: "read".to_string(),
            response: json!("UID:04A1B2C3 INGREDIENT:Flour"),
        };
        let result = handler.handle("rack-1", Some("S1"), &exchange, Utc::now()).await;
        assert_eq!(result.unwrap(), NfcEventType::Read);

        let slot = store.get("rack-1", "S1").await.unwrap().unwrap();
        assert_eq!(slot.tag_uid.as_deref(), Some("04A1B2C3"));
        assert_eq!(slot.ingredient.as_deref(), Some("Flour"));

        match realtime.recv().await.unwrap() {
            RealtimeEvent::NfcEvent(push) => {
                assert_eq!(push.event_type, NfcEventType::Read);
                assert_eq!(push.tag_uid.as_deref(), Some("04A1B2C3"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(realtime.recv().await.unwrap().channel(), "commandResponse");
    }

    #[tokio::test]
    async fn test_other_command_leaves_slot_alone() {
        let store = Arc::new(InMemoryStore::new());
        let (handler, hub) = handler(store.clone());
        let mut realtime = hub.subscribe();

        let exchange = CommandExchange {
            command: "clear".to_string(),
            response: json!("OK"),
        };
        let result = handler.handle("rack-1", Some("S1"), &exchange, Utc::now()).await;
        assert_eq!(result.unwrap(), NfcEventType::Clear);
        assert!(store.get("rack-1", "S1").await.unwrap().is_none());

        match realtime.recv().await.unwrap() {
            RealtimeEvent::NfcEvent(push) => {
                assert_eq!(push.event_type, NfcEventType::Clear);
                assert_eq!(push.response.as_deref(), Some("OK"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
