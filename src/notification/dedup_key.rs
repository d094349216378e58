//! Dedup key generator for alerts
//!
//! At most one unacknowledged alert exists per key. The key is built from
//! the alert subject and type:
//! - device alerts: `device|<rackId>|<TYPE>`
//! - slot alerts:   `slot|<rackId>|<slotId>|<ingredient>|<userId>|<TYPE>`
//!
//! Ingredient names are compared trimmed and case-insensitively. Each
//! component is escaped so that a `|` inside an identifier cannot make two
//! different subjects collide.

use crate::model::{AlertSubject, AlertType};

/// Deterministic dedup key for an alert subject and type.
pub fn alert_key(subject: &AlertSubject, alert_type: AlertType) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(6);
    match subject {
        AlertSubject::Device { device_id } => {
            parts.push("device".to_string());
            parts.push(escape(device_id));
        }
        AlertSubject::Slot {
            device_id,
            slot_id,
            ingredient,
            user_id,
        } => {
            parts.push("slot".to_string());
            parts.push(escape(device_id));
            parts.push(escape(slot_id));
            parts.push(escape(&normalize_ingredient(ingredient)));
            parts.push(escape(user_id));
        }
    }
    parts.push(alert_type.as_str().to_string());
    parts.join("|")
}

/// Trimmed, lowercased ingredient name.
pub fn normalize_ingredient(ingredient: &str) -> String {
    ingredient.trim().to_lowercase()
}

fn escape(component: &str) -> String {
    component.replace('\\', "\\\\").replace('|', "\\|")
}
