//! Live state cache - last heartbeat and last reading per device
//!
//! Owned by the service and shared through `Arc`. Writes are independent
//! per-key timestamp updates, so a concurrent map is all the locking needed.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// Most recent reading seen from a device, any slot.
#[derive(Debug, Clone, PartialEq)]
pub struct LastReading {
    pub slot_id: String,
    pub ingredient: Option<String>,
    pub weight: Option<f64>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LiveEntry {
    pub last_heartbeat: DateTime<Utc>,
    pub last_reading: Option<LastReading>,
}

#[derive(Debug, Default)]
pub struct LiveStateCache {
    entries: DashMap<String, LiveEntry>,
}

impl LiveStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a heartbeat. The stored time never moves backwards.
    pub fn touch(&self, device_id: &str, at: DateTime<Utc>) {
        self.entries
            .entry(device_id.to_string())
            .and_modify(|entry| {
                if at > entry.last_heartbeat {
                    entry.last_heartbeat = at;
                }
            })
            .or_insert(LiveEntry {
                last_heartbeat: at,
                last_reading: None,
            });
    }

    /// Record a heartbeat together with the reading that implied it.
    pub fn record_reading(&self, device_id: &str, at: DateTime<Utc>, reading: LastReading) {
        self.touch(device_id, at);
        if let Some(mut entry) = self.entries.get_mut(device_id) {
            entry.last_reading = Some(reading);
        }
    }

    pub fn get(&self, device_id: &str) -> Option<LiveEntry> {
        self.entries.get(device_id).map(|entry| entry.clone())
    }

    pub fn last_heartbeat(&self, device_id: &str) -> Option<DateTime<Utc>> {
        self.entries.get(device_id).map(|entry| entry.last_heartbeat)
    }

    /// Copy of `(device_id, last_heartbeat)` for every tracked device.
    ///
    /// Taken up front so a sweep never holds map shards across awaits.
    pub fn heartbeats(&self) -> Vec<(String, DateTime<Utc>)> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().last_heartbeat))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
