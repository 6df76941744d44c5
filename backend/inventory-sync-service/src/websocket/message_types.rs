//! Wire envelope for the duplex connection.
//!
//! Every frame, inbound and outbound, is `{type, data, timestamp}` with an
//! epoch-millisecond timestamp. Recognized inbound types are `subscribe`,
//! `unsubscribe`, `ping` and `pong`; registered domain types (e.g.
//! `inventory_update`) are dispatched to their handler; anything else is
//! rebroadcast verbatim on a channel named after the type.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::models::{Alert, InventoryRecord, InventoryUpdate};

pub const TYPE_SUBSCRIBE: &str = "subscribe";
pub const TYPE_UNSUBSCRIBE: &str = "unsubscribe";
pub const TYPE_PING: &str = "ping";
pub const TYPE_PONG: &str = "pong";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default = "now_ms")]
    pub timestamp: i64,
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

impl Envelope {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            timestamp: now_ms(),
        }
    }

    /// Registration acknowledgment sent right after a connection is accepted.
    pub fn connection(client_id: Uuid, status: &str) -> Self {
        Self::new("connection", json!({ "client_id": client_id, "status": status }))
    }

    pub fn subscribed(channel: &str) -> Self {
        Self::new("subscribed", json!({ "channel": channel }))
    }

    pub fn unsubscribed(channel: &str) -> Self {
        Self::new("unsubscribed", json!({ "channel": channel }))
    }

    pub fn pong() -> Self {
        Self::new(TYPE_PONG, json!({ "timestamp": now_ms() }))
    }

    pub fn inventory_update(item: &InventoryRecord, update: &InventoryUpdate) -> Self {
        Self::new(
            "inventory_update",
            json!({ "item": item, "update": update }),
        )
    }

    pub fn inventory_alert(alert: &Alert) -> Self {
        Self::new("inventory_alert", json!({ "alert": alert }))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new("error", json!({ "message": message.into() }))
    }

    /// The channel a subscribe/unsubscribe request names, if any.
    pub fn channel(&self) -> Option<&str> {
        self.data.get("channel").and_then(Value::as_str)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
