//! Realtime (Phoenix channel) wire messages.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::types::Row;

pub const EVENT_JOIN: &str = "phx_join";
pub const EVENT_LEAVE: &str = "phx_leave";
pub const EVENT_REPLY: &str = "phx_reply";
pub const EVENT_ERROR: &str = "phx_error";
pub const EVENT_CLOSE: &str = "phx_close";
pub const EVENT_HEARTBEAT: &str = "heartbeat";
pub const EVENT_POSTGRES_CHANGES: &str = "postgres_changes";
pub const EVENT_SYSTEM: &str = "system";

pub const HEARTBEAT_TOPIC: &str = "phoenix";

/// Channel topic for row changes on a public table.
pub fn channel_topic(table: &str) -> String {
    format!("realtime:public:{table}")
}

/// One Phoenix frame in the JSON object serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub msg_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}

impl PhoenixMessage {
    /// Join a table's channel, asking for INSERT events only.
    pub fn join(table: &str, access_token: &str, msg_ref: &str) -> Self {
        Self {
            topic: channel_topic(table),
            event: EVENT_JOIN.to_string(),
            payload: json!({
                "config": {
                    "broadcast": { "ack": false, "self": false },
                    "presence": { "key": "" },
                    "postgres_changes": [
                        { "event": "INSERT", "schema": "public", "table": table }
                    ],
                    "private": false
                },
                "access_token": access_token
            }),
            msg_ref: Some(msg_ref.to_string()),
            join_ref: Some(msg_ref.to_string()),
        }
    }

    pub fn leave(table: &str, msg_ref: &str) -> Self {
        Self {
            topic: channel_topic(table),
            event: EVENT_LEAVE.to_string(),
            payload: json!({}),
            msg_ref: Some(msg_ref.to_string()),
            join_ref: None,
        }
    }

    pub fn heartbeat(msg_ref: &str) -> Self {
        Self {
            topic: HEARTBEAT_TOPIC.to_string(),
            event: EVENT_HEARTBEAT.to_string(),
            payload: json!({}),
            msg_ref: Some(msg_ref.to_string()),
            join_ref: None,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// `payload.status` of a reply or system message.
    pub fn status(&self) -> Option<&str> {
        self.payload.get("status").and_then(Value::as_str)
    }

    /// Human-readable reason carried by an error reply or system message.
    pub fn reason(&self) -> Option<String> {
        let payload = &self.payload;
        payload
            .pointer("/response/reason")
            .or_else(|| payload.get("message"))
            .or_else(|| payload.get("reason"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// The inserted row of a `postgres_changes` INSERT message.
    pub fn inserted_record(&self) -> Option<Row> {
        if self.event != EVENT_POSTGRES_CHANGES {
            return None;
        }
        let data = self.payload.get("data")?;
        if data.get("type").and_then(Value::as_str) != Some("INSERT") {
            return None;
        }
        data.get("record").and_then(Value::as_object).cloned()
    }
}
