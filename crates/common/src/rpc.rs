//! Alert RPC wire format.
//!
//! One JSON envelope per line over a long-lived TCP stream. The agent sends
//! `SEND_ALERT`, the hub answers `ACK` or `ERR`.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::alert::AlertRecord;

pub const SEND_ALERT: &str = "SEND_ALERT";
pub const ACK: &str = "ACK";
pub const ERR: &str = "ERR";

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Envelope {
    pub msg_type: String, // SEND_ALERT, ACK, ERR
    pub msg_id: String,
    pub ts: u64,
    pub payload: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
pub enum RpcCodecError {
    #[error("malformed envelope: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unexpected message type {0}")]
    UnexpectedType(String),
}

impl Envelope {
    fn new(msg_type: &str, payload: serde_json::Value) -> Self {
        Self {
            msg_type: msg_type.to_string(),
            msg_id: Uuid::new_v4().to_string(),
            ts: now_ts(),
            payload,
        }
    }

    pub fn send_alert(record: &AlertRecord) -> Result<Self, RpcCodecError> {
        Ok(Self::new(SEND_ALERT, serde_json::to_value(record)?))
    }

    pub fn ack(reply_to: &str) -> Self {
        Self::new(ACK, serde_json::json!({ "reply_to": reply_to }))
    }

    pub fn error(reply_to: Option<&str>, code: &str, message: &str) -> Self {
        Self::new(
            ERR,
            serde_json::json!({
                "reply_to": reply_to,
                "code": code,
                "message": message,
            }),
        )
    }

    pub fn from_line(line: &str) -> Result<Self, RpcCodecError> {
        Ok(serde_json::from_str(line.trim())?)
    }

    /// Serialized envelope terminated by `\n`.
    pub fn to_line(&self) -> Result<String, RpcCodecError> {
        Ok(serde_json::to_string(self)? + "\n")
    }

    pub fn into_alert(self) -> Result<AlertRecord, RpcCodecError> {
        if self.msg_type != SEND_ALERT {
            return Err(RpcCodecError::UnexpectedType(self.msg_type));
        }
        Ok(serde_json::from_value(self.payload)?)
    }

    /// Id of the request an `ACK` or `ERR` answers.
    pub fn reply_to(&self) -> Option<&str> {
        self.payload.get("reply_to").and_then(|v| v.as_str())
    }

    /// Error message carried by an `ERR` envelope.
    pub fn error_message(&self) -> Option<String> {
        if self.msg_type != ERR {
            return None;
        }
        let code = self.payload.get("code").and_then(|v| v.as_str());
        let message = self.payload.get("message").and_then(|v| v.as_str());
        Some(match (code, message) {
            (Some(code), Some(message)) => format!("{code}: {message}"),
            (None, Some(message)) => message.to_string(),
            (Some(code), None) => code.to_string(),
            (None, None) => "unspecified error".to_string(),
        })
    }
}

pub fn now_ts() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
