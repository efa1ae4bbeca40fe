//! Alert data model shared by agent, hub and observers.

use std::fmt;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// `2026-Oct-19 13:00:10`
pub const ALERT_TIME_FORMAT: &str = "%Y-%b-%d %H:%M:%S";

/// Final status of one execution.
///
/// Encoded on the wire as a number: 0 = ok, 1 = failed,
/// 2 = needs manual intervention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Status {
    Ok,
    Failed,
    NeedsManualIntervention,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Ok => "ok",
            Status::Failed => "failed",
            Status::NeedsManualIntervention => "needs_manual_intervention",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Status> for u8 {
    fn from(status: Status) -> Self {
        match status {
            Status::Ok => 0,
            Status::Failed => 1,
            Status::NeedsManualIntervention => 2,
        }
    }
}

impl TryFrom<u8> for Status {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Status::Ok),
            1 => Ok(Status::Failed),
            2 => Ok(Status::NeedsManualIntervention),
            other => Err(format!("unknown alert status {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Origin {
    pub hostname: String,
    pub task_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertMsg {
    pub title: String,
    pub short: String,
    pub long: String,
    pub time: String,
}

/// One alert as sent from an agent to the hub. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: String,
    pub from: Origin,
    pub msg: AlertMsg,
    pub status: Status,
}

impl AlertRecord {
    /// Single-line hub summary. The long body is left out on purpose: the
    /// origin host keeps the detail under the same execution id.
    pub fn summary_line(&self) -> String {
        format!(
            "| ALERT | {:<13} {:<16} {}",
            self.id, self.from.hostname, self.msg.short
        )
    }
}

/// Public JSON pushed to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushFrame {
    pub id: String,
    pub from: String,
    pub task_name: String,
    pub short: String,
    pub long: String,
    pub status: Status,
    pub time: String,
}

impl From<&AlertRecord> for PushFrame {
    fn from(record: &AlertRecord) -> Self {
        Self {
            id: record.id.clone(),
            from: record.from.hostname.clone(),
            task_name: record.from.task_name.clone(),
            short: record.msg.short.clone(),
            long: record.msg.long.clone(),
            status: record.status,
            time: record.msg.time.clone(),
        }
    }
}

pub fn alert_timestamp(at: DateTime<Local>) -> String {
    at.format(ALERT_TIME_FORMAT).to_string()
}
