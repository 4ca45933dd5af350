//! Domain model structs persisted in the message log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use parley_shared::constants::TIMESTAMP_FORMAT;
use parley_shared::HistoryEntry;

// ---------------------------------------------------------------------------
// MessageRecord
// ---------------------------------------------------------------------------

/// A single relayed message. Records are only ever appended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageRecord {
    /// Row identity assigned by SQLite (monotonically increasing).
    pub id: i64,
    /// Display name of the authenticated sender.
    pub sender: String,
    /// Display name the message was addressed to.
    pub receiver: String,
    /// Message body.
    pub text: String,
    /// When the relay persisted the message (second precision).
    pub timestamp: DateTime<Utc>,
}

impl MessageRecord {
    /// The timestamp in wire format, e.g. `2024-05-01 12:30:00`.
    pub fn timestamp_string(&self) -> String {
        format_timestamp(&self.timestamp)
    }
}

impl From<MessageRecord> for HistoryEntry {
    fn from(record: MessageRecord) -> Self {
        let timestamp = record.timestamp_string();
        Self {
            sender: record.sender,
            receiver: record.receiver,
            text: record.text,
            timestamp,
        }
    }
}

/// Format a timestamp the way it is stored and sent on the wire.
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}
