use chrono::{DateTime, NaiveDateTime, SubsecRound, TimeZone, Utc};
use rusqlite::params;

use parley_shared::constants::TIMESTAMP_FORMAT;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{format_timestamp, MessageRecord};

const SELECT_COLUMNS: &str = "SELECT id, sender, receiver, text, timestamp FROM messages";

impl Database {
    /// Append a message stamped with the current time.
    pub fn append(&self, sender: &str, receiver: &str, text: &str) -> Result<MessageRecord> {
        self.append_at(sender, receiver, text, Utc::now())
    }

    /// Append a message with an explicit timestamp (truncated to seconds).
    pub fn append_at(
        &self,
        sender: &str,
        receiver: &str,
        text: &str,
        at: DateTime<Utc>,
    ) -> Result<MessageRecord> {
        let at = at.trunc_subsecs(0);
        let ts = format_timestamp(&at);
        self.conn().execute(
            "INSERT INTO messages (sender, receiver, text, timestamp)
             VALUES (?1, ?2, ?3, ?4)",
            params![sender, receiver, text, ts],
        )?;
        let id = self.conn().last_insert_rowid();

        tracing::debug!(id, sender, receiver, "message appended");

        Ok(MessageRecord {
            id,
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            text: text.to_string(),
            timestamp: at,
        })
    }

    /// The last `limit` messages exchanged between `a` and `b` in either
    /// direction, oldest first.
    pub fn conversation(&self, a: &str, b: &str, limit: u32) -> Result<Vec<MessageRecord>> {
        let sql = format!(
            "SELECT * FROM (
                 {SELECT_COLUMNS}
                 WHERE (sender = ?1 AND receiver = ?2) OR (sender = ?2 AND receiver = ?1)
                 ORDER BY id DESC
                 LIMIT ?3
             ) ORDER BY id ASC"
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params![a, b, limit], row_to_record)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Messages addressed to `receiver`, oldest first.
    pub fn messages_for_receiver(&self, receiver: &str, limit: u32) -> Result<Vec<MessageRecord>> {
        let sql = format!("{SELECT_COLUMNS} WHERE receiver = ?1 ORDER BY id ASC LIMIT ?2");
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params![receiver, limit], row_to_record)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    pub fn get_message_by_id(&self, id: i64) -> Result<MessageRecord> {
        self.conn()
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id],
                row_to_record,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    pub fn count_messages(&self) -> Result<u64> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

fn parse_timestamp(s: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).map(|naive| Utc.from_utc_datetime(&naive))
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRecord> {
    let ts_str: String = row.get(4)?;
    let timestamp = parse_timestamp(&ts_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(MessageRecord {
        id: row.get(0)?,
        sender: row.get(1)?,
        receiver: row.get(2)?,
        text: row.get(3)?,
        timestamp,
    })
}
