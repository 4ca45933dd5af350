//! v001 -- Initial schema creation.
//!
//! Creates the append-only `messages` table.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    sender    TEXT NOT NULL,                  -- display name
    receiver  TEXT NOT NULL,                  -- display name
    text      TEXT NOT NULL,
    timestamp TEXT NOT NULL                   -- 'YYYY-MM-DD HH:MM:SS' UTC
);

CREATE INDEX IF NOT EXISTS idx_messages_pair
    ON messages(sender, receiver, id);

CREATE INDEX IF NOT EXISTS idx_messages_receiver
    ON messages(receiver, id);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
