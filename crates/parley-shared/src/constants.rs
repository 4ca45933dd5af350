/// Application name
pub const APP_NAME: &str = "Parley";

/// Default TCP port the relay listens on
pub const DEFAULT_PORT: u16 = 5555;

/// Size of the big-endian length prefix in front of every frame
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default maximum frame payload in bytes (64 KiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Maximum display name length, in characters
pub const MAX_USERNAME_LEN: usize = 32;

/// Number of messages returned for a history request without an explicit limit
pub const DEFAULT_HISTORY_LIMIT: u32 = 50;

/// Upper bound for any history request
pub const MAX_HISTORY_LIMIT: u32 = 500;

/// Timestamp format used on the wire and in the message log.
///
/// Second precision, UTC, same shape as SQLite's `CURRENT_TIMESTAMP`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
