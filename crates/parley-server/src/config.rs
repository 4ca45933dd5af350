//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the relay can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use parley_shared::constants::{
    DEFAULT_HISTORY_LIMIT, DEFAULT_MAX_FRAME_SIZE, DEFAULT_PORT, MAX_HISTORY_LIMIT,
};

/// Smallest accepted frame limit; anything lower could not carry a login.
const MIN_FRAME_SIZE: usize = 256;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP socket address to accept clients on.
    /// Env: `LISTEN_ADDR`
    /// Default: `0.0.0.0:5555`
    pub listen_addr: SocketAddr,

    /// SQLite file holding the message log.
    /// Env: `DATABASE_PATH`
    /// Default: `./parley.db`
    pub database_path: PathBuf,

    /// Largest frame payload accepted or sent, in bytes.
    /// Env: `MAX_FRAME_SIZE`
    /// Default: 64 KiB
    pub max_frame_size: usize,

    /// Messages returned for a history request that does not set a limit.
    /// Env: `HISTORY_LIMIT`
    /// Default: `50`
    pub history_limit: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: ([0, 0, 0, 0], DEFAULT_PORT).into(),
            database_path: PathBuf::from("./parley.db"),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable lookup.
    pub fn from_vars<F>(var: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = var("LISTEN_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.listen_addr = parsed,
                Err(_) => {
                    tracing::warn!(value = %addr, "Invalid LISTEN_ADDR, using default");
                }
            }
        }

        if let Some(path) = var("DATABASE_PATH") {
            if !path.is_empty() {
                config.database_path = PathBuf::from(path);
            }
        }

        if let Some(val) = var("MAX_FRAME_SIZE") {
            match val.parse::<usize>() {
                Ok(n) if n >= MIN_FRAME_SIZE => config.max_frame_size = n,
                _ => {
                    tracing::warn!(
                        value = %val,
                        min = MIN_FRAME_SIZE,
                        "Invalid MAX_FRAME_SIZE, using default"
                    );
                }
            }
        }

        if let Some(val) = var("HISTORY_LIMIT") {
            match val.parse::<u32>() {
                Ok(n) if n > 0 => config.history_limit = n.min(MAX_HISTORY_LIMIT),
                _ => {
                    tracing::warn!(value = %val, "Invalid HISTORY_LIMIT, using default");
                }
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }

    /// Clamp a client-requested history size to the configured bounds.
    pub fn history_limit_for(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.history_limit)
            .clamp(1, MAX_HISTORY_LIMIT)
    }
}
