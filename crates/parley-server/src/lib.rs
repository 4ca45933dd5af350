//! # parley-server
//!
//! Real-time message relay. Clients log in with a display name, address
//! messages to other names, and the relay persists every message before
//! delivering it to whoever is online.
//!
//! - [`registry`]: display name to live connection, last login wins
//! - [`dispatch`]: single ordered worker that persists, then delivers
//! - [`handler`]: per-connection login/send state machine
//! - [`listener`]: accept loop and shutdown

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod listener;
pub mod registry;

pub use config::ServerConfig;
pub use connection::{Connection, ConnectionId};
pub use dispatch::{spawn_dispatcher, DispatchHandle, MessageLog};
pub use error::RelayError;
pub use handler::{serve_connection, ConnectionHandler, RelayContext, SessionState};
pub use listener::Relay;
pub use registry::Registry;
