//! Connection registry.
//!
//! The single source of truth for "is this user online": a map from display
//! name to the [`Connection`] that most recently logged in under that name.
//! Every operation takes the same lock, so register/unregister/lookup are
//! linearizable with respect to each other.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::connection::Connection;

#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: Arc<RwLock<HashMap<String, Connection>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name` to `conn`, replacing any existing entry.
    ///
    /// The replaced connection is returned but not closed; it simply stops
    /// being reachable by name.
    pub async fn register(&self, name: &str, conn: Connection) -> Option<Connection> {
        let mut entries = self.entries.write().await;
        debug!(user = %name, conn_id = %conn.id(), "Registering connection");
        entries.insert(name.to_string(), conn)
    }

    /// Remove `name` only if it still points at `conn`.
    ///
    /// A handler whose registration was taken over by a newer login must not
    /// evict the newer entry. Returns whether an entry was removed.
    pub async fn unregister(&self, name: &str, conn: &Connection) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get(name) {
            Some(current) if current == conn => {
                entries.remove(name);
                debug!(user = %name, conn_id = %conn.id(), "Unregistered connection");
                true
            }
            _ => false,
        }
    }

    pub async fn lookup(&self, name: &str) -> Option<Connection> {
        self.entries.read().await.get(name).cloned()
    }

    /// [`Registry::lookup`] for code running on a blocking thread, such as
    /// the dispatch worker. Panics if called from an async context.
    pub fn blocking_lookup(&self, name: &str) -> Option<Connection> {
        self.entries.blocking_read().get(name).cloned()
    }

    pub async fn is_online(&self, name: &str) -> bool {
        self.entries.read().await.contains_key(name)
    }

    pub async fn online_count(&self) -> usize {
        self.entries.read().await.len()
    }
}
