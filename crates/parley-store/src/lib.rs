//! # parley-store
//!
//! Append-only message log for the Parley relay, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection`. The relay gives that handle to a single writer;
//! other readers open their own connection to the same file.

pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
