//! Ordered persist-then-deliver pipeline.
//!
//! Handlers submit work through a cloneable [`DispatchHandle`]; a single
//! worker drains the queue in global FIFO order. For every message it first
//! appends a record to the [`MessageLog`], then delivers a `Deliver` envelope
//! to the receiver and echoes it to the sender. Delivery is best-effort: an
//! offline peer or a dead socket is logged and skipped.
//!
//! The worker is the only code that touches the log, so writes are
//! serialized by construction. Log calls are synchronous SQLite work, so the
//! worker runs on tokio's blocking pool rather than on a runtime thread.
//! Ordering is global rather than per conversation.

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use parley_shared::{Envelope, HistoryEntry};
use parley_store::{format_timestamp, Database, MessageRecord, StoreError};

use crate::connection::Connection;
use crate::error::RelayError;
use crate::registry::Registry;

// ---------------------------------------------------------------------------
// Storage seam
// ---------------------------------------------------------------------------

/// Append-only message storage used by the dispatch worker.
///
/// Implementations may block; they are only ever called from the worker's
/// dedicated thread.
pub trait MessageLog: Send + 'static {
    fn append(
        &mut self,
        sender: &str,
        receiver: &str,
        text: &str,
    ) -> Result<MessageRecord, StoreError>;

    fn conversation(
        &mut self,
        a: &str,
        b: &str,
        limit: u32,
    ) -> Result<Vec<MessageRecord>, StoreError>;
}

impl MessageLog for Database {
    fn append(
        &mut self,
        sender: &str,
        receiver: &str,
        text: &str,
    ) -> Result<MessageRecord, StoreError> {
        Database::append(self, sender, receiver, text)
    }

    fn conversation(
        &mut self,
        a: &str,
        b: &str,
        limit: u32,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        Database::conversation(self, a, b, limit)
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Units of work processed by the dispatch worker.
#[derive(Debug)]
pub enum DispatchCommand {
    /// Persist a message, then deliver it to receiver and sender.
    Relay {
        sender: String,
        receiver: String,
        text: String,
    },
    /// Read the stored conversation between `user` and `peer` and answer on
    /// `reply_to`.
    History {
        user: String,
        peer: String,
        limit: u32,
        reply_to: Connection,
    },
}

/// Submission side of the dispatch queue.
///
/// The queue is unbounded: submitting never blocks a connection handler,
/// at the cost of unbounded growth if the worker falls behind.
#[derive(Debug, Clone)]
pub struct DispatchHandle {
    tx: mpsc::UnboundedSender<DispatchCommand>,
}

impl DispatchHandle {
    pub fn submit(&self, sender: &str, receiver: &str, text: &str) -> Result<(), RelayError> {
        self.enqueue(DispatchCommand::Relay {
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            text: text.to_string(),
        })
    }

    pub fn request_history(
        &self,
        user: &str,
        peer: &str,
        limit: u32,
        reply_to: Connection,
    ) -> Result<(), RelayError> {
        self.enqueue(DispatchCommand::History {
            user: user.to_string(),
            peer: peer.to_string(),
            limit,
            reply_to,
        })
    }

    fn enqueue(&self, command: DispatchCommand) -> Result<(), RelayError> {
        self.tx
            .send(command)
            .map_err(|_| RelayError::DispatchClosed)
    }
}

/// Spawn the dispatch worker on tokio's blocking pool.
///
/// `max_frame_size` bounds the replies the worker builds, so a history answer
/// never exceeds what the connection writer can send. The worker stops once
/// every [`DispatchHandle`] has been dropped and the queue is empty; its join
/// handle then yields the log back.
pub fn spawn_dispatcher<L: MessageLog>(
    log: L,
    registry: Registry,
    max_frame_size: usize,
) -> (DispatchHandle, JoinHandle<L>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let worker = Dispatcher {
        log,
        registry,
        max_frame_size,
    };
    let task = tokio::task::spawn_blocking(move || worker.run(rx));
    (DispatchHandle { tx }, task)
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

struct Dispatcher<L> {
    log: L,
    registry: Registry,
    max_frame_size: usize,
}

impl<L: MessageLog> Dispatcher<L> {
    fn run(mut self, mut rx: mpsc::UnboundedReceiver<DispatchCommand>) -> L {
        debug!("Dispatch worker started");
        let mut relayed: u64 = 0;

        while let Some(command) = rx.blocking_recv() {
            match command {
                DispatchCommand::Relay {
                    sender,
                    receiver,
                    text,
                } => {
                    self.relay(&sender, &receiver, &text);
                    relayed += 1;
                }
                DispatchCommand::History {
                    user,
                    peer,
                    limit,
                    reply_to,
                } => self.history(&user, &peer, limit, &reply_to),
            }
        }

        info!(relayed, "Dispatch queue drained, worker stopping");
        self.log
    }

    fn relay(&mut self, sender: &str, receiver: &str, text: &str) {
        // Persist before anything becomes visible to a peer.
        let timestamp = match self.log.append(sender, receiver, text) {
            Ok(record) => {
                debug!(id = record.id, sender, receiver, "Message persisted");
                record.timestamp_string()
            }
            Err(e) => {
                error!(
                    sender,
                    receiver,
                    error = %e,
                    "Failed to persist message, delivering anyway"
                );
                format_timestamp(&Utc::now())
            }
        };

        let deliver = Envelope::Deliver {
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            text: text.to_string(),
            timestamp,
        };

        deliver_to(&self.registry, receiver, deliver.clone());
        if sender != receiver {
            deliver_to(&self.registry, sender, deliver);
        }
    }

    fn history(&mut self, user: &str, peer: &str, limit: u32, reply_to: &Connection) {
        let reply = match self.log.conversation(user, peer, limit) {
            Ok(records) => self.history_reply(user, peer, records),
            Err(e) => {
                error!(user, peer, error = %e, "History query failed");
                Envelope::error("history is unavailable")
            }
        };

        if let Err(e) = reply_to.send(reply) {
            debug!(user, error = %e, "Requester left before history was sent");
        }
    }

    /// Pack `records` into a batch that fits one frame, newest entries first.
    fn history_reply(&self, user: &str, peer: &str, records: Vec<MessageRecord>) -> Envelope {
        let found = records.len();
        let entries = records.into_iter().map(HistoryEntry::from).collect();

        match Envelope::history_batch_within(peer.to_string(), entries, self.max_frame_size) {
            Ok((_, dropped)) if found > 0 && dropped == found => {
                warn!(user, peer, found, "No history entry fits in one frame");
                Envelope::error("history is too large to send")
            }
            Ok((batch, dropped)) => {
                if dropped > 0 {
                    debug!(user, peer, found, dropped, "Trimmed history to frame limit");
                }
                debug!(user, peer, count = found - dropped, "Serving history");
                batch
            }
            Err(e) => {
                error!(user, peer, error = %e, "Could not encode history");
                Envelope::error("history is unavailable")
            }
        }
    }
}

fn deliver_to(registry: &Registry, name: &str, envelope: Envelope) {
    let Some(conn) = registry.blocking_lookup(name) else {
        debug!(user = %name, "Not online, skipping delivery");
        return;
    };

    if let Err(e) = conn.send(envelope) {
        warn!(
            user = %name,
            conn_id = %conn.id(),
            error = %e,
            "Delivery failed"
        );
    }
}
