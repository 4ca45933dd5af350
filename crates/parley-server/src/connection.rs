//! Connection handles.
//!
//! A [`Connection`] is the relay's handle to one peer: a bounded outbound
//! envelope queue drained by a dedicated writer task, plus a close signal
//! shared by every clone. A peer that stops reading fills its queue and is
//! closed instead of growing memory. The reader side stays with the connection handler; the
//! registry and the dispatch worker only ever hold clones of this handle.

use std::net::SocketAddr;

use futures::SinkExt;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use parley_shared::{CodecError, Envelope, EnvelopeCodec};

use crate::error::RelayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let full = self.0.simple().to_string();
        write!(f, "{}", &full[..8])
    }
}

/// Envelopes that may wait in one connection's outbound queue.
pub const OUTBOUND_BACKLOG: usize = 1024;

/// Receiving end of a connection's outbound queue, owned by its writer task.
pub type Outbound = mpsc::Receiver<Envelope>;

/// Cloneable handle to one connected peer.
///
/// Equality is identity: two handles are equal iff they refer to the same
/// accepted connection.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    outbound: mpsc::Sender<Envelope>,
    closed: CancellationToken,
}

impl Connection {
    pub fn new(peer: SocketAddr) -> (Self, Outbound) {
        let (tx, rx) = mpsc::channel(OUTBOUND_BACKLOG);
        let conn = Self {
            id: ConnectionId::new(),
            peer,
            outbound: tx,
            closed: CancellationToken::new(),
        };
        (conn, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Queue an envelope for this peer. Never blocks.
    ///
    /// A full queue means the peer has stopped reading: the connection is
    /// closed and the envelope dropped.
    pub fn send(&self, envelope: Envelope) -> Result<(), RelayError> {
        if self.closed.is_cancelled() {
            return Err(RelayError::ConnectionClosed(self.id));
        }
        match self.outbound.try_send(envelope) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(
                    conn_id = %self.id,
                    peer = %self.peer,
                    backlog = OUTBOUND_BACKLOG,
                    "Outbound backlog full, closing connection"
                );
                self.close();
                Err(RelayError::Backlogged(self.id))
            }
            Err(TrySendError::Closed(_)) => Err(RelayError::ConnectionClosed(self.id)),
        }
    }

    /// Mark the connection closed. Returns `true` only for the call that
    /// actually closed it.
    pub fn close(&self) -> bool {
        if self.closed.is_cancelled() {
            return false;
        }
        self.closed.cancel();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the connection has been closed by any holder.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Connection {}

/// Drain `outbound` into the socket until the connection closes.
///
/// Envelopes already queued are written before a close is honoured. An I/O
/// failure closes the connection, which in turn stops its reader loop.
pub async fn write_loop<W>(
    mut sink: FramedWrite<W, EnvelopeCodec>,
    mut outbound: Outbound,
    conn: Connection,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;

            next = outbound.recv() => {
                let Some(envelope) = next else { break };
                let kind = envelope.kind();
                match sink.send(envelope).await {
                    Ok(()) => {}
                    Err(CodecError::FrameTooLarge { size, max }) => {
                        warn!(
                            conn_id = %conn.id(),
                            kind,
                            size,
                            max,
                            "Dropping outbound envelope larger than frame limit"
                        );
                    }
                    Err(e) => {
                        warn!(
                            conn_id = %conn.id(),
                            peer = %conn.peer(),
                            error = %e,
                            "Write failed, closing connection"
                        );
                        conn.close();
                        break;
                    }
                }
            }

            _ = conn.closed() => break,
        }
    }

    if let Err(e) = sink.close().await {
        debug!(conn_id = %conn.id(), error = %e, "Error shutting down write half");
    }
}
