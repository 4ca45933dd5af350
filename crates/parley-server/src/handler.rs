//! Per-connection handler.
//!
//! Each accepted socket gets one reader loop ([`serve_connection`]) driving a
//! [`ConnectionHandler`] state machine:
//!
//! ```text
//! Connecting --Login--> Authenticated --EOF / read error / write error--> Closed
//! ```
//!
//! Protocol mistakes (bad frames, envelopes sent out of sequence) are answered
//! with an `Error` envelope and leave the state unchanged. Only transport
//! failures and unrecoverable framing errors close the connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

use parley_shared::types::{validate_receiver, validate_username};
use parley_shared::{CodecError, Envelope, EnvelopeCodec, FrameError};
use parley_store::format_timestamp;

use crate::config::ServerConfig;
use crate::connection::{write_loop, Connection};
use crate::dispatch::DispatchHandle;
use crate::error::RelayError;
use crate::registry::Registry;

/// How long a closing connection may take to flush queued envelopes.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything a handler needs from the relay, cloned into each connection task.
#[derive(Debug, Clone)]
pub struct RelayContext {
    pub registry: Registry,
    pub dispatch: DispatchHandle,
    pub config: Arc<ServerConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticated { username: String },
    Closed,
}

/// What the reader loop should do after a frame was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

pub struct ConnectionHandler {
    conn: Connection,
    ctx: RelayContext,
    state: SessionState,
}

impl ConnectionHandler {
    pub fn new(conn: Connection, ctx: RelayContext) -> Self {
        Self {
            conn,
            ctx,
            state: SessionState::Connecting,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn username(&self) -> Option<&str> {
        match &self.state {
            SessionState::Authenticated { username } => Some(username),
            _ => None,
        }
    }

    /// Handle one decoded frame.
    pub async fn on_frame(&mut self, frame: Result<Envelope, FrameError>) -> Flow {
        if self.state == SessionState::Closed {
            return Flow::Close;
        }

        match frame {
            Ok(envelope) => self.on_envelope(envelope).await,
            Err(e) => {
                debug!(conn_id = %self.conn.id(), error = %e, "Rejecting malformed frame");
                self.reply(Envelope::error(e.to_string()))
            }
        }
    }

    async fn on_envelope(&mut self, envelope: Envelope) -> Flow {
        if self.state == SessionState::Connecting {
            return match envelope {
                Envelope::Login { username } => self.login(&username).await,
                other => {
                    debug!(
                        conn_id = %self.conn.id(),
                        kind = other.kind(),
                        "Envelope before login"
                    );
                    self.reply(Envelope::error("login required"))
                }
            };
        }

        let username = match &self.state {
            SessionState::Authenticated { username } => username.clone(),
            _ => return Flow::Close,
        };

        match envelope {
            Envelope::Send { receiver, text } => {
                let receiver = match validate_receiver(&receiver) {
                    Ok(receiver) => receiver,
                    Err(e) => return self.reply(Envelope::error(e.to_string())),
                };
                if !self.deliverable(&username, receiver, &text) {
                    debug!(
                        user = %username,
                        receiver,
                        len = text.len(),
                        "Rejecting message that would not fit in one frame"
                    );
                    return self.reply(Envelope::error("message is too large"));
                }
                match self.ctx.dispatch.submit(&username, receiver, &text) {
                    Ok(()) => Flow::Continue,
                    Err(e) => self.fail(e),
                }
            }
            Envelope::History { peer, limit } => {
                let peer = match validate_receiver(&peer) {
                    Ok(peer) => peer,
                    Err(e) => return self.reply(Envelope::error(e.to_string())),
                };
                let limit = self.ctx.config.history_limit_for(limit);
                match self
                    .ctx
                    .dispatch
                    .request_history(&username, peer, limit, self.conn.clone())
                {
                    Ok(()) => Flow::Continue,
                    Err(e) => self.fail(e),
                }
            }
            Envelope::Login { .. } => self.reply(Envelope::error("already logged in")),
            Envelope::Error { message } => {
                debug!(user = %username, message = %message, "Client reported an error");
                Flow::Continue
            }
            other @ (Envelope::LoginAck { .. }
            | Envelope::Deliver { .. }
            | Envelope::HistoryBatch { .. }) => {
                let message = format!("unexpected {} from client", other.kind());
                self.reply(Envelope::error(message))
            }
        }
    }

    async fn login(&mut self, raw: &str) -> Flow {
        let username = match validate_username(raw) {
            Ok(name) => name.to_string(),
            Err(e) => return self.reply(Envelope::error(e.to_string())),
        };

        if let Some(previous) = self.ctx.registry.register(&username, self.conn.clone()).await {
            warn!(
                user = %username,
                old_conn = %previous.id(),
                new_conn = %self.conn.id(),
                "Login replaced an existing connection"
            );
        }

        info!(
            user = %username,
            peer = %self.conn.peer(),
            conn_id = %self.conn.id(),
            "User logged in"
        );

        let flow = self.reply(Envelope::LoginAck {
            message: format!("Welcome, {username}!"),
        });
        self.state = SessionState::Authenticated { username };
        flow
    }

    /// Whether the `Deliver` built for this message fits in one frame.
    ///
    /// `Deliver` carries the sender and a timestamp on top of what `Send`
    /// does, so a `Send` within the inbound limit can still overflow.
    fn deliverable(&self, sender: &str, receiver: &str, text: &str) -> bool {
        let deliver = Envelope::Deliver {
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            text: text.to_string(),
            timestamp: format_timestamp(&Utc::now()),
        };
        matches!(deliver.encoded_len(), Ok(len) if len <= self.ctx.config.max_frame_size)
    }

    fn reply(&self, envelope: Envelope) -> Flow {
        match self.conn.send(envelope) {
            Ok(()) => Flow::Continue,
            Err(_) => Flow::Close,
        }
    }

    fn fail(&self, error: RelayError) -> Flow {
        warn!(
            conn_id = %self.conn.id(),
            error = %error,
            "Relay unavailable, closing connection"
        );
        let _ = self.conn.send(Envelope::error("relay is shutting down"));
        Flow::Close
    }

    /// Transition to `Closed`: drop the registration (if still ours) and
    /// close the connection. Safe to call more than once.
    pub async fn close(&mut self) {
        let previous = std::mem::replace(&mut self.state, SessionState::Closed);
        if let SessionState::Authenticated { username } = previous {
            if self.ctx.registry.unregister(&username, &self.conn).await {
                info!(user = %username, conn_id = %self.conn.id(), "User went offline");
            } else {
                debug!(
                    user = %username,
                    conn_id = %self.conn.id(),
                    "Registration already taken over by a newer login"
                );
            }
        }
        self.conn.close();
    }
}

/// Run one client connection to completion.
///
/// Generic over the stream so tests can drive it with an in-memory duplex.
pub async fn serve_connection<S>(stream: S, peer: SocketAddr, ctx: RelayContext)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let codec = EnvelopeCodec::new(ctx.config.max_frame_size);
    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = FramedRead::new(read_half, codec);

    let (conn, outbound) = Connection::new(peer);
    let mut writer = tokio::spawn(write_loop(
        FramedWrite::new(write_half, codec),
        outbound,
        conn.clone(),
    ));

    debug!(peer = %peer, conn_id = %conn.id(), "Connection handler started");
    let mut handler = ConnectionHandler::new(conn.clone(), ctx);

    loop {
        tokio::select! {
            frame = reader.next() => match frame {
                Some(Ok(item)) => {
                    if handler.on_frame(item).await == Flow::Close {
                        break;
                    }
                }
                Some(Err(CodecError::FrameTooLarge { size, max })) => {
                    warn!(peer = %peer, size, max, "Oversized frame, closing connection");
                    let _ = conn.send(Envelope::error(format!(
                        "frame of {size} bytes exceeds limit of {max}"
                    )));
                    break;
                }
                Some(Err(e)) => {
                    debug!(peer = %peer, error = %e, "Read failed");
                    break;
                }
                None => {
                    debug!(peer = %peer, "Peer closed the connection");
                    break;
                }
            },
            _ = conn.closed() => break,
        }
    }

    handler.close().await;
    match tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(peer = %peer, error = %e, "Writer task failed"),
        Err(_) => {
            warn!(peer = %peer, "Peer is not reading, dropping unsent envelopes");
            writer.abort();
        }
    }
    debug!(peer = %peer, conn_id = %conn.id(), "Connection handler finished");
}
