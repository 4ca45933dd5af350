//! Accept loop and relay lifecycle.
//!
//! [`Relay::bind`] opens the listening socket and starts the dispatch worker.
//! [`Relay::run_until`] accepts connections, one task each, until the
//! shutdown future resolves. It then stops accepting, lets every open
//! connection finish on its own, and waits for the dispatch queue to drain.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::dispatch::{spawn_dispatcher, MessageLog};
use crate::error::RelayError;
use crate::handler::{serve_connection, RelayContext};
use crate::registry::Registry;

/// Pause after a failed `accept` (e.g. file descriptor exhaustion).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct Relay<L: MessageLog> {
    listener: TcpListener,
    ctx: RelayContext,
    dispatcher: JoinHandle<L>,
}

impl<L: MessageLog> Relay<L> {
    /// Bind `config.listen_addr` and start the dispatch worker over `log`.
    pub async fn bind(config: ServerConfig, log: L) -> Result<Self, RelayError> {
        let listener = TcpListener::bind(config.listen_addr).await?;
        info!(addr = %listener.local_addr()?, "Relay listening");

        let registry = Registry::new();
        let (dispatch, dispatcher) =
            spawn_dispatcher(log, registry.clone(), config.max_frame_size);

        Ok(Self {
            listener,
            ctx: RelayContext {
                registry,
                dispatch,
                config: Arc::new(config),
            },
            dispatcher,
        })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr, RelayError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> Registry {
        self.ctx.registry.clone()
    }

    /// Serve until `shutdown` resolves, then wind down.
    ///
    /// Returns the message log once the dispatch worker has drained.
    pub async fn run_until<F>(self, shutdown: F) -> Result<L, RelayError>
    where
        F: Future<Output = ()>,
    {
        let Relay {
            listener,
            ctx,
            dispatcher,
        } = self;
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(peer = %peer, error = %e, "Could not set TCP_NODELAY");
                        }
                        connections.spawn(serve_connection(stream, peer, ctx.clone()));
                        info!(peer = %peer, active = connections.len(), "New connection");
                    }
                    Err(e) => {
                        warn!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },

                Some(finished) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = finished {
                        warn!(error = %e, "Connection task panicked");
                    }
                }

                _ = &mut shutdown => {
                    info!("Shutdown requested, no longer accepting connections");
                    break;
                }
            }
        }

        drop(listener);

        if !connections.is_empty() {
            info!(
                open = connections.len(),
                "Waiting for open connections to close"
            );
        }
        while let Some(finished) = connections.join_next().await {
            if let Err(e) = finished {
                warn!(error = %e, "Connection task panicked");
            }
        }

        // The worker exits once the last dispatch handle is gone.
        drop(ctx);
        let log = dispatcher
            .await
            .map_err(|e| RelayError::Internal(format!("dispatch worker failed: {e}")))?;

        info!("Relay stopped");
        Ok(log)
    }
}
