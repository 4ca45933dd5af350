use tokio::sync::oneshot;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use parley_server::{Relay, ServerConfig};
use parley_shared::constants::APP_NAME;
use parley_store::Database;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,parley_server=debug")),
        )
        .init();

    info!("Starting {} relay v{}", APP_NAME, env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the message log and bind the listener
    // -----------------------------------------------------------------------
    let database = Database::open_at(&config.database_path)?;
    let relay = Relay::bind(config, database).await?;

    // -----------------------------------------------------------------------
    // 4. Serve until Ctrl+C
    // -----------------------------------------------------------------------
    // The first Ctrl+C stops accepting and waits for open connections to
    // finish; a second one exits immediately.
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let run = relay.run_until(async {
        let _ = stop_rx.await;
    });
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => {
            result?;
            return Ok(());
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            let _ = stop_tx.send(());
        }
    }

    tokio::select! {
        result = &mut run => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Received second Ctrl+C, exiting without waiting for connections");
        }
    }

    Ok(())
}
