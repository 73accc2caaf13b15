//! gateway-link demo client.
//!
//! Connects to the gateway named by `LINK_BASE_URL`, logs every message of
//! the services listed in `LINK_WATCH_SERVICES` (comma separated) and shuts
//! down on Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use gateway_link::{Collaborators, HttpFallback, Link, LinkConfig, LinkEvent, TungsteniteConnector};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = LinkConfig::from_env()?;
    tracing::info!(base = %config.base_url, "starting gateway-link");

    // Build collaborators
    let fallback = HttpFallback::new(config.fallback_timeout)?;
    let collaborators = Collaborators::new(Arc::new(TungsteniteConnector), Arc::new(fallback));
    let link = Link::new(config, collaborators);

    // Register watchers
    let watched = std::env::var("LINK_WATCH_SERVICES").unwrap_or_default();
    for service in watched.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        link.register_service_processor(
            service,
            |message| {
                tracing::info!(
                    message_type = %message.message_type,
                    data = %message.data,
                    "message received"
                );
                Ok(())
            },
            "demo",
        );
    }

    // Log lifecycle events
    let mut events = link.events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(LinkEvent::Restarting { reason, attempt, delay_ms }) => {
                    tracing::info!(%reason, attempt, delay_ms, "link restarting");
                }
                Ok(other) => tracing::info!(event = ?other, "link event"),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(lagged = n, "event logger lagged behind link events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Connect
    if let Err(err) = link.connect(Duration::from_secs(10)).await {
        tracing::warn!(error = %err, "channel not ready; requests use the fallback until it is");
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    link.shutdown();

    Ok(())
}
