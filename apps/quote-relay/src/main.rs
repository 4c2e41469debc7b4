//! Quote Relay Binary
//!
//! Starts the real-time price relay.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin quote-relay
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `QUOTE_RELAY_FEED_URLS`: comma-separated price stream URLs, in provider
//!   priority order
//!
//! ## Optional
//! - `QUOTE_RELAY_HTTP_PORT`: HTTP port for quotes, health and metrics (default: 8090)
//! - `QUOTE_RELAY_HOME_VENUE`: venue assumed when none is given (default: NSE)
//! - `QUOTE_RELAY_DERIVATIVES_VENUE`: venue carrying options (default: NFO)
//! - `QUOTE_RELAY_DEADLINE_MS`: default resolution deadline (default: 10000)
//! - `QUOTE_RELAY_MAX_DEADLINE_MS`: ceiling for caller deadlines (default: 30000)
//! - `QUOTE_RELAY_ATTEMPT_TIMEOUT_MS`: per-candidate timeout (default: 4000)
//! - `QUOTE_RELAY_CACHE_TTL_SECS`: quote cache freshness (default: 30)
//! - `QUOTE_RELAY_MAX_RECONNECT_ATTEMPTS`: reconnects before giving up (default: 10)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: quote-relay)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures::future::join_all;
use quote_relay::application::ports::{ProviderAdapter, StreamEventHandler};
use quote_relay::application::services::{ListenerRegistry, QuoteResolver, SubscriptionMultiplexer};
use quote_relay::infrastructure::http::{Feed, HttpServer, HttpState};
use quote_relay::infrastructure::provider::FeedProviderAdapter;
use quote_relay::infrastructure::stream::{StreamSupervisor, SupervisorConfig, WebSocketConnector};
use quote_relay::infrastructure::telemetry;
use quote_relay::{RelayConfig, init_metrics};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init().context("failed to initialize telemetry")?;

    tracing::info!("Starting quote relay");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics().context("failed to install metrics recorder")?;

    let config = RelayConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();
    let supervisor_config = SupervisorConfig::from_stream_settings(&config.stream);

    // One supervisor, multiplexer and provider per feed, in priority order
    let mut providers: Vec<Arc<dyn ProviderAdapter>> = Vec::new();
    let mut feeds = Vec::new();
    let mut multiplexers = Vec::new();
    for url in &config.stream.feed_urls {
        let registry = ListenerRegistry::new();
        let supervisor = StreamSupervisor::new(
            Arc::new(WebSocketConnector::new(url.clone())),
            Arc::clone(&registry) as Arc<dyn StreamEventHandler>,
            supervisor_config.clone(),
        );
        let multiplexer = Arc::new(SubscriptionMultiplexer::new(Arc::new(supervisor), registry));

        providers.push(Arc::new(FeedProviderAdapter::new(
            url.clone(),
            Arc::clone(&multiplexer),
        )));
        feeds.push(Feed {
            name: url.clone(),
            multiplexer: Arc::clone(&multiplexer),
        });
        multiplexers.push(multiplexer);
    }

    // Connect feeds in the background; probes join any attempt in progress
    for (url, multiplexer) in config.stream.feed_urls.iter().zip(&multiplexers) {
        let url = url.clone();
        let multiplexer = Arc::clone(multiplexer);
        tokio::spawn(async move {
            if let Err(e) = multiplexer.connect().await {
                tracing::error!(feed = %url, error = %e, "Feed failed to connect");
            }
        });
    }

    let resolver = Arc::new(QuoteResolver::from_settings(providers, &config.resolver));

    // Spawn HTTP server
    let http_state = Arc::new(HttpState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        resolver,
        feeds,
    ));
    let http_server = HttpServer::new(
        config.server.http_port,
        http_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = http_server.run().await {
            tracing::error!(error = %e, "HTTP server error");
        }
    });

    tracing::info!("Quote relay ready");

    await_shutdown(shutdown_token).await;

    let disconnects = join_all(multiplexers.iter().map(|multiplexer| multiplexer.disconnect()));
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, disconnects).await.is_err() {
        tracing::warn!("Feeds did not close before the shutdown timeout");
    }

    tracing::info!("Quote relay stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &RelayConfig) {
    tracing::info!(
        http_port = config.server.http_port,
        home_venue = %config.resolver.home_venue,
        derivatives_venue = %config.resolver.derivatives_venue,
        feeds = config.stream.feed_urls.len(),
        "Configuration loaded"
    );
    tracing::debug!(
        feed_urls = ?config.stream.feed_urls,
        default_deadline_ms = u64::try_from(config.resolver.default_deadline.as_millis()).unwrap_or(u64::MAX),
        max_reconnect_attempts = config.stream.max_reconnect_attempts,
        "Relay settings"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
