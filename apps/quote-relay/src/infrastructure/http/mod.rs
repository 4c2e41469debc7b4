//! HTTP Endpoint
//!
//! Quote lookups plus health checks, connection status reporting, and
//! Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /quote?symbol=&exchange=&timeout_ms=&debug=` - Resolve one price
//! - `POST /reconnect` - Restart every feed, including ones that gave up
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (any feed open)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{QuoteResolver, ResolveError, SubscriptionMultiplexer};
use crate::domain::quote::ResolvedQuote;
use crate::domain::streaming::ConnectionState;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Quote Types
// =============================================================================

/// Query string of `GET /quote`.
#[derive(Debug, Default, Deserialize)]
pub struct QuoteParams {
    /// Instrument symbol; may embed an exchange as `EX:SYM`.
    pub symbol: Option<String>,
    /// Exchange; defaults to the home venue.
    pub exchange: Option<String>,
    /// Overall deadline override in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Include resolution details in the response.
    #[serde(default)]
    pub debug: bool,
}

/// Successful quote response.
#[derive(Debug, Clone, Serialize)]
pub struct QuoteResponse {
    /// Always `true`.
    pub success: bool,
    /// Normalized symbol.
    pub symbol: String,
    /// Normalized exchange.
    pub exchange: String,
    /// Last price.
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    /// Candidate address that produced the price, or `cache`.
    pub source: String,
    /// Whether the price came from the cache.
    pub cached: bool,
    /// Resolution details, when requested.
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub debug: Option<QuoteDebug>,
}

/// Extra fields of a `debug=true` quote response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteDebug {
    /// Normalized series key.
    pub series_key: String,
    /// When the provider observed the price.
    pub observed_at: DateTime<Utc>,
    /// Best bid.
    #[serde(
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub bid: Option<Decimal>,
    /// Best ask.
    #[serde(
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub ask: Option<Decimal>,
    /// Candidate addresses generated for the request.
    pub candidates: Vec<String>,
}

impl QuoteResponse {
    fn new(resolved: ResolvedQuote, debug: bool) -> Self {
        let ResolvedQuote {
            quote,
            cached,
            candidates,
        } = resolved;
        let symbol = quote.series_key.symbol().to_string();
        let exchange = quote.series_key.exchange().unwrap_or_default().to_string();

        Self {
            success: true,
            symbol,
            exchange,
            price: quote.price,
            source: quote.source_candidate,
            cached,
            debug: debug.then(|| QuoteDebug {
                series_key: quote.series_key.to_string(),
                observed_at: quote.observed_at,
                bid: quote.bid,
                ask: quote.ask,
                candidates,
            }),
        }
    }
}

/// Failure body shared by every endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Always `false`.
    pub success: bool,
    /// Human-readable reason.
    pub error: String,
    /// Machine-readable reason.
    pub reason: &'static str,
}

const fn status_for(error: &ResolveError) -> StatusCode {
    match error {
        ResolveError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        ResolveError::NotFound { .. } => StatusCode::NOT_FOUND,
        ResolveError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        ResolveError::NoProviders => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ResolveError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            success: false,
            error: self.to_string(),
            reason: self.reason(),
        };
        (status_for(&self), Json(body)).into_response()
    }
}

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Relay version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Per-feed connection status, in provider order.
    pub feeds: Vec<FeedInfo>,
    /// Quote cache status.
    pub cache: CacheInfo,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational.
    Healthy,
    /// Some systems degraded but functional.
    Degraded,
    /// Critical systems unavailable.
    Unhealthy,
}

/// Individual feed status.
#[derive(Debug, Clone, Serialize)]
pub struct FeedInfo {
    /// Feed name (its URL).
    pub name: String,
    /// Connection state.
    pub state: ConnectionState,
    /// Whether this feed is open.
    pub connected: bool,
    /// Reconnect budget exhausted; needs `POST /reconnect`.
    pub fatal: bool,
    /// Reconnect attempt currently scheduled, if any.
    pub reconnect_attempt: Option<u32>,
    /// Price ticks received.
    pub ticks_received: u64,
    /// Arrival time of the last tick.
    pub last_tick_at: Option<DateTime<Utc>>,
    /// Distinct series subscribed on this feed.
    pub subscriptions: usize,
}

/// Quote cache status.
#[derive(Debug, Clone, Serialize)]
pub struct CacheInfo {
    /// Entries currently held.
    pub entries: usize,
}

// =============================================================================
// Server State
// =============================================================================

/// One feed as seen by the HTTP layer.
pub struct Feed {
    /// Display name.
    pub name: String,
    /// The feed's multiplexer.
    pub multiplexer: Arc<SubscriptionMultiplexer>,
}

impl Feed {
    fn info(&self) -> FeedInfo {
        let state = self.multiplexer.state();
        let status = self.multiplexer.listeners().status();
        FeedInfo {
            name: self.name.clone(),
            state,
            connected: state == ConnectionState::Open,
            fatal: status.fatal,
            reconnect_attempt: status.reconnect_attempt,
            ticks_received: status.ticks_received,
            last_tick_at: status.last_tick_at,
            subscriptions: self.multiplexer.stats().series_count,
        }
    }
}

/// Shared state for the HTTP server.
pub struct HttpState {
    version: String,
    started_at: Instant,
    resolver: Arc<QuoteResolver>,
    feeds: Vec<Feed>,
}

impl HttpState {
    /// Create new server state.
    #[must_use]
    pub fn new(version: String, resolver: Arc<QuoteResolver>, feeds: Vec<Feed>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            resolver,
            feeds,
        }
    }
}

// =============================================================================
// HTTP Server
// =============================================================================

/// Build the router. Exposed for in-process tests.
#[must_use]
pub fn router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/quote", get(quote_handler))
        .route("/reconnect", post(reconnect_handler))
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Quote and health HTTP server.
pub struct HttpServer {
    port: u16,
    state: Arc<HttpState>,
    cancel: CancellationToken,
}

impl HttpServer {
    /// Create a new server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HttpState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HttpServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HttpServerError> {
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HttpServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "HTTP server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HttpServerError::ServerFailed(e.to_string()))?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn quote_handler(
    State(state): State<Arc<HttpState>>,
    Query(params): Query<QuoteParams>,
) -> Result<Json<QuoteResponse>, ResolveError> {
    let symbol = params.symbol.unwrap_or_default();
    let exchange = params.exchange.unwrap_or_default();
    let deadline = params.timeout_ms.map(Duration::from_millis);

    let resolved = state.resolver.resolve(&symbol, &exchange, deadline).await?;
    Ok(Json(QuoteResponse::new(resolved, params.debug)))
}

async fn reconnect_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let mut restarted = Vec::with_capacity(state.feeds.len());
    for feed in &state.feeds {
        let multiplexer = Arc::clone(&feed.multiplexer);
        let name = feed.name.clone();
        tokio::spawn(async move {
            if let Err(e) = multiplexer.connect().await {
                tracing::warn!(feed = %name, error = %e, "Reconnect failed");
            }
        });
        restarted.push(feed.name.clone());
    }
    tracing::info!(feeds = restarted.len(), "Reconnect requested");
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "success": true, "feeds": restarted })),
    )
}

async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let is_ready = state
        .feeds
        .iter()
        .any(|feed| feed.multiplexer.state() == ConnectionState::Open);

    if is_ready {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HttpState) -> HealthResponse {
    let feeds: Vec<FeedInfo> = state.feeds.iter().map(Feed::info).collect();

    HealthResponse {
        status: determine_health_status(&feeds),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        feeds,
        cache: CacheInfo {
            entries: state.resolver.cached_quotes(),
        },
    }
}

fn determine_health_status(feeds: &[FeedInfo]) -> HealthStatus {
    let connected_count = feeds.iter().filter(|feed| feed.connected).count();

    match connected_count {
        0 => HealthStatus::Unhealthy,
        n if n == feeds.len() => HealthStatus::Healthy,
        _ => HealthStatus::Degraded,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::domain::quote::Quote;
    use crate::domain::series::SeriesKey;

    fn feed(connected: bool) -> FeedInfo {
        FeedInfo {
            name: "ws://feed".to_string(),
            state: if connected {
                ConnectionState::Open
            } else {
                ConnectionState::Disconnected
            },
            connected,
            fatal: false,
            reconnect_attempt: None,
            ticks_received: 0,
            last_tick_at: None,
            subscriptions: 0,
        }
    }

    fn resolved() -> ResolvedQuote {
        ResolvedQuote {
            quote: Quote {
                series_key: SeriesKey::parse("NSE:TCS"),
                price: dec!(3900.5),
                bid: Some(dec!(3900.25)),
                ask: None,
                change_abs: None,
                change_pct: None,
                volume: None,
                observed_at: Utc::now(),
                source_candidate: "TCS@NSE".to_string(),
            },
            cached: false,
            candidates: vec!["TCS@NSE".to_string(), "NSE:TCS".to_string()],
        }
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn determine_status_by_connected_feeds() {
        assert_eq!(determine_health_status(&[feed(true), feed(true)]), HealthStatus::Healthy);
        assert_eq!(determine_health_status(&[feed(true), feed(false)]), HealthStatus::Degraded);
        assert_eq!(determine_health_status(&[feed(false)]), HealthStatus::Unhealthy);
        assert_eq!(determine_health_status(&[]), HealthStatus::Unhealthy);
    }

    #[test]
    fn quote_response_shape() {
        let body = serde_json::to_value(QuoteResponse::new(resolved(), false)).unwrap();

        assert_eq!(
            body,
            serde_json::json!({
                "success": true,
                "symbol": "TCS",
                "exchange": "NSE",
                "price": 3900.5,
                "source": "TCS@NSE",
                "cached": false
            })
        );
    }

    #[test]
    fn debug_adds_resolution_details() {
        let body = serde_json::to_value(QuoteResponse::new(resolved(), true)).unwrap();

        assert_eq!(body["seriesKey"], "NSE:TCS");
        assert_eq!(body["bid"], 3900.25);
        assert!(body.get("ask").is_none());
        assert_eq!(body["candidates"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn error_status_codes() {
        let key = SeriesKey::parse("NSE:TCS");
        assert_eq!(
            status_for(&ResolveError::InvalidInput(String::new())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&ResolveError::NotFound { series_key: key.clone() }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&ResolveError::Timeout {
                series_key: key,
                elapsed_ms: 1
            }),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status_for(&ResolveError::NoProviders),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
