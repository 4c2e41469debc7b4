//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Resolution**: outcomes, latency, cache hits, probe attempts
//! - **Streams**: connection state, reconnects, dropped frames, ticks
//! - **Listeners**: subscriptions and isolated listener panics
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the HTTP server port. Recording
//! before [`init_metrics`] is a no-op.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::streaming::ConnectionState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Subsequent calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Resolution
    describe_counter!(
        "quote_relay_resolutions_total",
        "Quote resolutions by outcome"
    );
    describe_histogram!(
        "quote_relay_resolution_seconds",
        "Wall time of quote resolutions"
    );
    describe_counter!(
        "quote_relay_cache_lookups_total",
        "Price cache lookups by result"
    );
    describe_counter!(
        "quote_relay_probe_attempts_total",
        "Candidate probe attempts by provider and outcome"
    );
    describe_counter!(
        "quote_relay_alternate_feeds_learned_total",
        "Alternate feed prefixes learned from permission redirects"
    );

    // Streams
    describe_gauge!(
        "quote_relay_stream_state",
        "Stream connection state (0 disconnected, 1 connecting, 2 open, 3 closing)"
    );
    describe_counter!(
        "quote_relay_reconnects_total",
        "Stream reconnect attempts"
    );
    describe_counter!(
        "quote_relay_frames_dropped_total",
        "Queued outbound frames dropped because the queue was full"
    );
    describe_counter!(
        "quote_relay_ticks_total",
        "Price ticks received"
    );

    // Listeners
    describe_gauge!(
        "quote_relay_subscriptions",
        "Distinct series with a live stream subscription"
    );
    describe_counter!(
        "quote_relay_listener_panics_total",
        "Listener callbacks that panicked during dispatch"
    );
}

// =============================================================================
// Labels
// =============================================================================

/// Final outcome of a resolution call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// Resolved by probing.
    Resolved,
    /// Served from cache.
    Cached,
    /// Every candidate rejected.
    NotFound,
    /// Deadline elapsed.
    Timeout,
    /// Request rejected before probing.
    InvalidInput,
    /// No provider configured.
    Unavailable,
}

impl ResolutionOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Resolved => "resolved",
            Self::Cached => "cached",
            Self::NotFound => "not_found",
            Self::Timeout => "timeout",
            Self::InvalidInput => "invalid_input",
            Self::Unavailable => "unavailable",
        }
    }
}

/// Outcome of a single candidate probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Usable price received.
    Price,
    /// Permission denied (possibly with a redirect).
    Redirected,
    /// Address unknown to the provider.
    NotFound,
    /// Per-attempt timeout elapsed.
    Timeout,
    /// Provider or channel error.
    Error,
}

impl ProbeOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Price => "price",
            Self::Redirected => "redirected",
            Self::NotFound => "not_found",
            Self::Timeout => "timeout",
            Self::Error => "error",
        }
    }
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a finished resolution.
pub fn record_resolution(outcome: ResolutionOutcome, elapsed: Duration) {
    counter!("quote_relay_resolutions_total", "outcome" => outcome.as_str()).increment(1);
    histogram!("quote_relay_resolution_seconds", "outcome" => outcome.as_str())
        .record(elapsed.as_secs_f64());
}

/// Record a price cache lookup.
pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("quote_relay_cache_lookups_total", "result" => result).increment(1);
}

/// Record a finished probe attempt.
pub fn record_probe(provider: &str, outcome: ProbeOutcome) {
    counter!(
        "quote_relay_probe_attempts_total",
        "provider" => provider.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Record a newly learned alternate feed prefix.
pub fn record_alternate_feed_learned() {
    counter!("quote_relay_alternate_feeds_learned_total").increment(1);
}

/// Update the connection state gauge for a stream.
pub fn record_stream_state(stream: &str, state: ConnectionState) {
    gauge!("quote_relay_stream_state", "stream" => stream.to_string()).set(state.as_gauge());
}

/// Record a reconnect attempt.
pub fn record_reconnect(stream: &str) {
    counter!("quote_relay_reconnects_total", "stream" => stream.to_string()).increment(1);
}

/// Record queued frames dropped on overflow.
pub fn record_frames_dropped(stream: &str, count: usize) {
    counter!("quote_relay_frames_dropped_total", "stream" => stream.to_string())
        .increment(u64::try_from(count).unwrap_or(u64::MAX));
}

/// Record one received price tick.
pub fn record_tick(stream: &str) {
    counter!("quote_relay_ticks_total", "stream" => stream.to_string()).increment(1);
}

/// Update the live subscription gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscriptions(count: usize) {
    gauge!("quote_relay_subscriptions").set(count as f64);
}

/// Record a listener panic caught during dispatch.
pub fn record_listener_panic() {
    counter!("quote_relay_listener_panics_total").increment(1);
}

// =============================================================================
// Tests
// =============================================================================
