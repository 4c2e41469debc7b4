#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Quote Relay - Real-Time Price Acquisition
//!
//! Resolves loosely specified instruments to fresh prices across an ordered
//! list of upstream providers, and keeps persistent price streams alive
//! with reconnect, replay and ref-counted subscriptions.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core price acquisition types
//!   - `series`: `SeriesKey` normalization
//!   - `candidate`: Addressing variants, option re-encoding
//!   - `quote` / `cache`: Quotes, price cache, learned alternate feeds
//!   - `streaming` / `subscription`: Stream events and refcounts
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Provider adapter, stream transport and control interfaces
//!   - `services`: Quote resolver, subscription multiplexer, listener registry
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `stream`: Connection supervisor and WebSocket transport
//!   - `provider`: Stream-backed provider adapter
//!   - `http`: Quote, health and metrics endpoints
//!   - `config`: Configuration from the environment
//!
//! # Data Flow
//!
//! ```text
//!                    ┌──────────────┐    ┌────────────────┐    ┌─────────────┐
//! GET /quote ──────► │ QuoteResolver│───►│ ProviderAdapter│───►│ Multiplexer │
//!                    └──────────────┘    └────────────────┘    └──────┬──────┘
//!                           ▲                                         │
//!                           │ ticks / errors                          ▼
//!                    ┌──────┴───────┐                          ┌─────────────┐
//!                    │  Listeners   │◄──── decoded frames ─────│ Supervisor  │◄──► price WS
//!                    └──────────────┘                          └─────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core price types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::candidate::{Candidate, CandidateGenerator};
pub use domain::quote::{PriceSnapshot, Quote, ResolvedQuote};
pub use domain::series::{InstrumentRef, SeriesKey, normalize};
pub use domain::streaming::{ConnectionEvent, ConnectionState, OutboundFrame, StreamEvent};
pub use domain::subscription::{SubscriptionChanges, SubscriptionManager, SubscriptionStats};

// Ports
pub use application::ports::{
    ProbeSignal, ProviderAdapter, ProviderError, QuoteChannel, StreamConnector, StreamControl,
    StreamError, TransportError,
};

// Services
pub use application::services::{
    ListenerHandle, ListenerRegistry, QuoteResolver, ResolveError, ResolverConfig,
    SubscriptionMultiplexer, Topic,
};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, RelayConfig, ResolverSettings, ServerSettings, StreamSettings,
};

// Streams
pub use infrastructure::stream::{LinkStatus, StreamSupervisor, SupervisorConfig};

// HTTP server
pub use infrastructure::http::{HttpServer, HttpServerError, HttpState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
