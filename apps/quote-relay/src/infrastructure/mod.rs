//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Stream supervisor, reconnect policy, frame codec and WebSocket transport.
pub mod stream;

/// Provider adapter that probes candidates over a price stream.
pub mod provider;

/// Quote, health and metrics HTTP endpoints.
pub mod http;

/// Configuration loading.
pub mod config;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
