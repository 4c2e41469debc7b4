//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with providers and streams.

/// Port interfaces for providers and stream transports.
pub mod ports;

/// Quote resolution, subscription multiplexing and event fan-out.
pub mod services;
