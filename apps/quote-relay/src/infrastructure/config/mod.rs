//! Configuration Module
//!
//! Environment-driven settings for the relay.

mod settings;

pub use settings::{ConfigError, RelayConfig, ResolverSettings, ServerSettings, StreamSettings};
