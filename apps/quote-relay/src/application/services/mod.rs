//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - [`QuoteResolver`]: candidate probing across providers with deadlines,
//!   caching and alternate-feed learning
//! - [`SubscriptionMultiplexer`]: ref-counted subscriptions over one stream
//! - [`ListenerRegistry`]: panic-isolated fan-out of stream events

pub mod listeners;
pub mod multiplexer;
pub mod resolver;

pub use listeners::{Listener, ListenerHandle, ListenerRegistry, StreamStatus, Topic};
pub use multiplexer::SubscriptionMultiplexer;
pub use resolver::{QuoteResolver, ResolveError, ResolverConfig};
