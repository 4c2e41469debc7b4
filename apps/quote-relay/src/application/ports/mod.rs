//! Port Interfaces
//!
//! Contracts between the application services and the outside world,
//! following the Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`ProviderAdapter`] / [`QuoteChannel`]: probe one upstream address and
//!   wait for a price, a permission redirect or a not-found signal
//! - [`StreamConnector`]: open one raw frame transport to a
//!   price-distribution endpoint
//!
//! ## Driver Ports (Inbound)
//!
//! - [`StreamControl`]: the connection supervisor surface the subscription
//!   multiplexer drives
//! - [`StreamEventHandler`]: receives every decoded inbound event,
//!   synchronously, on the reader task

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, Stream};

use crate::domain::candidate::Candidate;
use crate::domain::quote::PriceSnapshot;
use crate::domain::series::InstrumentRef;
use crate::domain::streaming::{ConnectionState, OutboundFrame, StreamEvent};

// =============================================================================
// Errors
// =============================================================================

/// Errors from a raw frame transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Could not establish the connection.
    #[error("connect failed: {0}")]
    Connect(String),

    /// Read or write failed on an established connection.
    #[error("transport I/O error: {0}")]
    Io(String),

    /// Peer closed the connection.
    #[error("connection closed by peer")]
    Closed,
}

/// Errors surfaced by the streaming connection supervisor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// Reconnect budget exhausted; needs an explicit reconnect.
    #[error("connectivity failure after {attempts} reconnect attempts")]
    ConnectivityFailure {
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// Connection was closed explicitly.
    #[error("stream closed")]
    Closed,
}

/// Errors from a single provider attempt.
///
/// The resolver never surfaces these to callers; an erroring attempt simply
/// yields to the next candidate.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Provider cannot serve requests right now.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// Provider refused the candidate address.
    #[error("candidate rejected: {0}")]
    Rejected(String),

    /// The channel ended without a signal.
    #[error("quote channel closed")]
    ChannelClosed,

    /// Underlying stream failed.
    #[error(transparent)]
    Stream(#[from] StreamError),
}

// =============================================================================
// Provider Ports
// =============================================================================

/// What one candidate probe can report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeSignal {
    /// A price observation. Zero prices are placeholders and keep waiting.
    Price(PriceSnapshot),
    /// Provider denied access on this feed and may name an alternate.
    PermissionDenied {
        /// Alternate feed prefix to retry with.
        alternate_feed: Option<String>,
    },
    /// Provider does not know this address.
    NotFound,
}

/// An open, ephemeral provider-side subscription for one candidate.
///
/// `close` must be idempotent; the resolver calls it for every channel it
/// opened, including channels whose attempt was abandoned.
#[async_trait]
pub trait QuoteChannel: Send {
    /// Wait for the next signal on this channel.
    async fn next_signal(&mut self) -> Result<ProbeSignal, ProviderError>;

    /// Release provider-side resources.
    fn close(&mut self);
}

/// One upstream market-data source, tried as an alternate strategy.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Stable identifier for logs and metrics.
    fn id(&self) -> &str;

    /// Open a channel probing `candidate`.
    async fn open(&self, candidate: &Candidate) -> Result<Box<dyn QuoteChannel>, ProviderError>;

    /// Identity of the upstream channel `candidate` opens.
    ///
    /// Candidates with equal keys are opened once per resolution, using the
    /// first in generation order. Defaults to the literal address.
    fn channel_key(&self, candidate: &Candidate) -> String {
        candidate.address()
    }
}

// =============================================================================
// Streaming Ports
// =============================================================================

/// Outbound half of a frame transport.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

/// Inbound half of a frame transport.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// Opens raw text-frame transports to one endpoint.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    /// Endpoint description for logs and metrics labels.
    fn endpoint(&self) -> &str;

    /// Open a new connection.
    async fn connect(&self) -> Result<(FrameSink, FrameStream), TransportError>;
}

/// Receives decoded inbound events.
///
/// Called on the reader task, one event at a time, in arrival order.
pub trait StreamEventHandler: Send + Sync {
    /// Handle one event. Must not block.
    fn handle(&self, event: &StreamEvent);
}

/// Supervisor surface driven by the subscription multiplexer.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StreamControl: Send + Sync {
    /// Connect, or wait for the connection attempt already in progress.
    async fn connect(&self) -> Result<(), StreamError>;

    /// Close explicitly; suppresses reconnects and clears queued state.
    async fn disconnect(&self);

    /// Add instruments to the wire subscription set.
    fn subscribe(&self, instruments: &[InstrumentRef]);

    /// Remove instruments from the wire subscription set.
    fn unsubscribe(&self, instruments: &[InstrumentRef]);

    /// Send an application frame, queueing it while not open.
    fn send(&self, frame: OutboundFrame);

    /// Current connection state.
    fn state(&self) -> ConnectionState;
}
