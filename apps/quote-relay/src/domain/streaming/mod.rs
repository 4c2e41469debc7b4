//! Streaming Types
//!
//! Connection lifecycle states and the events published to listeners.
//! These types are transport-agnostic; the frame codec turns wire frames
//! into [`StreamEvent`]s.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::series::{InstrumentRef, SeriesKey};

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle state of one streaming connection.
///
/// ```text
/// Disconnected -> Connecting -> Open -> Disconnected -> Connecting -> ...
///                                 \-> Closing -> Disconnected   (explicit)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection and none in progress.
    #[default]
    Disconnected,
    /// Connection attempt in progress.
    Connecting,
    /// Connected; frames flow.
    Open,
    /// Explicit shutdown in progress.
    Closing,
}

impl ConnectionState {
    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
        }
    }

    /// Numeric encoding for gauges.
    #[must_use]
    pub const fn as_gauge(self) -> f64 {
        match self {
            Self::Disconnected => 0.0,
            Self::Connecting => 1.0,
            Self::Open => 2.0,
            Self::Closing => 3.0,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Events
// =============================================================================

/// Connection lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Connection opened and subscriptions replayed.
    Connected,
    /// Connection lost or closed.
    Disconnected {
        /// Why the connection ended.
        reason: String,
    },
    /// Reconnect scheduled.
    Reconnecting {
        /// 1-based attempt number.
        attempt: u32,
        /// Delay before the attempt.
        delay: Duration,
    },
    /// Reconnect budget exhausted; no further automatic attempts.
    Fatal {
        /// Attempts made before giving up.
        attempts: u32,
    },
}

/// One inbound price update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceTick {
    /// Normalized series the tick belongs to.
    pub series_key: SeriesKey,
    /// Symbol as sent by the server.
    pub symbol: String,
    /// Exchange as sent by the server.
    pub exchange: String,
    /// Last price.
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    /// Server timestamp.
    pub ts: DateTime<Utc>,
}

/// Everything a stream listener can observe.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Price update.
    Price(PriceTick),
    /// Any other named server message.
    Message {
        /// Value of the frame's `type` field.
        kind: String,
        /// Frame payload.
        data: serde_json::Value,
    },
    /// Connection lifecycle change.
    Connection(ConnectionEvent),
}

// =============================================================================
// Outbound Frames
// =============================================================================

/// Frame sent to the price-distribution server.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    /// Start streaming the listed instruments.
    Subscribe(Vec<InstrumentRef>),
    /// Stop streaming the listed instruments.
    Unsubscribe(Vec<InstrumentRef>),
    /// Any other application message.
    Raw(serde_json::Value),
}

impl OutboundFrame {
    /// Subscription frames are never queued; the replay on connect covers them.
    #[must_use]
    pub const fn is_subscription(&self) -> bool {
        matches!(self, Self::Subscribe(_) | Self::Unsubscribe(_))
    }
}
