//! Quote Types
//!
//! A [`PriceSnapshot`] is what a provider reports for one candidate; a
//! [`Quote`] is that snapshot bound to the requested series and the
//! candidate that produced it.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::series::SeriesKey;

/// `source_candidate` value for quotes served from the price cache.
pub const CACHE_SOURCE: &str = "cache";

/// Price observation reported by a provider adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceSnapshot {
    /// Last traded price.
    pub price: Decimal,
    /// Best bid.
    pub bid: Option<Decimal>,
    /// Best ask.
    pub ask: Option<Decimal>,
    /// Absolute change versus previous close.
    pub change_abs: Option<Decimal>,
    /// Percent change versus previous close.
    pub change_pct: Option<Decimal>,
    /// Traded volume.
    pub volume: Option<Decimal>,
    /// Time the provider observed the price.
    pub observed_at: DateTime<Utc>,
}

impl PriceSnapshot {
    /// Snapshot carrying only a last price.
    #[must_use]
    pub const fn last(price: Decimal, observed_at: DateTime<Utc>) -> Self {
        Self {
            price,
            bid: None,
            ask: None,
            change_abs: None,
            change_pct: None,
            volume: None,
            observed_at,
        }
    }

    /// A zero or negative price is a placeholder, not a quote.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.price > Decimal::ZERO
    }

    /// Bind this snapshot to a series and source candidate.
    #[must_use]
    pub fn into_quote(self, series_key: SeriesKey, source_candidate: impl Into<String>) -> Quote {
        Quote {
            series_key,
            price: self.price,
            bid: self.bid,
            ask: self.ask,
            change_abs: self.change_abs,
            change_pct: self.change_pct,
            volume: self.volume,
            observed_at: self.observed_at,
            source_candidate: source_candidate.into(),
        }
    }
}

/// A resolved price for one series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    /// Requested series.
    pub series_key: SeriesKey,
    /// Last traded price.
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    /// Best bid.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub bid: Option<Decimal>,
    /// Best ask.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub ask: Option<Decimal>,
    /// Absolute change versus previous close.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub change_abs: Option<Decimal>,
    /// Percent change versus previous close.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub change_pct: Option<Decimal>,
    /// Traded volume.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub volume: Option<Decimal>,
    /// Time the provider observed the price.
    pub observed_at: DateTime<Utc>,
    /// Candidate address that produced the price, or `"cache"`.
    pub source_candidate: String,
}

/// Outcome of a successful resolution.
#[derive(Debug, Clone)]
pub struct ResolvedQuote {
    /// The quote.
    pub quote: Quote,
    /// Whether the quote came from the price cache.
    pub cached: bool,
    /// Candidate addresses generated for this request (empty on cache hits).
    pub candidates: Vec<String>,
}
