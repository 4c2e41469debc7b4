//! Series Keys
//!
//! Canonical identifiers for tradable instruments. A [`SeriesKey`] is the
//! only join key shared by the price cache, the subscription bookkeeping and
//! listener dispatch, so every path that names an instrument goes through
//! [`normalize`].
//!
//! # Format
//!
//! ```text
//! EXCHANGE:SYMBOL     (exchange known)
//! SYMBOL              (no exchange)
//! ```
//!
//! Both halves are uppercased with all whitespace removed. Unknown exchange
//! tokens pass through untouched; aliasing is the candidate generator's job.

use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// Series Key
// =============================================================================

/// Canonical `(exchange, symbol)` identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeriesKey(String);

impl SeriesKey {
    /// Re-normalize an already formatted key (e.g. one received on the wire).
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        normalize(raw, "")
    }

    /// The key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Exchange half of the key, if any.
    #[must_use]
    pub fn exchange(&self) -> Option<&str> {
        self.0.split_once(':').map(|(exchange, _)| exchange)
    }

    /// Symbol half of the key.
    #[must_use]
    pub fn symbol(&self) -> &str {
        self.0.split_once(':').map_or(self.0.as_str(), |(_, symbol)| symbol)
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SeriesKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// Normalizer
// =============================================================================

/// Canonicalize a `(symbol, exchange)` pair.
///
/// Total: never fails. An `EXCHANGE:SYMBOL` token embedded in `symbol` takes
/// precedence over the `exchange` argument. Idempotent:
/// `SeriesKey::parse(normalize(s, e).as_str()) == normalize(s, e)`.
#[must_use]
pub fn normalize(symbol: &str, exchange: &str) -> SeriesKey {
    let symbol = canonical_token(symbol);
    let symbol = symbol.trim_start_matches(':');

    let (exchange, symbol) = match symbol.split_once(':') {
        Some((embedded, rest)) => (embedded.to_string(), rest),
        None => (canonical_token(exchange), symbol),
    };

    if exchange.is_empty() {
        SeriesKey(symbol.to_string())
    } else {
        SeriesKey(format!("{exchange}:{symbol}"))
    }
}

/// Uppercase and strip every whitespace character.
fn canonical_token(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect()
}

// =============================================================================
// Instrument Reference
// =============================================================================

/// `{ symbol, exchange }` pair as carried on the streaming wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstrumentRef {
    /// Instrument symbol.
    pub symbol: String,
    /// Exchange or venue token (may be empty for combined addresses).
    #[serde(default)]
    pub exchange: String,
}

impl InstrumentRef {
    /// Create an instrument reference.
    #[must_use]
    pub fn new(symbol: impl Into<String>, exchange: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            exchange: exchange.into(),
        }
    }

    /// Normalized key for this instrument.
    #[must_use]
    pub fn series_key(&self) -> SeriesKey {
        normalize(&self.symbol, &self.exchange)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn normalize_is_case_and_whitespace_insensitive() {
        assert_eq!(normalize("rel", "nse"), normalize("REL", " NSE "));
        assert_eq!(normalize("rel", "nse").as_str(), "NSE:REL");
    }

    #[test]
    fn normalize_strips_inner_whitespace() {
        assert_eq!(normalize("nifty 50", "nse").as_str(), "NSE:NIFTY50");
    }

    #[test]
    fn embedded_exchange_wins() {
        let key = normalize("nse:reliance", "BSE");
        assert_eq!(key.as_str(), "NSE:RELIANCE");
        assert_eq!(key.exchange(), Some("NSE"));
        assert_eq!(key.symbol(), "RELIANCE");
    }

    #[test]
    fn empty_exchange_yields_bare_symbol() {
        let key = normalize("btcusdt", "");
        assert_eq!(key.as_str(), "BTCUSDT");
        assert_eq!(key.exchange(), None);
        assert_eq!(key.symbol(), "BTCUSDT");
    }

    #[test]
    fn unknown_exchange_passes_through() {
        assert_eq!(normalize("abc", "mystery_venue").as_str(), "MYSTERY_VENUE:ABC");
    }

    #[test]
    fn leading_colon_is_dropped() {
        assert_eq!(normalize(":infy", "").as_str(), "INFY");
        assert_eq!(normalize("::", "").as_str(), "");
    }

    #[test]
    fn instrument_ref_uses_normalizer() {
        let instrument = InstrumentRef::new("tcs", "nse");
        assert_eq!(instrument.series_key().as_str(), "NSE:TCS");
    }

    #[test]
    fn serializes_as_plain_string() {
        let json = serde_json::to_string(&normalize("tcs", "nse")).unwrap();
        assert_eq!(json, "\"NSE:TCS\"");
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(symbol in "[a-zA-Z0-9 :_&-]{0,12}", exchange in "[a-zA-Z _]{0,6}") {
            let once = normalize(&symbol, &exchange);
            let twice = SeriesKey::parse(once.as_str());
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn normalize_ignores_case_and_padding(symbol in "[a-z0-9]{1,10}", exchange in "[a-z]{1,6}") {
            let padded = format!("  {}\t", symbol.to_uppercase());
            prop_assert_eq!(
                normalize(&symbol, &exchange),
                normalize(&padded, &format!(" {} ", exchange.to_uppercase()))
            );
        }
    }
}
