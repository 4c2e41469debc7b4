//! Addressing Candidates
//!
//! Upstream providers are inconsistent about how they name instruments: some
//! want `{symbol, exchange}`, some a single `EXCHANGE:SYMBOL` token, some
//! lowercase venues, some a delayed-feed prefix. The generator turns one
//! human-entered pair into an ordered, deduplicated list of guesses, most
//! likely first.
//!
//! # Order
//!
//! 1. Literal pair as given
//! 2. Combined `EXCHANGE:SYMBOL` token
//! 3. Option contract re-encoding (switches the working pair to the
//!    derivatives venue for every later step)
//! 4. Index aliases (home venue and the dedicated index venue)
//! 5. Stable-coin quote currency for crypto pairs
//! 6. Exchange casing variants
//! 7. Delayed-feed prefixes for the working venue
//! 8. Learned alternate-feed prefixes (appended)

mod option;

use std::collections::HashSet;

use serde::Serialize;

pub use option::{OptionContract, OptionRight};

use crate::domain::series::{InstrumentRef, SeriesKey, normalize};

// =============================================================================
// Candidate
// =============================================================================

/// One guess at how an upstream provider addresses an instrument.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    /// Symbol or combined token sent upstream.
    pub series_representation: String,
    /// Exchange sent alongside the symbol, when the address is a pair.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_hint: Option<String>,
}

impl Candidate {
    /// `{symbol, exchange}` address.
    #[must_use]
    pub fn pair(symbol: impl Into<String>, exchange: impl Into<String>) -> Self {
        let exchange = exchange.into();
        Self {
            series_representation: symbol.into(),
            provider_hint: (!exchange.is_empty()).then_some(exchange),
        }
    }

    /// Single `EXCHANGE:SYMBOL` token address.
    #[must_use]
    pub fn combined(exchange: &str, symbol: &str) -> Self {
        Self {
            series_representation: format!("{exchange}:{symbol}"),
            provider_hint: None,
        }
    }

    /// Human-readable address for logs and debug output.
    #[must_use]
    pub fn address(&self) -> String {
        match &self.provider_hint {
            Some(hint) => format!("{}@{hint}", self.series_representation),
            None => self.series_representation.clone(),
        }
    }

    /// Wire form of this candidate.
    #[must_use]
    pub fn instrument(&self) -> InstrumentRef {
        InstrumentRef::new(
            self.series_representation.clone(),
            self.provider_hint.clone().unwrap_or_default(),
        )
    }

    /// Normalized key this candidate resolves to on a stream.
    #[must_use]
    pub fn series_key(&self) -> SeriesKey {
        normalize(
            &self.series_representation,
            self.provider_hint.as_deref().unwrap_or_default(),
        )
    }
}

/// Generated candidates plus the working pair they were derived from.
#[derive(Debug, Clone)]
pub struct CandidateSet {
    /// Key of the instrument as requested.
    pub series_key: SeriesKey,
    /// Symbol after option re-encoding, if any.
    pub working_symbol: String,
    /// Exchange after option redirection, if any.
    pub working_exchange: String,
    /// Ordered, deduplicated candidates.
    pub candidates: Vec<Candidate>,
}

// =============================================================================
// Static Tables
// =============================================================================

struct IndexAlias {
    names: &'static [&'static str],
    upstream: &'static str,
    home: &'static str,
}

const INDEX_ALIASES: &[IndexAlias] = &[
    IndexAlias {
        names: &["NIFTY", "NIFTY50", "NIFTY_50"],
        upstream: "NIFTY",
        home: "NSE",
    },
    IndexAlias {
        names: &["BANKNIFTY", "NIFTYBANK", "NIFTY_BANK"],
        upstream: "BANKNIFTY",
        home: "NSE",
    },
    IndexAlias {
        names: &["FINNIFTY", "NIFTYFIN", "NIFTY_FIN_SERVICE"],
        upstream: "FINNIFTY",
        home: "NSE",
    },
    IndexAlias {
        names: &["MIDCPNIFTY", "NIFTYMIDCAPSELECT", "NIFTY_MID_SELECT"],
        upstream: "MIDCPNIFTY",
        home: "NSE",
    },
    IndexAlias {
        names: &["INDIAVIX", "INDIA_VIX", "VIX"],
        upstream: "INDIAVIX",
        home: "NSE",
    },
    IndexAlias {
        names: &["SENSEX", "BSESENSEX"],
        upstream: "SENSEX",
        home: "BSE",
    },
    IndexAlias {
        names: &["BANKEX", "BSEBANKEX"],
        upstream: "BANKEX",
        home: "BSE",
    },
];

const CRYPTO_VENUES: &[&str] = &[
    "BINANCE", "BITSTAMP", "BYBIT", "COINBASE", "CRYPTO", "KRAKEN", "OKX",
];

const CRYPTO_BASES: &[&str] = &[
    "ADA", "BNB", "BTC", "DOGE", "DOT", "ETH", "LTC", "SOL", "XRP",
];

const STABLE_COINS: &[&str] = &["USDT", "USDC"];

const DELAYED_FEEDS: &[(&str, &[&str])] = &[
    ("NSE", &["NSE_DLY"]),
    ("BSE", &["BSE_DLY"]),
    ("MCX", &["MCX_DLY"]),
];

/// Venue that carries benchmark indices.
pub const DEFAULT_INDEX_VENUE: &str = "INDEX";

// =============================================================================
// Generator
// =============================================================================

/// Produces ordered addressing candidates for a `(symbol, exchange)` pair.
#[derive(Debug, Clone)]
pub struct CandidateGenerator {
    home_venue: String,
    derivatives_venue: String,
    index_venue: String,
}

impl CandidateGenerator {
    /// Create a generator for the given home and derivatives venues.
    #[must_use]
    pub fn new(home_venue: impl Into<String>, derivatives_venue: impl Into<String>) -> Self {
        Self {
            home_venue: home_venue.into().trim().to_uppercase(),
            derivatives_venue: derivatives_venue.into().trim().to_uppercase(),
            index_venue: DEFAULT_INDEX_VENUE.to_string(),
        }
    }

    /// Venue used when the caller gives none.
    #[must_use]
    pub fn home_venue(&self) -> &str {
        &self.home_venue
    }

    /// Generate candidates without any learned prefixes.
    #[must_use]
    pub fn generate(&self, symbol: &str, exchange: &str) -> CandidateSet {
        self.generate_with_learned(symbol, exchange, &[])
    }

    /// Generate candidates, appending `learned` alternate-feed prefixes.
    #[must_use]
    pub fn generate_with_learned(
        &self,
        symbol: &str,
        exchange: &str,
        learned: &[String],
    ) -> CandidateSet {
        let mut literal_symbol = symbol.trim();
        let mut literal_exchange = match exchange.trim() {
            "" => self.home_venue.as_str(),
            given => given,
        };
        if let Some((embedded, rest)) = literal_symbol.split_once(':')
            && !embedded.trim().is_empty()
        {
            literal_exchange = embedded.trim();
            literal_symbol = rest.trim();
        }

        let series_key = normalize(literal_symbol, literal_exchange);
        let mut working_symbol = series_key.symbol().to_string();
        let mut working_exchange = literal_exchange.to_uppercase();

        let mut out = CandidateList::default();

        // 1-2: literal pair, combined token
        out.push(Candidate::pair(literal_symbol, literal_exchange));
        out.push(Candidate::combined(&working_exchange, &working_symbol));

        // 3: option contracts move to the derivatives venue
        if let Some(contract) = OptionContract::parse(&working_symbol) {
            working_symbol = contract.feed_symbol();
            working_exchange.clone_from(&self.derivatives_venue);
            out.push(Candidate::pair(&working_symbol, &working_exchange));
            out.push(Candidate::combined(&working_exchange, &working_symbol));
        }

        // 4: index aliases
        if let Some(alias) = INDEX_ALIASES
            .iter()
            .find(|alias| alias.names.contains(&working_symbol.as_str()))
        {
            for venue in [alias.home, self.index_venue.as_str()] {
                out.push(Candidate::pair(alias.upstream, venue));
                out.push(Candidate::combined(venue, alias.upstream));
            }
        }

        // 5: crypto pairs quoted in fiat
        for variant in stable_coin_variants(&working_symbol, &working_exchange) {
            out.push(Candidate::pair(&variant, &working_exchange));
            out.push(Candidate::combined(&working_exchange, &variant));
        }

        // 6: exchange casing
        for venue in casing_variants(&working_exchange) {
            out.push(Candidate::pair(&working_symbol, &venue));
            out.push(Candidate::combined(&venue, &working_symbol));
        }

        // 7: delayed feeds
        if let Some((_, prefixes)) = DELAYED_FEEDS
            .iter()
            .find(|(venue, _)| *venue == working_exchange)
        {
            for prefix in *prefixes {
                out.push(Candidate::combined(prefix, &working_symbol));
            }
        }

        // 8: learned
        for prefix in learned {
            out.push(Candidate::combined(prefix, &working_symbol));
        }

        CandidateSet {
            series_key,
            working_symbol,
            working_exchange,
            candidates: out.into_inner(),
        }
    }
}

#[derive(Default)]
struct CandidateList {
    seen: HashSet<Candidate>,
    ordered: Vec<Candidate>,
}

impl CandidateList {
    fn push(&mut self, candidate: Candidate) {
        if candidate.series_representation.is_empty() {
            return;
        }
        if self.seen.insert(candidate.clone()) {
            self.ordered.push(candidate);
        }
    }

    fn into_inner(self) -> Vec<Candidate> {
        self.ordered
    }
}

fn stable_coin_variants(symbol: &str, exchange: &str) -> Vec<String> {
    let compact: String = symbol.chars().filter(|c| !matches!(c, '-' | '/')).collect();
    let Some(base) = compact.strip_suffix("USD") else {
        return Vec::new();
    };
    if base.is_empty() || !(CRYPTO_VENUES.contains(&exchange) || CRYPTO_BASES.contains(&base)) {
        return Vec::new();
    }
    STABLE_COINS
        .iter()
        .map(|coin| format!("{base}{coin}"))
        .collect()
}

fn casing_variants(exchange: &str) -> Vec<String> {
    let lower = exchange.to_lowercase();
    let mut chars = lower.chars();
    let capitalized: String = chars
        .next()
        .map(|first| first.to_uppercase().chain(chars).collect())
        .unwrap_or_default();
    vec![exchange.to_uppercase(), lower, capitalized]
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn generator() -> CandidateGenerator {
        CandidateGenerator::new("NSE", "NFO")
    }

    fn addresses(set: &CandidateSet) -> Vec<String> {
        set.candidates.iter().map(Candidate::address).collect()
    }

    #[test]
    fn literal_then_combined_first() {
        let set = generator().generate("reliance", "nse");
        assert_eq!(set.candidates[0], Candidate::pair("reliance", "nse"));
        assert_eq!(set.candidates[1], Candidate::combined("NSE", "RELIANCE"));
        assert_eq!(set.series_key.as_str(), "NSE:RELIANCE");
    }

    #[test]
    fn never_empty_for_non_empty_input() {
        let set = generator().generate("X", "");
        assert!(!set.candidates.is_empty());
        assert_eq!(set.candidates[0], Candidate::pair("X", "NSE"));
    }

    #[test]
    fn candidates_are_unique() {
        let set = generator().generate("TCS", "NSE");
        let unique: HashSet<_> = set.candidates.iter().collect();
        assert_eq!(unique.len(), set.candidates.len());
    }

    #[test]
    fn option_contract_redirects_before_other_fallbacks() {
        let set = generator().generate("RELIANCE251230C2500", "NSE");

        assert_eq!(set.working_symbol, "RELIANCE30DEC252500CE");
        assert_eq!(set.working_exchange, "NFO");
        assert_eq!(
            set.candidates[2],
            Candidate::pair("RELIANCE30DEC252500CE", "NFO")
        );
        assert_eq!(
            set.candidates[3],
            Candidate::combined("NFO", "RELIANCE30DEC252500CE")
        );
        // Every later fallback uses the re-encoded symbol and redirected venue
        for candidate in &set.candidates[2..] {
            assert!(
                candidate.series_representation.contains("RELIANCE30DEC252500CE"),
                "{}",
                candidate.address()
            );
            assert!(!candidate.address().to_uppercase().contains("NSE"));
        }
    }

    #[test]
    fn index_alias_adds_index_venue() {
        let set = generator().generate("nifty 50", "NSE");
        let all = addresses(&set);
        assert!(all.contains(&"NIFTY@NSE".to_string()));
        assert!(all.contains(&"INDEX:NIFTY".to_string()));
        assert!(all.contains(&"NIFTY@INDEX".to_string()));
    }

    #[test]
    fn bse_index_routes_to_bse() {
        let set = generator().generate("SENSEX", "");
        let all = addresses(&set);
        assert!(all.contains(&"SENSEX@BSE".to_string()));
        assert!(all.contains(&"BSE:SENSEX".to_string()));
    }

    #[test_case("BTCUSD", "BINANCE", "BTCUSDT" ; "known venue")]
    #[test_case("ETH-USD", "SOMEVENUE", "ETHUSDC" ; "known base")]
    #[test_case("PEPEUSD", "KRAKEN", "PEPEUSDT" ; "unknown base on crypto venue")]
    fn crypto_pairs_get_stable_coin_variants(symbol: &str, exchange: &str, expected: &str) {
        let set = generator().generate(symbol, exchange);
        assert!(
            set.candidates
                .iter()
                .any(|c| c.series_representation == expected),
            "{:?}",
            addresses(&set)
        );
    }

    #[test]
    fn equity_gets_no_stable_coin_variant() {
        let set = generator().generate("ABCUSD", "NSE");
        assert!(
            !set.candidates
                .iter()
                .any(|c| c.series_representation.contains("USDT"))
        );
    }

    #[test]
    fn exchange_casing_variants() {
        let set = generator().generate("INFY", "NSE");
        let all = addresses(&set);
        assert!(all.contains(&"INFY@nse".to_string()));
        assert!(all.contains(&"INFY@Nse".to_string()));
        assert!(all.contains(&"nse:INFY".to_string()));
    }

    #[test]
    fn delayed_feed_prefix_for_home_venue() {
        let set = generator().generate("INFY", "NSE");
        assert!(addresses(&set).contains(&"NSE_DLY:INFY".to_string()));
    }

    #[test]
    fn learned_prefixes_are_appended_last() {
        let learned = vec!["NSE_RT".to_string()];
        let set = generator().generate_with_learned("INFY", "NSE", &learned);
        assert_eq!(
            set.candidates.last(),
            Some(&Candidate::combined("NSE_RT", "INFY"))
        );
    }

    #[test]
    fn embedded_exchange_overrides_argument() {
        let set = generator().generate("BSE:TCS", "NSE");
        assert_eq!(set.candidates[0], Candidate::pair("TCS", "BSE"));
        assert_eq!(set.series_key.as_str(), "BSE:TCS");
    }

    #[test]
    fn candidate_instrument_and_key() {
        let pair = Candidate::pair("tcs", "nse");
        assert_eq!(pair.instrument(), InstrumentRef::new("tcs", "nse"));
        assert_eq!(pair.series_key().as_str(), "NSE:TCS");

        let combined = Candidate::combined("NSE", "TCS");
        assert_eq!(combined.instrument(), InstrumentRef::new("NSE:TCS", ""));
        assert_eq!(combined.series_key().as_str(), "NSE:TCS");
    }
}
