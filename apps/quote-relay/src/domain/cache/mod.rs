//! Resolution State Shared Across Requests
//!
//! Two concurrent maps keyed by [`SeriesKey`]:
//!
//! - [`PriceCache`]: last resolved quote with a freshness window
//! - [`AlternateFeedBook`]: alternate feed prefixes learned from
//!   permission-denied responses
//!
//! Entries for different keys never contend on a shared lock. Expired cache
//! entries are evicted lazily when read; there is no background sweep.

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::domain::quote::Quote;
use crate::domain::series::SeriesKey;

// =============================================================================
// Price Cache
// =============================================================================

/// Cached quote with its expiry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The cached quote.
    pub quote: Quote,
    /// Instant after which the entry is stale.
    pub expires_at: Instant,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        now <= self.expires_at
    }
}

/// Longest freshness window an entry can have.
pub const MAX_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Last-value store with a per-entry freshness window.
#[derive(Debug, Default)]
pub struct PriceCache {
    entries: DashMap<SeriesKey, CacheEntry>,
}

impl PriceCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh quote for `key`, if any. Stale entries are evicted.
    #[must_use]
    pub fn get(&self, key: &SeriesKey) -> Option<Quote> {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if entry.is_fresh(now) => return Some(entry.quote.clone()),
            Some(_) => {}
            None => return None,
        }

        self.entries.remove_if(key, |_, entry| !entry.is_fresh(now));
        None
    }

    /// Store `quote` under `key` for `ttl`. Last write wins.
    ///
    /// TTLs longer than [`MAX_TTL`] are clamped.
    pub fn put(&self, key: SeriesKey, quote: Quote, ttl: Duration) {
        let entry = CacheEntry {
            quote,
            expires_at: Instant::now() + ttl.min(MAX_TTL),
        };
        self.entries.insert(key, entry);
    }

    /// Number of stored entries, including stale ones not yet evicted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// Alternate Feed Book
// =============================================================================

/// Upper bound on learned prefixes per key.
pub const MAX_PREFIXES_PER_KEY: usize = 4;

/// Alternate feed prefixes learned per series.
#[derive(Debug, Default)]
pub struct AlternateFeedBook {
    learned: DashMap<SeriesKey, Vec<String>>,
}

impl AlternateFeedBook {
    /// Create an empty book.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `prefix` for `key`. Returns `true` if it was not known yet.
    ///
    /// Once a key holds [`MAX_PREFIXES_PER_KEY`] prefixes the oldest is
    /// forgotten.
    pub fn record(&self, key: &SeriesKey, prefix: &str) -> bool {
        let prefix = prefix.trim().to_uppercase();
        if prefix.is_empty() {
            return false;
        }

        let mut prefixes = self.learned.entry(key.clone()).or_default();
        if prefixes.contains(&prefix) {
            return false;
        }
        if prefixes.len() == MAX_PREFIXES_PER_KEY {
            prefixes.remove(0);
        }
        prefixes.push(prefix);
        true
    }

    /// Prefixes learned for `key`, oldest first.
    #[must_use]
    pub fn prefixes(&self, key: &SeriesKey) -> Vec<String> {
        self.learned
            .get(key)
            .map(|prefixes| prefixes.clone())
            .unwrap_or_default()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::domain::quote::PriceSnapshot;
    use crate::domain::series::normalize;

    fn quote(key: &SeriesKey) -> Quote {
        PriceSnapshot::last(dec!(101.25), Utc::now()).into_quote(key.clone(), "NSE:TCS")
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_entry_is_returned() {
        let cache = PriceCache::new();
        let key = normalize("tcs", "nse");
        cache.put(key.clone(), quote(&key), Duration::from_secs(30));

        tokio::time::advance(Duration::from_secs(29)).await;

        assert_eq!(cache.get(&key).map(|q| q.price), Some(dec!(101.25)));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_entry_is_evicted_on_read() {
        let cache = PriceCache::new();
        let key = normalize("tcs", "nse");
        cache.put(key.clone(), quote(&key), Duration::from_secs(30));

        tokio::time::advance(Duration::from_secs(31)).await;

        assert!(cache.get(&key).is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn put_refreshes_expiry() {
        let cache = PriceCache::new();
        let key = normalize("tcs", "nse");
        cache.put(key.clone(), quote(&key), Duration::from_secs(10));
        tokio::time::advance(Duration::from_secs(8)).await;
        cache.put(key.clone(), quote(&key), Duration::from_secs(10));
        tokio::time::advance(Duration::from_secs(8)).await;

        assert!(cache.get(&key).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_ttl_is_clamped() {
        let cache = PriceCache::new();
        let key = normalize("tcs", "nse");
        cache.put(key.clone(), quote(&key), Duration::MAX);

        tokio::time::advance(MAX_TTL - Duration::from_secs(1)).await;
        assert!(cache.get(&key).is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn miss_on_unknown_key() {
        let cache = PriceCache::new();
        assert!(cache.get(&normalize("nope", "nse")).is_none());
    }

    #[test]
    fn feed_book_deduplicates() {
        let book = AlternateFeedBook::new();
        let key = normalize("infy", "nse");

        assert!(book.record(&key, "nse_dly"));
        assert!(!book.record(&key, "NSE_DLY"));
        assert_eq!(book.prefixes(&key), vec!["NSE_DLY".to_string()]);
    }

    #[test]
    fn feed_book_is_bounded() {
        let book = AlternateFeedBook::new();
        let key = normalize("infy", "nse");
        for prefix in ["A", "B", "C", "D", "E"] {
            book.record(&key, prefix);
        }

        assert_eq!(book.prefixes(&key), vec!["B", "C", "D", "E"]);
    }

    #[test]
    fn feed_book_ignores_blank_prefix() {
        let book = AlternateFeedBook::new();
        let key = normalize("infy", "nse");
        assert!(!book.record(&key, "  "));
        assert!(book.prefixes(&key).is_empty());
    }

    #[test]
    fn concurrent_writers_for_different_keys() {
        use std::sync::Arc;
        use std::thread;

        let book = Arc::new(AlternateFeedBook::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let book = Arc::clone(&book);
                thread::spawn(move || {
                    let key = normalize(&format!("SYM{i}"), "NSE");
                    book.record(&key, "ALT");
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        for i in 0..8 {
            assert_eq!(book.prefixes(&normalize(&format!("SYM{i}"), "NSE")), vec!["ALT"]);
        }
    }
}
