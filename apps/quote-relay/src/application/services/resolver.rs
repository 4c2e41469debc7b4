//! Quote Resolver
//!
//! Turns a loosely specified instrument into one fresh price:
//!
//! 1. Normalize to a [`SeriesKey`] and serve from the price cache if fresh.
//! 2. Generate the candidate addresses, including learned alternate feeds.
//! 3. Try each provider in turn. Within a provider every candidate is
//!    probed concurrently, each attempt bounded by the per-attempt timeout
//!    and the overall deadline.
//! 4. The first usable price wins; every other attempt is abandoned and its
//!    channel closed.
//! 5. A permission-denied signal naming an alternate feed is learned and
//!    retried with the remaining budget.
//!
//! Every channel the resolver opens is closed, whether its attempt
//! finished, lost the race or ran out of time.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::application::ports::{ProbeSignal, ProviderAdapter, ProviderError, QuoteChannel};
use crate::domain::cache::{AlternateFeedBook, PriceCache};
use crate::domain::candidate::{Candidate, CandidateGenerator, CandidateSet};
use crate::domain::quote::{CACHE_SOURCE, PriceSnapshot, Quote, ResolvedQuote};
use crate::domain::series::{SeriesKey, normalize};
use crate::infrastructure::config::ResolverSettings;
use crate::infrastructure::metrics::{self, ProbeOutcome, ResolutionOutcome};

// =============================================================================
// Errors
// =============================================================================

/// Why a resolution failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    /// Request was malformed.
    #[error("invalid request: {0}")]
    InvalidInput(String),

    /// Every candidate was rejected before the deadline.
    #[error("no price found for {series_key}")]
    NotFound {
        /// Requested series.
        series_key: SeriesKey,
    },

    /// The deadline elapsed, or attempts timed out, without a price.
    #[error("timed out resolving {series_key} after {elapsed_ms}ms")]
    Timeout {
        /// Requested series.
        series_key: SeriesKey,
        /// Time spent before giving up.
        elapsed_ms: u64,
    },

    /// No provider is configured.
    #[error("no quote providers configured")]
    NoProviders,
}

impl ResolveError {
    /// Stable machine-readable reason.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::NotFound { .. } => "not_found",
            Self::Timeout { .. } => "timeout",
            Self::NoProviders => "unavailable",
        }
    }

    const fn outcome(&self) -> ResolutionOutcome {
        match self {
            Self::InvalidInput(_) => ResolutionOutcome::InvalidInput,
            Self::NotFound { .. } => ResolutionOutcome::NotFound,
            Self::Timeout { .. } => ResolutionOutcome::Timeout,
            Self::NoProviders => ResolutionOutcome::Unavailable,
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Ceiling on any deadline or attempt timeout, whatever the configuration says.
const MAX_BUDGET: Duration = Duration::from_secs(24 * 60 * 60);

/// Resolver timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverConfig {
    /// Deadline used when the caller gives none.
    pub default_deadline: Duration,
    /// Caller deadlines are clamped to this.
    pub max_deadline: Duration,
    /// Upper bound on one candidate attempt.
    pub attempt_timeout: Duration,
    /// How long resolved quotes are served from cache.
    pub cache_ttl: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self::from(&ResolverSettings::default())
    }
}

impl From<&ResolverSettings> for ResolverConfig {
    fn from(settings: &ResolverSettings) -> Self {
        Self {
            default_deadline: settings.default_deadline,
            max_deadline: settings.max_deadline,
            attempt_timeout: settings.attempt_timeout,
            cache_ttl: settings.cache_ttl,
        }
    }
}

// =============================================================================
// Probing
// =============================================================================

/// Closes the channel however the attempt ends.
struct ChannelGuard(Box<dyn QuoteChannel>);

impl Drop for ChannelGuard {
    fn drop(&mut self) {
        self.0.close();
    }
}

enum AttemptOutcome {
    Price(PriceSnapshot),
    Redirect(Option<String>),
    NotFound,
    Failed,
    TimedOut,
}

impl AttemptOutcome {
    const fn label(&self) -> ProbeOutcome {
        match self {
            Self::Price(_) => ProbeOutcome::Price,
            Self::Redirect(_) => ProbeOutcome::Redirected,
            Self::NotFound => ProbeOutcome::NotFound,
            Self::Failed => ProbeOutcome::Error,
            Self::TimedOut => ProbeOutcome::Timeout,
        }
    }
}

enum ProviderOutcome {
    Found(Quote),
    Exhausted { timed_out: bool },
    DeadlineExpired,
}

/// Wait on one candidate until it produces a usable price or a rejection.
async fn probe(
    provider: &dyn ProviderAdapter,
    candidate: &Candidate,
) -> Result<AttemptOutcome, ProviderError> {
    let mut channel = ChannelGuard(provider.open(candidate).await?);
    loop {
        match channel.0.next_signal().await? {
            ProbeSignal::Price(snapshot) if snapshot.is_usable() => {
                return Ok(AttemptOutcome::Price(snapshot));
            }
            // Placeholder price; keep waiting
            ProbeSignal::Price(_) => {}
            ProbeSignal::PermissionDenied { alternate_feed } => {
                return Ok(AttemptOutcome::Redirect(alternate_feed));
            }
            ProbeSignal::NotFound => return Ok(AttemptOutcome::NotFound),
        }
    }
}

/// Run one bounded attempt.
async fn attempt(
    provider: &dyn ProviderAdapter,
    candidate: Candidate,
    attempt_deadline: Instant,
) -> (Candidate, AttemptOutcome) {
    let outcome = match tokio::time::timeout_at(attempt_deadline, probe(provider, &candidate)).await
    {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => {
            tracing::debug!(candidate = %candidate.address(), error = %e, "Probe failed");
            AttemptOutcome::Failed
        }
        Err(_) => AttemptOutcome::TimedOut,
    };
    metrics::record_probe(provider.id(), outcome.label());
    (candidate, outcome)
}

// =============================================================================
// Resolver
// =============================================================================

/// Resolves instruments to fresh quotes across the configured providers.
pub struct QuoteResolver {
    providers: Vec<Arc<dyn ProviderAdapter>>,
    generator: CandidateGenerator,
    cache: PriceCache,
    feeds: AlternateFeedBook,
    config: ResolverConfig,
}

impl QuoteResolver {
    /// Create a resolver. Providers are tried in the given order.
    #[must_use]
    pub fn new(
        providers: Vec<Arc<dyn ProviderAdapter>>,
        generator: CandidateGenerator,
        config: ResolverConfig,
    ) -> Self {
        Self {
            providers,
            generator,
            cache: PriceCache::new(),
            feeds: AlternateFeedBook::new(),
            config,
        }
    }

    /// Create a resolver from settings.
    #[must_use]
    pub fn from_settings(
        providers: Vec<Arc<dyn ProviderAdapter>>,
        settings: &ResolverSettings,
    ) -> Self {
        Self::new(
            providers,
            CandidateGenerator::new(&settings.home_venue, &settings.derivatives_venue),
            ResolverConfig::from(settings),
        )
    }

    /// Resolve `symbol` on `exchange` (blank for the home venue).
    ///
    /// `deadline` bounds the whole call and is clamped to the configured
    /// maximum; `None` uses the default.
    ///
    /// # Errors
    ///
    /// - [`ResolveError::InvalidInput`] for a blank symbol
    /// - [`ResolveError::NoProviders`] when no provider is configured
    /// - [`ResolveError::NotFound`] when every candidate was rejected
    /// - [`ResolveError::Timeout`] when the deadline or attempt timeouts cut
    ///   probing short
    pub async fn resolve(
        &self,
        symbol: &str,
        exchange: &str,
        deadline: Option<Duration>,
    ) -> Result<ResolvedQuote, ResolveError> {
        let span = tracing::info_span!(
            "resolve",
            request_id = %Uuid::new_v4(),
            symbol = %symbol,
            exchange = %exchange,
        );

        async {
            let started = Instant::now();
            let result = self.resolve_inner(symbol, exchange, deadline, started).await;
            let outcome = match &result {
                Ok(resolved) if resolved.cached => ResolutionOutcome::Cached,
                Ok(_) => ResolutionOutcome::Resolved,
                Err(e) => e.outcome(),
            };
            metrics::record_resolution(outcome, started.elapsed());
            result
        }
        .instrument(span)
        .await
    }

    async fn resolve_inner(
        &self,
        symbol: &str,
        exchange: &str,
        deadline: Option<Duration>,
        started: Instant,
    ) -> Result<ResolvedQuote, ResolveError> {
        if symbol.trim().is_empty() {
            return Err(ResolveError::InvalidInput("symbol is required".to_string()));
        }

        let exchange = if exchange.trim().is_empty() {
            self.generator.home_venue()
        } else {
            exchange
        };
        let series_key = normalize(symbol, exchange);

        if let Some(quote) = self.cache.get(&series_key) {
            metrics::record_cache_lookup(true);
            tracing::debug!(%series_key, "Serving cached quote");
            return Ok(ResolvedQuote {
                quote: Quote {
                    source_candidate: CACHE_SOURCE.to_string(),
                    ..quote
                },
                cached: true,
                candidates: Vec::new(),
            });
        }
        metrics::record_cache_lookup(false);

        if self.providers.is_empty() {
            return Err(ResolveError::NoProviders);
        }

        let budget = deadline
            .unwrap_or(self.config.default_deadline)
            .min(self.config.max_deadline)
            .min(MAX_BUDGET);
        let deadline_at = started + budget;

        let learned = self.feeds.prefixes(&series_key);
        let set = self.generator.generate_with_learned(symbol, exchange, &learned);
        let addresses: Vec<String> = set.candidates.iter().map(Candidate::address).collect();
        tracing::debug!(%series_key, candidates = addresses.len(), "Probing candidates");

        let mut timed_out = false;
        for provider in &self.providers {
            match self.probe_provider(provider.as_ref(), &set, deadline_at).await {
                ProviderOutcome::Found(quote) => {
                    tracing::info!(
                        %series_key,
                        provider = provider.id(),
                        source = %quote.source_candidate,
                        price = %quote.price,
                        "Quote resolved"
                    );
                    self.cache.put(series_key, quote.clone(), self.config.cache_ttl);
                    return Ok(ResolvedQuote {
                        quote,
                        cached: false,
                        candidates: addresses,
                    });
                }
                ProviderOutcome::Exhausted { timed_out: t } => timed_out |= t,
                ProviderOutcome::DeadlineExpired => {
                    timed_out = true;
                    break;
                }
            }
        }

        let elapsed = started.elapsed();
        if timed_out || Instant::now() >= deadline_at {
            tracing::warn!(%series_key, elapsed_ms = duration_ms(elapsed), "Quote resolution timed out");
            Err(ResolveError::Timeout {
                series_key,
                elapsed_ms: duration_ms(elapsed),
            })
        } else {
            tracing::info!(%series_key, "No candidate produced a price");
            Err(ResolveError::NotFound { series_key })
        }
    }

    async fn probe_provider(
        &self,
        provider: &dyn ProviderAdapter,
        set: &CandidateSet,
        deadline_at: Instant,
    ) -> ProviderOutcome {
        let attempt_timeout = self.config.attempt_timeout.min(MAX_BUDGET);
        let attempt_deadline = || (Instant::now() + attempt_timeout).min(deadline_at);

        // One attempt per distinct channel key, first candidate in order wins
        let mut tried: HashSet<String> = HashSet::new();
        let mut attempts: FuturesUnordered<_> = set
            .candidates
            .iter()
            .filter(|candidate| tried.insert(provider.channel_key(candidate)))
            .map(|candidate| attempt(provider, candidate.clone(), attempt_deadline()))
            .collect();

        let mut timed_out = false;
        loop {
            // Dropping `attempts` on return abandons every attempt still running
            let next = match tokio::time::timeout_at(deadline_at, attempts.next()).await {
                Err(_) => return ProviderOutcome::DeadlineExpired,
                Ok(None) => return ProviderOutcome::Exhausted { timed_out },
                Ok(Some(next)) => next,
            };

            match next {
                (candidate, AttemptOutcome::Price(snapshot)) => {
                    return ProviderOutcome::Found(
                        snapshot.into_quote(set.series_key.clone(), candidate.address()),
                    );
                }
                (candidate, AttemptOutcome::Redirect(Some(prefix))) => {
                    let prefix = prefix.trim().to_uppercase();
                    if prefix.is_empty() {
                        continue;
                    }
                    if self.feeds.record(&set.series_key, &prefix) {
                        metrics::record_alternate_feed_learned();
                        tracing::info!(
                            series_key = %set.series_key,
                            candidate = %candidate.address(),
                            %prefix,
                            "Learned alternate feed"
                        );
                    }
                    let redirected = Candidate::combined(&prefix, &set.working_symbol);
                    if tried.insert(provider.channel_key(&redirected)) {
                        attempts.push(attempt(provider, redirected, attempt_deadline()));
                    }
                }
                (_, AttemptOutcome::TimedOut) => timed_out = true,
                (
                    _,
                    AttemptOutcome::Redirect(None) | AttemptOutcome::NotFound | AttemptOutcome::Failed,
                ) => {}
            }
        }
    }

    /// Number of fresh-or-stale entries in the price cache.
    #[must_use]
    pub fn cached_quotes(&self) -> usize {
        self.cache.len()
    }

    /// Configured providers, in probe order.
    #[must_use]
    pub fn provider_ids(&self) -> Vec<String> {
        self.providers
            .iter()
            .map(|provider| provider.id().to_string())
            .collect()
    }

    /// Alternate feed prefixes learned for `key`.
    #[must_use]
    pub fn learned_feeds(&self, key: &SeriesKey) -> Vec<String> {
        self.feeds.prefixes(key)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// =============================================================================
// Tests
// =============================================================================
