//! Stream-Backed Provider Adapter
//!
//! Probes candidates over a price-distribution stream. Opening a channel
//! registers a price listener and an error listener for the candidate's
//! series and takes one subscription reference; closing the channel undoes
//! all three.
//!
//! The feed keys everything by normalized series, so candidates differing
//! only in case or in pair-vs-combined form share a channel key and the
//! resolver opens just the first of them.
//!
//! # Error Notices
//!
//! ```json
//! {"type":"error","data":{"seriesKey":"NSE:TCS","code":"permission_denied","alternateFeed":"NSE_DLY"}}
//! {"type":"error","data":{"seriesKey":"NSE:TCSX","code":"not_found"}}
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::application::ports::{ProbeSignal, ProviderAdapter, ProviderError, QuoteChannel};
use crate::application::services::{ListenerHandle, SubscriptionMultiplexer};
use crate::domain::candidate::Candidate;
use crate::domain::quote::PriceSnapshot;
use crate::domain::series::{InstrumentRef, SeriesKey, normalize};

/// Message type of per-series error notices.
pub const ERROR_MESSAGE: &str = "error";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorNotice {
    #[serde(default)]
    series_key: Option<String>,
    #[serde(default)]
    symbol: String,
    #[serde(default)]
    exchange: String,
    code: String,
    #[serde(default)]
    alternate_feed: Option<String>,
}

impl ErrorNotice {
    fn series_key(&self) -> SeriesKey {
        self.series_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .map_or_else(|| normalize(&self.symbol, &self.exchange), SeriesKey::parse)
    }
}

/// Turn an error notice into a probe signal if it concerns `key`.
fn error_signal(data: &serde_json::Value, key: &SeriesKey) -> Option<ProbeSignal> {
    let notice = ErrorNotice::deserialize(data).ok()?;
    if notice.series_key() != *key {
        return None;
    }
    match notice.code.as_str() {
        "permission_denied" => Some(ProbeSignal::PermissionDenied {
            alternate_feed: notice.alternate_feed.filter(|feed| !feed.trim().is_empty()),
        }),
        "not_found" => Some(ProbeSignal::NotFound),
        other => {
            tracing::debug!(series_key = %key, code = other, "Ignoring unknown error code");
            None
        }
    }
}

// =============================================================================
// Adapter
// =============================================================================

/// [`ProviderAdapter`] over one stream's multiplexer.
pub struct FeedProviderAdapter {
    id: String,
    multiplexer: Arc<SubscriptionMultiplexer>,
}

impl FeedProviderAdapter {
    /// Create an adapter identified by `id` (usually the feed URL).
    #[must_use]
    pub fn new(id: impl Into<String>, multiplexer: Arc<SubscriptionMultiplexer>) -> Self {
        Self {
            id: id.into(),
            multiplexer,
        }
    }
}

#[async_trait]
impl ProviderAdapter for FeedProviderAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    /// The feed normalizes subscriptions and tags ticks with the series key,
    /// so variants of one key share one subscription.
    fn channel_key(&self, candidate: &Candidate) -> String {
        candidate.series_key().to_string()
    }

    async fn open(&self, candidate: &Candidate) -> Result<Box<dyn QuoteChannel>, ProviderError> {
        let instrument = candidate.instrument();
        if instrument.symbol.trim().is_empty() {
            return Err(ProviderError::Rejected(candidate.address()));
        }

        let listeners = self.multiplexer.listeners();
        if listeners.status().fatal {
            return Err(ProviderError::Unavailable(format!(
                "{} gave up reconnecting",
                self.id
            )));
        }
        self.multiplexer.connect().await?;

        let series_key = candidate.series_key();
        let (tx, signals) = mpsc::unbounded_channel();

        let price_tx = tx.clone();
        let price = listeners.on_price(series_key.clone(), move |tick| {
            let _ = price_tx.send(ProbeSignal::Price(PriceSnapshot::last(tick.price, tick.ts)));
        });
        let error_key = series_key.clone();
        let error = listeners.on_message(ERROR_MESSAGE, move |data| {
            if let Some(signal) = error_signal(data, &error_key) {
                let _ = tx.send(signal);
            }
        });

        self.multiplexer.subscribe(std::slice::from_ref(&instrument));
        tracing::debug!(provider = %self.id, candidate = %candidate.address(), %series_key, "Probe channel opened");

        Ok(Box::new(FeedChannel {
            signals,
            handles: vec![price, error],
            instrument,
            multiplexer: Arc::clone(&self.multiplexer),
            closed: false,
        }))
    }
}

// =============================================================================
// Channel
// =============================================================================

struct FeedChannel {
    signals: mpsc::UnboundedReceiver<ProbeSignal>,
    handles: Vec<ListenerHandle>,
    instrument: InstrumentRef,
    multiplexer: Arc<SubscriptionMultiplexer>,
    closed: bool,
}

#[async_trait]
impl QuoteChannel for FeedChannel {
    async fn next_signal(&mut self) -> Result<ProbeSignal, ProviderError> {
        self.signals.recv().await.ok_or(ProviderError::ChannelClosed)
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        for handle in self.handles.drain(..) {
            handle.unregister();
        }
        self.multiplexer
            .unsubscribe(std::slice::from_ref(&self.instrument));
    }
}

impl Drop for FeedChannel {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use serde_json::json;

    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;
    use crate::application::ports::MockStreamControl;
    use crate::application::services::{
        ListenerRegistry, QuoteResolver, ResolveError, ResolverConfig, Topic,
    };
    use crate::domain::candidate::CandidateGenerator;
    use crate::domain::streaming::{ConnectionEvent, PriceTick, StreamEvent};

    fn connected_control() -> MockStreamControl {
        let mut control = MockStreamControl::new();
        control.expect_connect().returning(|| Ok(()));
        control
    }

    fn adapter(control: MockStreamControl) -> (FeedProviderAdapter, Arc<ListenerRegistry>) {
        let registry = ListenerRegistry::new();
        let multiplexer = Arc::new(SubscriptionMultiplexer::new(
            Arc::new(control),
            Arc::clone(&registry),
        ));
        (FeedProviderAdapter::new("ws://feed", multiplexer), registry)
    }

    fn error_event(data: serde_json::Value) -> StreamEvent {
        StreamEvent::Message {
            kind: ERROR_MESSAGE.to_string(),
            data,
        }
    }

    #[tokio::test]
    async fn price_ticks_become_signals() {
        let mut control = connected_control();
        control.expect_subscribe().times(1).return_const(());
        control.expect_unsubscribe().times(1).return_const(());
        let (adapter, registry) = adapter(control);

        let mut channel = adapter.open(&Candidate::pair("TCS", "NSE")).await.unwrap();
        registry.publish(&StreamEvent::Price(PriceTick {
            series_key: SeriesKey::parse("NSE:TCS"),
            symbol: "TCS".to_string(),
            exchange: "NSE".to_string(),
            price: dec!(3900.5),
            ts: Utc::now(),
        }));

        let ProbeSignal::Price(snapshot) = channel.next_signal().await.unwrap() else {
            panic!("expected a price signal");
        };
        assert_eq!(snapshot.price, dec!(3900.5));
        channel.close();
    }

    #[tokio::test]
    async fn error_notices_are_filtered_by_series() {
        let mut control = connected_control();
        control.expect_subscribe().return_const(());
        control.expect_unsubscribe().return_const(());
        let (adapter, registry) = adapter(control);

        let mut channel = adapter.open(&Candidate::combined("NSE", "TCS")).await.unwrap();
        registry.publish(&error_event(json!({ "seriesKey": "NSE:INFY", "code": "not_found" })));
        registry.publish(&error_event(json!({
            "seriesKey": "nse:tcs",
            "code": "permission_denied",
            "alternateFeed": "NSE_DLY"
        })));

        assert_eq!(
            channel.next_signal().await.unwrap(),
            ProbeSignal::PermissionDenied {
                alternate_feed: Some("NSE_DLY".to_string())
            }
        );
    }

    #[test]
    fn not_found_without_series_key_uses_symbol_and_exchange() {
        let key = SeriesKey::parse("NSE:TCSX");

        let signal = error_signal(
            &json!({ "symbol": "tcsx", "exchange": "nse", "code": "not_found" }),
            &key,
        );

        assert_eq!(signal, Some(ProbeSignal::NotFound));
        assert_eq!(error_signal(&json!({ "code": "rate_limited", "seriesKey": "NSE:TCSX" }), &key), None);
    }

    #[tokio::test]
    async fn close_releases_listeners_and_subscription_once() {
        let mut control = connected_control();
        control.expect_subscribe().times(1).return_const(());
        control.expect_unsubscribe().times(1).return_const(());
        let (adapter, registry) = adapter(control);

        let mut channel = adapter.open(&Candidate::pair("TCS", "NSE")).await.unwrap();
        assert_eq!(registry.listener_count(&Topic::Series(SeriesKey::parse("NSE:TCS"))), 1);

        channel.close();
        channel.close();
        drop(channel);

        assert_eq!(registry.listener_count(&Topic::Series(SeriesKey::parse("NSE:TCS"))), 0);
        assert_eq!(registry.listener_count(&Topic::Message(ERROR_MESSAGE.to_string())), 0);
    }

    #[tokio::test]
    async fn fatal_stream_is_unavailable() {
        let mut control = MockStreamControl::new();
        control.expect_connect().never();
        let (adapter, registry) = adapter(control);
        registry.publish(&StreamEvent::Connection(ConnectionEvent::Fatal { attempts: 10 }));

        let result = adapter.open(&Candidate::pair("TCS", "NSE")).await;

        assert!(matches!(result, Err(ProviderError::Unavailable(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn spellings_of_one_series_share_a_single_subscription() {
        let wire = Arc::new(Mutex::new(Vec::new()));
        let mut control = connected_control();
        let log = Arc::clone(&wire);
        control
            .expect_subscribe()
            .returning(move |instruments| log.lock().extend_from_slice(instruments));
        control.expect_unsubscribe().return_const(());
        let registry = ListenerRegistry::new();
        let multiplexer = Arc::new(SubscriptionMultiplexer::new(
            Arc::new(control),
            Arc::clone(&registry),
        ));
        let adapter = FeedProviderAdapter::new("ws://feed", Arc::clone(&multiplexer));
        let resolver = QuoteResolver::new(
            vec![Arc::new(adapter) as Arc<dyn ProviderAdapter>],
            CandidateGenerator::new("NSE", "NFO"),
            ResolverConfig {
                attempt_timeout: Duration::from_millis(100),
                ..ResolverConfig::default()
            },
        );

        let pending = tokio::spawn(async move { resolver.resolve("infy", "nse", None).await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let infy = SeriesKey::parse("NSE:INFY");
        assert_eq!(multiplexer.ref_count(&infy), 1);
        assert_eq!(registry.listener_count(&Topic::Series(infy.clone())), 1);
        {
            let wire = wire.lock();
            assert_eq!(wire.len(), 2);
            assert!(wire.contains(&InstrumentRef::new("infy", "nse")));
            assert!(wire.contains(&InstrumentRef::new("NSE_DLY:INFY", "")));
        }

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(ResolveError::Timeout { .. })));
        assert_eq!(multiplexer.ref_count(&infy), 0);
        assert_eq!(registry.listener_count(&Topic::Series(infy)), 0);
        assert_eq!(registry.listener_count(&Topic::Message(ERROR_MESSAGE.to_string())), 0);
    }
}
