//! Listener Registry
//!
//! Fan-out of decoded stream events to registered callbacks.
//!
//! Price ticks go to the listeners of the tick's series first, then to the
//! all-prices wildcard listeners. A panicking listener is logged and
//! skipped; it never prevents delivery to the others.
//!
//! Dispatch runs on the stream reader task. Listeners must not block.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::application::ports::StreamEventHandler;
use crate::domain::series::SeriesKey;
use crate::domain::streaming::{ConnectionEvent, ConnectionState, PriceTick, StreamEvent};
use crate::infrastructure::metrics;

// =============================================================================
// Topics
// =============================================================================

/// What a listener is registered for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Price ticks of one series.
    Series(SeriesKey),
    /// Every price tick.
    AllPrices,
    /// Named non-price server messages.
    Message(String),
    /// Connection lifecycle events.
    Connection,
}

impl Topic {
    /// Topics an event is delivered to, in delivery order.
    fn for_event(event: &StreamEvent) -> Vec<Self> {
        match event {
            StreamEvent::Price(tick) => vec![Self::Series(tick.series_key.clone()), Self::AllPrices],
            StreamEvent::Message { kind, .. } => vec![Self::Message(kind.clone())],
            StreamEvent::Connection(_) => vec![Self::Connection],
        }
    }
}

/// Registered callback.
pub type Listener = Arc<dyn Fn(&StreamEvent) + Send + Sync>;

// =============================================================================
// Stream Status
// =============================================================================

/// Snapshot of what the registry has observed on its stream.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStatus {
    /// Connection state implied by the last lifecycle event.
    pub state: ConnectionState,
    /// Reconnect budget exhausted; waiting for an explicit connect.
    pub fatal: bool,
    /// Reconnect attempt currently scheduled, if any.
    pub reconnect_attempt: Option<u32>,
    /// Reason given for the last disconnect.
    pub last_disconnect_reason: Option<String>,
    /// Price ticks seen since creation.
    pub ticks_received: u64,
    /// Arrival time of the last tick.
    pub last_tick_at: Option<DateTime<Utc>>,
}

impl StreamStatus {
    fn observe(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::Price(_) => {
                self.ticks_received += 1;
                self.last_tick_at = Some(Utc::now());
            }
            StreamEvent::Message { .. } => {}
            StreamEvent::Connection(ConnectionEvent::Connected) => {
                self.state = ConnectionState::Open;
                self.fatal = false;
                self.reconnect_attempt = None;
            }
            StreamEvent::Connection(ConnectionEvent::Disconnected { reason }) => {
                self.state = ConnectionState::Disconnected;
                self.last_disconnect_reason = Some(reason.clone());
            }
            StreamEvent::Connection(ConnectionEvent::Reconnecting { attempt, .. }) => {
                self.state = ConnectionState::Connecting;
                self.reconnect_attempt = Some(*attempt);
            }
            StreamEvent::Connection(ConnectionEvent::Fatal { .. }) => {
                self.state = ConnectionState::Disconnected;
                self.fatal = true;
                self.reconnect_attempt = None;
            }
        }
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Thread-safe listener table. Implements [`StreamEventHandler`] so a
/// supervisor can dispatch straight into it.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<HashMap<Topic, Vec<(u64, Listener)>>>,
    next_id: AtomicU64,
    status: RwLock<StreamStatus>,
}

impl ListenerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register `listener` for `topic`.
    ///
    /// The same closure registered twice is two listeners.
    pub fn on<F>(self: &Arc<Self>, topic: Topic, listener: F) -> ListenerHandle
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .write()
            .entry(topic.clone())
            .or_default()
            .push((id, Arc::new(listener)));

        ListenerHandle {
            registry: Arc::downgrade(self),
            topic,
            id,
        }
    }

    /// Register for price ticks of one series.
    pub fn on_price<F>(self: &Arc<Self>, series_key: SeriesKey, listener: F) -> ListenerHandle
    where
        F: Fn(&PriceTick) + Send + Sync + 'static,
    {
        self.on(Topic::Series(series_key), move |event| {
            if let StreamEvent::Price(tick) = event {
                listener(tick);
            }
        })
    }

    /// Register for every price tick.
    pub fn on_all_prices<F>(self: &Arc<Self>, listener: F) -> ListenerHandle
    where
        F: Fn(&PriceTick) + Send + Sync + 'static,
    {
        self.on(Topic::AllPrices, move |event| {
            if let StreamEvent::Price(tick) = event {
                listener(tick);
            }
        })
    }

    /// Register for server messages of type `kind`.
    pub fn on_message<F>(self: &Arc<Self>, kind: impl Into<String>, listener: F) -> ListenerHandle
    where
        F: Fn(&serde_json::Value) + Send + Sync + 'static,
    {
        self.on(Topic::Message(kind.into()), move |event| {
            if let StreamEvent::Message { data, .. } = event {
                listener(data);
            }
        })
    }

    /// Register for connection lifecycle events.
    pub fn on_connection<F>(self: &Arc<Self>, listener: F) -> ListenerHandle
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.on(Topic::Connection, move |event| {
            if let StreamEvent::Connection(connection) = event {
                listener(connection);
            }
        })
    }

    /// Remove one listener. Returns whether it was registered.
    pub fn unregister(&self, topic: &Topic, id: u64) -> bool {
        let mut listeners = self.listeners.write();
        let Some(entries) = listeners.get_mut(topic) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            listeners.remove(topic);
        }
        removed
    }

    /// Number of listeners registered for `topic`.
    #[must_use]
    pub fn listener_count(&self, topic: &Topic) -> usize {
        self.listeners.read().get(topic).map_or(0, Vec::len)
    }

    /// Deliver `event` to every matching listener.
    ///
    /// Returns the number of listeners that returned normally.
    pub fn publish(&self, event: &StreamEvent) -> usize {
        self.status.write().observe(event);

        // Snapshot so listeners may register or unregister during dispatch
        let targets: Vec<Listener> = {
            let listeners = self.listeners.read();
            Topic::for_event(event)
                .iter()
                .filter_map(|topic| listeners.get(topic))
                .flatten()
                .map(|(_, listener)| Arc::clone(listener))
                .collect()
        };

        targets
            .iter()
            .filter(|listener| {
                let delivered = catch_unwind(AssertUnwindSafe(|| listener(event))).is_ok();
                if !delivered {
                    tracing::warn!(event = ?event, "Stream listener panicked");
                    metrics::record_listener_panic();
                }
                delivered
            })
            .count()
    }

    /// What the registry has observed so far.
    #[must_use]
    pub fn status(&self) -> StreamStatus {
        self.status.read().clone()
    }
}

impl StreamEventHandler for ListenerRegistry {
    fn handle(&self, event: &StreamEvent) {
        self.publish(event);
    }
}

// =============================================================================
// Listener Handle
// =============================================================================

/// Unregisters one listener. Dropping the handle leaves it registered.
#[derive(Debug)]
pub struct ListenerHandle {
    registry: Weak<ListenerRegistry>,
    topic: Topic,
    id: u64,
}

impl ListenerHandle {
    /// Topic the listener is registered for.
    #[must_use]
    pub const fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Remove the listener. Returns whether it was still registered.
    pub fn unregister(self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.unregister(&self.topic, self.id))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use rust_decimal_macros::dec;

    use super::*;

    fn tick(key: &str) -> StreamEvent {
        let series_key = SeriesKey::parse(key);
        StreamEvent::Price(PriceTick {
            symbol: series_key.symbol().to_string(),
            exchange: series_key.exchange().unwrap_or_default().to_string(),
            series_key,
            price: dec!(101.5),
            ts: Utc::now(),
        })
    }

    type Log = Arc<Mutex<Vec<&'static str>>>;

    fn record(log: &Log, name: &'static str) -> impl Fn(&PriceTick) + Send + Sync + 'static {
        let log = Arc::clone(log);
        move |_| log.lock().unwrap().push(name)
    }

    #[test]
    fn series_listeners_run_before_wildcard() {
        let registry = ListenerRegistry::new();
        let log = Log::default();

        registry.on_all_prices(record(&log, "all"));
        registry.on_price(SeriesKey::parse("NSE:TCS"), record(&log, "series"));

        let delivered = registry.publish(&tick("NSE:TCS"));

        assert_eq!(delivered, 2);
        assert_eq!(*log.lock().unwrap(), vec!["series", "all"]);
    }

    #[test]
    fn other_series_are_not_delivered() {
        let registry = ListenerRegistry::new();
        let log = Log::default();
        registry.on_price(SeriesKey::parse("NSE:INFY"), record(&log, "infy"));

        assert_eq!(registry.publish(&tick("NSE:TCS")), 0);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn panicking_listener_does_not_stop_dispatch() {
        let registry = ListenerRegistry::new();
        let log = Log::default();

        registry.on_price(SeriesKey::parse("NSE:TCS"), |_| panic!("listener bug"));
        registry.on_price(SeriesKey::parse("NSE:TCS"), record(&log, "after"));
        registry.on_all_prices(record(&log, "all"));

        let delivered = registry.publish(&tick("NSE:TCS"));

        assert_eq!(delivered, 2);
        assert_eq!(*log.lock().unwrap(), vec!["after", "all"]);
    }

    #[test]
    fn unregister_removes_only_that_listener() {
        let registry = ListenerRegistry::new();
        let key = SeriesKey::parse("NSE:TCS");

        let first = registry.on_price(key.clone(), |_| {});
        let _second = registry.on_price(key.clone(), |_| {});
        assert_eq!(registry.listener_count(&Topic::Series(key.clone())), 2);

        assert!(first.unregister());
        assert_eq!(registry.listener_count(&Topic::Series(key)), 1);
    }

    #[test]
    fn unregister_after_registry_dropped_is_false() {
        let registry = ListenerRegistry::new();
        let handle = registry.on_all_prices(|_| {});
        drop(registry);

        assert!(!handle.unregister());
    }

    #[test]
    fn listener_may_unregister_during_dispatch() {
        let registry = ListenerRegistry::new();
        let slot: Arc<Mutex<Option<ListenerHandle>>> = Arc::new(Mutex::new(None));
        let inner_slot = Arc::clone(&slot);

        let handle = registry.on_all_prices(move |_| {
            if let Some(handle) = inner_slot.lock().unwrap().take() {
                handle.unregister();
            }
        });
        *slot.lock().unwrap() = Some(handle);

        assert_eq!(registry.publish(&tick("NSE:TCS")), 1);
        assert_eq!(registry.listener_count(&Topic::AllPrices), 0);
    }

    #[test]
    fn messages_route_by_kind() {
        let registry = ListenerRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        registry.on_message("error", move |data| sink.lock().unwrap().push(data.clone()));

        registry.publish(&StreamEvent::Message {
            kind: "error".to_string(),
            data: serde_json::json!({ "code": "not_found" }),
        });
        registry.publish(&StreamEvent::Message {
            kind: "info".to_string(),
            data: serde_json::json!({}),
        });

        assert_eq!(*seen.lock().unwrap(), vec![serde_json::json!({ "code": "not_found" })]);
    }

    #[test]
    fn status_tracks_lifecycle() {
        let registry = ListenerRegistry::new();

        registry.handle(&StreamEvent::Connection(ConnectionEvent::Connected));
        registry.handle(&tick("NSE:TCS"));
        assert_eq!(registry.status().state, ConnectionState::Open);
        assert_eq!(registry.status().ticks_received, 1);

        registry.handle(&StreamEvent::Connection(ConnectionEvent::Disconnected {
            reason: "idle timeout".to_string(),
        }));
        registry.handle(&StreamEvent::Connection(ConnectionEvent::Reconnecting {
            attempt: 1,
            delay: Duration::from_secs(1),
        }));
        let status = registry.status();
        assert_eq!(status.state, ConnectionState::Connecting);
        assert_eq!(status.reconnect_attempt, Some(1));
        assert_eq!(status.last_disconnect_reason.as_deref(), Some("idle timeout"));

        registry.handle(&StreamEvent::Connection(ConnectionEvent::Fatal { attempts: 3 }));
        assert!(registry.status().fatal);
    }
}
