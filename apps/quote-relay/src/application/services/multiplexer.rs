//! Subscription Multiplexer
//!
//! Lets many independent consumers share one streaming connection. Each
//! consumer subscribes and unsubscribes on its own; only the first
//! subscribe and the last unsubscribe of a series reach the wire.
//!
//! A refcount transition and the control call it triggers happen under one
//! lock, so a last release and a fresh acquire of the same series reach the
//! stream in the order their counts changed. `StreamControl` implementations
//! must not call back into the multiplexer from `subscribe`/`unsubscribe`.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::application::ports::{StreamControl, StreamError};
use crate::application::services::listeners::{ListenerHandle, ListenerRegistry, Topic};
use crate::domain::series::{InstrumentRef, SeriesKey};
use crate::domain::streaming::{ConnectionState, OutboundFrame, StreamEvent};
use crate::domain::subscription::{SubscriptionManager, SubscriptionStats};
use crate::infrastructure::metrics;

/// Ref-counted subscription front end for one stream.
pub struct SubscriptionMultiplexer {
    control: Arc<dyn StreamControl>,
    listeners: Arc<ListenerRegistry>,
    subscriptions: SubscriptionManager,
    /// Held across a refcount change and its control call.
    wire: Mutex<()>,
}

impl SubscriptionMultiplexer {
    /// Create a multiplexer over `control`.
    ///
    /// `listeners` should be the registry `control` dispatches into.
    #[must_use]
    pub fn new(control: Arc<dyn StreamControl>, listeners: Arc<ListenerRegistry>) -> Self {
        Self {
            control,
            listeners,
            subscriptions: SubscriptionManager::new(),
            wire: Mutex::new(()),
        }
    }

    /// Connect the underlying stream, or join the attempt in progress.
    ///
    /// # Errors
    ///
    /// Whatever the stream reports when it cannot open.
    pub async fn connect(&self) -> Result<(), StreamError> {
        self.control.connect().await
    }

    /// Close the stream and forget every registration.
    pub async fn disconnect(&self) {
        let released = {
            let _wire = self.wire.lock();
            self.subscriptions.clear()
        };
        tracing::debug!(released = released.len(), "Dropping all subscriptions");
        metrics::set_subscriptions(0);
        self.control.disconnect().await;
    }

    /// Register interest in `instruments`.
    ///
    /// Returns the accepted keys; blank symbols are skipped.
    pub fn subscribe(&self, instruments: &[InstrumentRef]) -> Vec<SeriesKey> {
        let changes = {
            let _wire = self.wire.lock();
            let changes = self.subscriptions.acquire(instruments);
            if !changes.subscribe.is_empty() {
                self.control.subscribe(&changes.subscribe);
            }
            changes
        };
        self.update_gauge();
        changes.accepted
    }

    /// Release interest in `instruments`. Unknown keys are ignored.
    pub fn unsubscribe(&self, instruments: &[InstrumentRef]) -> Vec<SeriesKey> {
        let changes = {
            let _wire = self.wire.lock();
            let changes = self.subscriptions.release(instruments);
            if !changes.unsubscribe.is_empty() {
                self.control.unsubscribe(&changes.unsubscribe);
            }
            changes
        };
        self.update_gauge();
        changes.accepted
    }

    /// Register a listener; see [`ListenerRegistry::on`].
    pub fn on<F>(&self, topic: Topic, listener: F) -> ListenerHandle
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        self.listeners.on(topic, listener)
    }

    /// The listener registry events are dispatched into.
    #[must_use]
    pub const fn listeners(&self) -> &Arc<ListenerRegistry> {
        &self.listeners
    }

    /// Send an application frame through the stream.
    pub fn send(&self, frame: OutboundFrame) {
        self.control.send(frame);
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.control.state()
    }

    /// Registrations held for `key`.
    #[must_use]
    pub fn ref_count(&self, key: &SeriesKey) -> usize {
        self.subscriptions.ref_count(key)
    }

    /// Subscription counts.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        self.subscriptions.stats()
    }

    fn update_gauge(&self) {
        metrics::set_subscriptions(self.subscriptions.stats().series_count);
    }
}

#[cfg(test)]
mod tests {
    use mockall::predicate::always;

    use super::*;
    use crate::application::ports::MockStreamControl;

    fn multiplexer(control: MockStreamControl) -> SubscriptionMultiplexer {
        SubscriptionMultiplexer::new(Arc::new(control), ListenerRegistry::new())
    }

    #[test]
    fn only_first_subscribe_reaches_the_wire() {
        let mut control = MockStreamControl::new();
        control
            .expect_subscribe()
            .withf(|instruments| instruments.len() == 1 && instruments[0].symbol == "TCS")
            .times(1)
            .return_const(());

        let mux = multiplexer(control);
        let tcs = InstrumentRef::new("TCS", "NSE");

        assert_eq!(mux.subscribe(&[tcs.clone()]), vec![SeriesKey::parse("NSE:TCS")]);
        mux.subscribe(&[tcs]);

        assert_eq!(mux.ref_count(&SeriesKey::parse("NSE:TCS")), 2);
    }

    #[test]
    fn only_last_unsubscribe_reaches_the_wire() {
        let mut control = MockStreamControl::new();
        control.expect_subscribe().times(1).return_const(());
        control
            .expect_unsubscribe()
            .withf(|instruments| instruments.len() == 1 && instruments[0].symbol == "TCS")
            .times(1)
            .return_const(());

        let mux = multiplexer(control);
        let tcs = InstrumentRef::new("TCS", "NSE");

        mux.subscribe(&[tcs.clone()]);
        mux.subscribe(&[tcs.clone()]);
        mux.unsubscribe(&[tcs.clone()]);
        assert_eq!(mux.ref_count(&tcs.series_key()), 1);

        mux.unsubscribe(&[tcs.clone()]);
        assert_eq!(mux.ref_count(&tcs.series_key()), 0);
    }

    #[test]
    fn unknown_unsubscribe_is_ignored() {
        let mut control = MockStreamControl::new();
        control.expect_unsubscribe().never();

        let mux = multiplexer(control);

        assert!(mux.unsubscribe(&[InstrumentRef::new("INFY", "NSE")]).is_empty());
    }

    #[test]
    fn blank_symbols_are_skipped() {
        let mut control = MockStreamControl::new();
        control.expect_subscribe().never();

        let mux = multiplexer(control);

        assert!(mux.subscribe(&[InstrumentRef::new("  ", "NSE")]).is_empty());
        assert_eq!(mux.stats().series_count, 0);
    }

    #[tokio::test]
    async fn disconnect_clears_registrations() {
        let mut control = MockStreamControl::new();
        control.expect_subscribe().times(1).return_const(());
        control.expect_disconnect().times(1).return_const(());

        let mux = multiplexer(control);
        let tcs = InstrumentRef::new("TCS", "NSE");
        mux.subscribe(&[tcs.clone()]);

        mux.disconnect().await;

        assert_eq!(mux.ref_count(&tcs.series_key()), 0);
    }

    #[tokio::test]
    async fn connect_forwards_stream_errors() {
        let mut control = MockStreamControl::new();
        control
            .expect_connect()
            .times(1)
            .returning(|| Err(StreamError::ConnectivityFailure { attempts: 3 }));

        let mux = multiplexer(control);

        assert_eq!(
            mux.connect().await,
            Err(StreamError::ConnectivityFailure { attempts: 3 })
        );
    }

    #[test]
    fn send_and_state_delegate() {
        let mut control = MockStreamControl::new();
        control.expect_send().with(always()).times(1).return_const(());
        control.expect_state().return_const(ConnectionState::Open);

        let mux = multiplexer(control);
        mux.send(OutboundFrame::Raw(serde_json::json!({ "type": "ping" })));

        assert_eq!(mux.state(), ConnectionState::Open);
    }
}
