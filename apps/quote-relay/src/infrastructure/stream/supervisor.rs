//! Streaming Connection Supervisor
//!
//! Owns the lifecycle of one persistent connection to a price-distribution
//! endpoint:
//!
//! ```text
//! Disconnected -> Connecting -> Open -> Disconnected -> (backoff) -> Connecting -> ...
//!                                 \-> Closing -> Disconnected   (disconnect())
//! ```
//!
//! - One run task per supervisor; connection attempts are strictly sequential.
//! - One reader per open connection; every inbound frame is decoded and
//!   handed to the [`StreamEventHandler`] on that reader, in order.
//! - The wire subscription set lives here and is replayed in full after
//!   every (re)connect.
//! - Application frames sent while not open are queued (bounded, oldest
//!   dropped) and flushed in order before the replay.
//! - After `max_attempts` consecutive failed reconnects the run task stops
//!   and reports [`StreamError::ConnectivityFailure`]; only an explicit
//!   [`StreamSupervisor::connect`] starts it again.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::frames::FrameCodec;
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{
    FrameSink, FrameStream, StreamConnector, StreamControl, StreamError, StreamEventHandler,
};
use crate::domain::series::{InstrumentRef, SeriesKey};
use crate::domain::streaming::{ConnectionEvent, ConnectionState, OutboundFrame, StreamEvent};
use crate::infrastructure::config::StreamSettings;
use crate::infrastructure::metrics;

// =============================================================================
// Configuration
// =============================================================================

/// Supervisor tuning.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Reconnect backoff and attempt ceiling.
    pub reconnect: ReconnectConfig,
    /// An open connection with no inbound frame for this long is dropped.
    pub idle_timeout: Duration,
    /// Maximum application frames held while not open.
    pub max_queued_frames: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            idle_timeout: Duration::from_secs(60),
            max_queued_frames: 1024,
        }
    }
}

impl SupervisorConfig {
    /// Build from stream settings.
    #[must_use]
    pub const fn from_stream_settings(settings: &StreamSettings) -> Self {
        Self {
            reconnect: ReconnectConfig::from_stream_settings(settings),
            idle_timeout: settings.idle_timeout,
            max_queued_frames: settings.max_queued_frames,
        }
    }
}

// =============================================================================
// Link Status
// =============================================================================

/// Observable supervisor status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkStatus {
    /// Current connection state.
    pub state: ConnectionState,
    /// Why the run task stopped, if it has stopped.
    pub outcome: Option<StreamError>,
}

// =============================================================================
// Internal State
// =============================================================================

#[derive(Debug, Default)]
struct Session {
    subscriptions: BTreeMap<SeriesKey, InstrumentRef>,
    pending: VecDeque<OutboundFrame>,
    live: Option<mpsc::UnboundedSender<OutboundFrame>>,
}

impl Session {
    /// Queue a frame, dropping the oldest when full. Returns frames dropped.
    fn enqueue(&mut self, frame: OutboundFrame, cap: usize) -> usize {
        self.pending.push_back(frame);
        let mut dropped = 0;
        while self.pending.len() > cap {
            self.pending.pop_front();
            dropped += 1;
        }
        dropped
    }
}

struct RunHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

struct Inner {
    endpoint: String,
    connector: Arc<dyn StreamConnector>,
    handler: Arc<dyn StreamEventHandler>,
    codec: FrameCodec,
    config: SupervisorConfig,
    status_tx: watch::Sender<LinkStatus>,
    session: Mutex<Session>,
    task: Mutex<Option<RunHandle>>,
}

/// How a pump ended.
enum PumpExit {
    Cancelled,
    Failed(String),
}

// =============================================================================
// Supervisor
// =============================================================================

/// Supervises one streaming connection. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct StreamSupervisor {
    inner: Arc<Inner>,
}

impl StreamSupervisor {
    /// Create a supervisor. Nothing connects until [`Self::connect`].
    #[must_use]
    pub fn new(
        connector: Arc<dyn StreamConnector>,
        handler: Arc<dyn StreamEventHandler>,
        config: SupervisorConfig,
    ) -> Self {
        let (status_tx, _) = watch::channel(LinkStatus::default());
        Self {
            inner: Arc::new(Inner {
                endpoint: connector.endpoint().to_string(),
                connector,
                handler,
                codec: FrameCodec::new(),
                config,
                status_tx,
                session: Mutex::new(Session::default()),
                task: Mutex::new(None),
            }),
        }
    }

    /// Endpoint this supervisor connects to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    /// Connect, or wait for the attempt already in progress.
    ///
    /// Resolves once the connection is open. Calls while `Connecting` or
    /// `Open` never start a second connection.
    ///
    /// # Errors
    ///
    /// - [`StreamError::ConnectivityFailure`] if the reconnect budget ran out
    ///   before the connection opened
    /// - [`StreamError::Closed`] if [`Self::disconnect`] was called meanwhile
    pub async fn connect(&self) -> Result<(), StreamError> {
        let mut status_rx = self.inner.status_tx.subscribe();
        self.ensure_running();

        let status = status_rx
            .wait_for(|status| status.state == ConnectionState::Open || status.outcome.is_some())
            .await
            .map_err(|_| StreamError::Closed)?;

        match &status.outcome {
            Some(error) if status.state != ConnectionState::Open => Err(error.clone()),
            _ => Ok(()),
        }
    }

    /// Close explicitly.
    ///
    /// Suppresses reconnects, clears queued frames and the subscription set,
    /// and waits for the run task to stop.
    pub async fn disconnect(&self) {
        let handle = self.inner.task.lock().take();
        {
            let mut session = self.inner.session.lock();
            session.pending.clear();
            session.subscriptions.clear();
        }

        if let Some(handle) = handle {
            self.inner.set_state(ConnectionState::Closing);
            handle.cancel.cancel();
            if let Err(e) = handle.join.await {
                tracing::warn!(endpoint = %self.inner.endpoint, error = %e, "Stream task ended abnormally");
            }
            self.inner.handler.handle(&StreamEvent::Connection(ConnectionEvent::Disconnected {
                reason: "closed by client".to_string(),
            }));
        }

        self.inner.session.lock().live = None;
        self.inner.finish(StreamError::Closed);
        tracing::info!(endpoint = %self.inner.endpoint, "Stream disconnected");
    }

    /// Add instruments to the subscription set.
    ///
    /// Only instruments not already in the set are sent, and only when the
    /// connection is open; otherwise the next replay covers them.
    pub fn subscribe(&self, instruments: &[InstrumentRef]) {
        let mut session = self.inner.session.lock();
        let added: Vec<InstrumentRef> = instruments
            .iter()
            .filter(|instrument| {
                session
                    .subscriptions
                    .insert(instrument.series_key(), (*instrument).clone())
                    .is_none()
            })
            .cloned()
            .collect();

        if !added.is_empty()
            && let Some(live) = &session.live
        {
            let _ = live.send(OutboundFrame::Subscribe(added));
        }
    }

    /// Remove instruments from the subscription set.
    pub fn unsubscribe(&self, instruments: &[InstrumentRef]) {
        let mut session = self.inner.session.lock();
        let removed: Vec<InstrumentRef> = instruments
            .iter()
            .filter_map(|instrument| session.subscriptions.remove(&instrument.series_key()))
            .collect();

        if !removed.is_empty()
            && let Some(live) = &session.live
        {
            let _ = live.send(OutboundFrame::Unsubscribe(removed));
        }
    }

    /// Send an application frame, queueing it while not open.
    ///
    /// Subscribe/unsubscribe frames update the subscription set instead.
    pub fn send(&self, frame: OutboundFrame) {
        match frame {
            OutboundFrame::Subscribe(instruments) => self.subscribe(&instruments),
            OutboundFrame::Unsubscribe(instruments) => self.unsubscribe(&instruments),
            raw @ OutboundFrame::Raw(_) => {
                let mut session = self.inner.session.lock();
                let raw = match &session.live {
                    Some(live) => match live.send(raw) {
                        Ok(()) => return,
                        Err(mpsc::error::SendError(raw)) => raw,
                    },
                    None => raw,
                };
                let dropped = session.enqueue(raw, self.inner.config.max_queued_frames);
                drop(session);
                self.inner.record_dropped(dropped);
            }
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.status_tx.borrow().state
    }

    /// Current status including the stop reason, if any.
    #[must_use]
    pub fn status(&self) -> LinkStatus {
        self.inner.status_tx.borrow().clone()
    }

    /// Observe status changes.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<LinkStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Snapshot of the subscription set, ordered by key.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<InstrumentRef> {
        self.inner.session.lock().subscriptions.values().cloned().collect()
    }

    /// Number of queued application frames.
    #[must_use]
    pub fn queued_frames(&self) -> usize {
        self.inner.session.lock().pending.len()
    }

    fn ensure_running(&self) {
        let mut task = self.inner.task.lock();
        if task.as_ref().is_some_and(|handle| !handle.join.is_finished()) {
            return;
        }

        self.inner.status_tx.send_modify(|status| {
            status.state = ConnectionState::Connecting;
            status.outcome = None;
        });
        metrics::record_stream_state(&self.inner.endpoint, ConnectionState::Connecting);

        let cancel = CancellationToken::new();
        let join = tokio::spawn(Arc::clone(&self.inner).run(cancel.clone()));
        *task = Some(RunHandle { cancel, join });
    }
}

#[async_trait]
impl StreamControl for StreamSupervisor {
    async fn connect(&self) -> Result<(), StreamError> {
        Self::connect(self).await
    }

    async fn disconnect(&self) {
        Self::disconnect(self).await;
    }

    fn subscribe(&self, instruments: &[InstrumentRef]) {
        Self::subscribe(self, instruments);
    }

    fn unsubscribe(&self, instruments: &[InstrumentRef]) {
        Self::unsubscribe(self, instruments);
    }

    fn send(&self, frame: OutboundFrame) {
        Self::send(self, frame);
    }

    fn state(&self) -> ConnectionState {
        Self::state(self)
    }
}

// =============================================================================
// Run Loop
// =============================================================================

impl Inner {
    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            self.set_state(ConnectionState::Connecting);

            let connected = tokio::select! {
                () = cancel.cancelled() => return,
                result = self.connector.connect() => result,
            };

            match connected {
                Ok((sink, stream)) => {
                    policy.reset();
                    match self.pump(sink, stream, &cancel).await {
                        PumpExit::Cancelled => return,
                        PumpExit::Failed(reason) => {
                            tracing::warn!(endpoint = %self.endpoint, %reason, "Stream connection lost");
                            self.set_state(ConnectionState::Disconnected);
                            self.handler
                                .handle(&StreamEvent::Connection(ConnectionEvent::Disconnected {
                                    reason,
                                }));
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(endpoint = %self.endpoint, error = %e, "Stream connect failed");
                    self.set_state(ConnectionState::Disconnected);
                }
            }

            let Some(delay) = policy.next_delay() else {
                let attempts = policy.attempt_count();
                tracing::error!(
                    endpoint = %self.endpoint,
                    attempts,
                    "Reconnect attempts exhausted, giving up"
                );
                self.session.lock().live = None;
                self.finish(StreamError::ConnectivityFailure { attempts });
                self.handler
                    .handle(&StreamEvent::Connection(ConnectionEvent::Fatal { attempts }));
                return;
            };

            let attempt = policy.attempt_count();
            tracing::info!(
                endpoint = %self.endpoint,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Reconnecting to price stream"
            );
            metrics::record_reconnect(&self.endpoint);
            self.handler
                .handle(&StreamEvent::Connection(ConnectionEvent::Reconnecting {
                    attempt,
                    delay,
                }));

            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Drive one open connection until it fails or is cancelled.
    async fn pump(
        &self,
        mut sink: FrameSink,
        mut stream: FrameStream,
        cancel: &CancellationToken,
    ) -> PumpExit {
        let (live_tx, mut live_rx) = mpsc::unbounded_channel();

        let (queued, replay) = {
            let mut session = self.session.lock();
            session.live = Some(live_tx);
            let queued: VecDeque<OutboundFrame> = session.pending.drain(..).collect();
            let replay: Vec<InstrumentRef> = session.subscriptions.values().cloned().collect();
            (queued, replay)
        };

        if let Err(reason) = self.flush(&mut sink, queued).await {
            return self.go_offline(&mut live_rx, reason);
        }

        if !replay.is_empty() {
            tracing::info!(
                endpoint = %self.endpoint,
                count = replay.len(),
                "Replaying subscriptions"
            );
            let frame = self.codec.encode(&OutboundFrame::Subscribe(replay));
            if let Err(e) = sink.send(frame).await {
                return self.go_offline(&mut live_rx, e.to_string());
            }
        }

        self.set_state(ConnectionState::Open);
        tracing::info!(endpoint = %self.endpoint, "Price stream open");
        self.handler
            .handle(&StreamEvent::Connection(ConnectionEvent::Connected));

        let idle_timeout = self.config.idle_timeout;
        let idle = tokio::time::sleep(idle_timeout);
        tokio::pin!(idle);

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    let _ = sink.close().await;
                    return PumpExit::Cancelled;
                }
                Some(frame) = live_rx.recv() => {
                    let text = self.codec.encode(&frame);
                    if let Err(e) = sink.send(text).await {
                        if !frame.is_subscription() {
                            self.session.lock().pending.push_front(frame);
                        }
                        return self.go_offline(&mut live_rx, e.to_string());
                    }
                }
                inbound = stream.next() => match inbound {
                    Some(Ok(text)) => {
                        idle.as_mut().reset(Instant::now() + idle_timeout);
                        self.dispatch(&text);
                    }
                    Some(Err(e)) => return self.go_offline(&mut live_rx, e.to_string()),
                    None => return self.go_offline(&mut live_rx, "stream ended".to_string()),
                },
                () = &mut idle => {
                    return self.go_offline(&mut live_rx, "idle timeout".to_string());
                }
            }
        }
    }

    /// Write queued frames in order. On failure the unsent ones go back.
    async fn flush(
        &self,
        sink: &mut FrameSink,
        mut queued: VecDeque<OutboundFrame>,
    ) -> Result<(), String> {
        if !queued.is_empty() {
            tracing::debug!(endpoint = %self.endpoint, count = queued.len(), "Flushing queued frames");
        }
        while let Some(frame) = queued.pop_front() {
            if let Err(e) = sink.send(self.codec.encode(&frame)).await {
                queued.push_front(frame);
                let mut session = self.session.lock();
                for frame in queued.into_iter().rev() {
                    session.pending.push_front(frame);
                }
                return Err(e.to_string());
            }
        }
        Ok(())
    }

    /// Detach the live channel and move unsent application frames back to
    /// the queue.
    fn go_offline(
        &self,
        live_rx: &mut mpsc::UnboundedReceiver<OutboundFrame>,
        reason: String,
    ) -> PumpExit {
        let mut session = self.session.lock();
        session.live = None;
        let mut dropped = 0;
        while let Ok(frame) = live_rx.try_recv() {
            if !frame.is_subscription() {
                dropped += session.enqueue(frame, self.config.max_queued_frames);
            }
        }
        drop(session);
        self.record_dropped(dropped);
        PumpExit::Failed(reason)
    }

    fn dispatch(&self, text: &str) {
        match self.codec.decode(text) {
            Ok(events) => {
                for event in &events {
                    if matches!(event, StreamEvent::Price(_)) {
                        metrics::record_tick(&self.endpoint);
                    }
                    self.handler.handle(event);
                }
            }
            Err(e) => {
                tracing::warn!(endpoint = %self.endpoint, error = %e, "Dropping undecodable frame");
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let changed = self.status_tx.send_if_modified(|status| {
            if status.state == state {
                return false;
            }
            status.state = state;
            true
        });
        if changed {
            tracing::debug!(endpoint = %self.endpoint, %state, "Stream state changed");
            metrics::record_stream_state(&self.endpoint, state);
        }
    }

    fn finish(&self, outcome: StreamError) {
        self.status_tx.send_modify(|status| {
            status.state = ConnectionState::Disconnected;
            status.outcome = Some(outcome);
        });
        metrics::record_stream_state(&self.endpoint, ConnectionState::Disconnected);
    }

    fn record_dropped(&self, dropped: usize) {
        if dropped > 0 {
            tracing::warn!(endpoint = %self.endpoint, dropped, "Outbound queue full, dropped oldest frames");
            metrics::record_frames_dropped(&self.endpoint, dropped);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn enqueue_drops_oldest_when_full() {
        let mut session = Session::default();

        let dropped: usize = (0..5)
            .map(|i| session.enqueue(OutboundFrame::Raw(json!({ "n": i })), 3))
            .sum();

        assert_eq!(dropped, 2);
        assert_eq!(
            session.pending.front(),
            Some(&OutboundFrame::Raw(json!({ "n": 2 })))
        );
        assert_eq!(session.pending.len(), 3);
    }

    #[test]
    fn config_from_settings() {
        let settings = StreamSettings {
            max_reconnect_attempts: 3,
            idle_timeout: Duration::from_secs(5),
            max_queued_frames: 10,
            ..StreamSettings::default()
        };

        let config = SupervisorConfig::from_stream_settings(&settings);

        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.idle_timeout, Duration::from_secs(5));
        assert_eq!(config.max_queued_frames, 10);
    }
}
