//! The cancellable Socket Mode listener loop.
//!
//! A [`ListenerSession`] owns the inbound envelope channel, the cancellation token and the
//! acknowledger. [`EventListener::run`] drains the channel until the token fires or the
//! channel closes, acknowledging and dispatching every `events_api` envelope it can narrow.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::events::{
    narrow_events_api, DispatchError, EnvelopeKind, EventContext, EventDispatcher,
    SocketEnvelope,
};
use crate::socket::SocketTransport;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Running,
    CancelRequested,
    Stopped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    SourceClosed,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ListenerError {
    #[error("listener session is already running")]
    AlreadyStarted,
    #[error("listener session has already stopped")]
    SessionStopped,
    #[error("fatal handler error for envelope `{envelope_id}`: {message}")]
    FatalHandler { envelope_id: String, message: String },
}

pub struct ListenerSession {
    cancel: CancellationToken,
    acknowledger: Arc<dyn SocketTransport>,
    state: Mutex<SessionState>,
    events: Mutex<Option<mpsc::Receiver<SocketEnvelope>>>,
}

impl ListenerSession {
    pub fn new(
        acknowledger: Arc<dyn SocketTransport>,
        events: mpsc::Receiver<SocketEnvelope>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            cancel,
            acknowledger,
            state: Mutex::new(SessionState::Created),
            events: Mutex::new(Some(events)),
        }
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Requests cancellation. Safe to call any number of times.
    pub fn cancel(&self) {
        {
            let mut state = lock(&self.state);
            if *state == SessionState::Running {
                *state = SessionState::CancelRequested;
            }
        }
        self.cancel.cancel();
    }

    fn begin(&self) -> Result<mpsc::Receiver<SocketEnvelope>, ListenerError> {
        let mut state = lock(&self.state);
        match *state {
            SessionState::Created => {}
            SessionState::Running | SessionState::CancelRequested => {
                return Err(ListenerError::AlreadyStarted)
            }
            SessionState::Stopped => return Err(ListenerError::SessionStopped),
        }

        let events = lock(&self.events).take().ok_or(ListenerError::AlreadyStarted)?;
        *state = SessionState::Running;
        Ok(events)
    }

    fn finish(&self) {
        *lock(&self.state) = SessionState::Stopped;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
pub struct ListenerStats {
    received: AtomicU64,
    acknowledged: AtomicU64,
    dispatched: AtomicU64,
    narrowing_failures: AtomicU64,
    unsupported: AtomicU64,
    handler_errors: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ListenerStatsSnapshot {
    pub received: u64,
    pub acknowledged: u64,
    pub dispatched: u64,
    pub narrowing_failures: u64,
    pub unsupported: u64,
    pub handler_errors: u64,
}

impl ListenerStats {
    pub fn snapshot(&self) -> ListenerStatsSnapshot {
        ListenerStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            acknowledged: self.acknowledged.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            narrowing_failures: self.narrowing_failures.load(Ordering::Relaxed),
            unsupported: self.unsupported.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct EventListener {
    dispatcher: EventDispatcher,
    stats: Arc<ListenerStats>,
}

impl Default for EventListener {
    fn default() -> Self {
        Self::new(EventDispatcher::default())
    }
}

impl EventListener {
    pub fn new(dispatcher: EventDispatcher) -> Self {
        Self { dispatcher, stats: Arc::new(ListenerStats::default()) }
    }

    pub fn stats(&self) -> Arc<ListenerStats> {
        self.stats.clone()
    }

    pub async fn run(&self, session: &ListenerSession) -> Result<StopReason, ListenerError> {
        let mut events = session.begin()?;
        info!(event_name = "system.listener.started", "socket mode listener running");

        let outcome = loop {
            let envelope = tokio::select! {
                biased;
                _ = session.cancel.cancelled() => {
                    info!("shutting down socket mode listener");
                    break Ok(StopReason::Cancelled);
                }
                next = events.recv() => match next {
                    Some(envelope) => envelope,
                    None => {
                        info!("inbound envelope source closed");
                        break Ok(StopReason::SourceClosed);
                    }
                },
            };

            if let Err(fatal) = self.process(session, envelope).await {
                break Err(fatal);
            }
        };

        session.finish();
        let stats = self.stats.snapshot();
        info!(
            event_name = "system.listener.stopped",
            received = stats.received,
            acknowledged = stats.acknowledged,
            dispatched = stats.dispatched,
            narrowing_failures = stats.narrowing_failures,
            unsupported = stats.unsupported,
            handler_errors = stats.handler_errors,
            "socket mode listener stopped"
        );
        outcome
    }

    async fn process(
        &self,
        session: &ListenerSession,
        envelope: SocketEnvelope,
    ) -> Result<(), ListenerError> {
        ListenerStats::bump(&self.stats.received);

        if envelope.kind != EnvelopeKind::EventsApi {
            debug!(envelope_kind = envelope.kind.as_str(), "ignoring non events_api envelope");
            return Ok(());
        }

        let envelope_id = envelope.envelope_id.clone().unwrap_or_default();
        let event = match narrow_events_api(&envelope.payload) {
            Ok(event) => event,
            Err(narrow_error) => {
                ListenerStats::bump(&self.stats.narrowing_failures);
                warn!(
                    event_name = "ingress.slack.narrowing_failed",
                    envelope_id = %envelope_id,
                    error = %narrow_error,
                    "could not narrow events_api payload; skipping envelope"
                );
                return Ok(());
            }
        };

        if envelope_id.is_empty() {
            warn!("events_api envelope has no envelope_id; cannot acknowledge");
        } else if let Err(ack_error) = session.acknowledger.acknowledge(&envelope_id).await {
            warn!(
                event_name = "ingress.slack.ack_failed",
                envelope_id = %envelope_id,
                correlation_id = %envelope_id,
                error = %ack_error,
                "failed to acknowledge slack envelope"
            );
        } else {
            ListenerStats::bump(&self.stats.acknowledged);
            debug!(
                event_name = "ingress.slack.ack_sent",
                envelope_id = %envelope_id,
                correlation_id = %envelope_id,
                "acknowledged slack envelope"
            );
        }

        let context = EventContext {
            correlation_id: envelope_id.clone(),
            retry_attempt: envelope.retry_attempt.unwrap_or(0),
        };
        match self.dispatcher.dispatch(&event, &context).await {
            Ok(result) => {
                ListenerStats::bump(&self.stats.dispatched);
                debug!(
                    envelope_id = %envelope_id,
                    result = ?result,
                    "event dispatched"
                );
                Ok(())
            }
            Err(DispatchError::UnsupportedEventType(event_type)) => {
                ListenerStats::bump(&self.stats.unsupported);
                warn!(
                    envelope_id = %envelope_id,
                    event_type = %event_type,
                    "unsupported event type; continuing socket loop"
                );
                Ok(())
            }
            Err(DispatchError::Handler(handler_error)) if handler_error.is_fatal() => {
                ListenerStats::bump(&self.stats.handler_errors);
                error!(
                    envelope_id = %envelope_id,
                    error = %handler_error,
                    "fatal handler error; stopping listener"
                );
                Err(ListenerError::FatalHandler {
                    envelope_id,
                    message: handler_error.to_string(),
                })
            }
            Err(DispatchError::Handler(handler_error)) => {
                ListenerStats::bump(&self.stats.handler_errors);
                error!(
                    envelope_id = %envelope_id,
                    error = %handler_error,
                    "event handler failed; continuing socket loop"
                );
                Ok(())
            }
        }
    }
}
