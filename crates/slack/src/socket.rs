use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::{EnvelopeKind, SocketEnvelope};
use crate::retry::RetryPolicy;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport ack failed: {0}")]
    Acknowledge(String),
    #[error("transport disconnect failed: {0}")]
    Disconnect(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SocketError {
    #[error("socket mode retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: TransportError },
}

/// The Socket Mode half of the platform client.
///
/// `next_envelope` and `acknowledge` may be called concurrently from different tasks.
/// `Ok(None)` from `next_envelope` means the source is exhausted and will not reconnect.
#[async_trait]
pub trait SocketTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    async fn next_envelope(&self) -> Result<Option<SocketEnvelope>, TransportError>;
    async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEnd {
    Cancelled,
    SourceClosed,
    ListenerGone,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PumpOutcome {
    Finished(SessionEnd),
    DisconnectRequested,
}

/// Runs the Socket Mode session: connects, pumps envelopes to the listener and reconnects.
pub struct SocketModeRunner {
    transport: Arc<dyn SocketTransport>,
    reconnect_policy: RetryPolicy,
}

impl SocketModeRunner {
    pub fn new(transport: Arc<dyn SocketTransport>, reconnect_policy: RetryPolicy) -> Self {
        Self { transport, reconnect_policy }
    }

    pub async fn run(
        &self,
        events: mpsc::Sender<SocketEnvelope>,
        cancel: CancellationToken,
    ) -> Result<SessionEnd, SocketError> {
        let mut failures: u32 = 0;

        loop {
            let mut connected = false;
            let outcome = self.connect_and_pump(failures, &events, &cancel, &mut connected).await;
            match outcome {
                Ok(PumpOutcome::Finished(end)) => {
                    self.close_quietly().await;
                    info!(
                        event_name = "system.socket.session_ended",
                        reason = ?end,
                        "socket mode session ended"
                    );
                    return Ok(end);
                }
                Ok(PumpOutcome::DisconnectRequested) => {
                    self.close_quietly().await;
                    failures = 0;
                    info!(
                        event_name = "system.socket.refresh",
                        "slack requested disconnect; reconnecting"
                    );
                }
                Err(transport_error) => {
                    self.close_quietly().await;
                    if connected {
                        // a dropped live connection starts a fresh retry budget
                        failures = 0;
                    }
                    warn!(
                        attempt = failures,
                        max_retries = self.reconnect_policy.max_retries,
                        error = %transport_error,
                        "socket mode transport failed"
                    );

                    if failures >= self.reconnect_policy.max_retries {
                        warn!(
                            max_retries = self.reconnect_policy.max_retries,
                            "socket mode retries exhausted"
                        );
                        return Err(SocketError::RetriesExhausted {
                            attempts: failures + 1,
                            last_error: transport_error,
                        });
                    }

                    let delay = self.reconnect_policy.backoff(failures);
                    failures += 1;
                    if !delay.is_zero() {
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return Ok(SessionEnd::Cancelled),
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        }
    }

    async fn connect_and_pump(
        &self,
        attempt: u32,
        events: &mpsc::Sender<SocketEnvelope>,
        cancel: &CancellationToken,
        connected: &mut bool,
    ) -> Result<PumpOutcome, TransportError> {
        if cancel.is_cancelled() {
            return Ok(PumpOutcome::Finished(SessionEnd::Cancelled));
        }

        info!(attempt, "opening socket mode transport connection");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(PumpOutcome::Finished(SessionEnd::Cancelled)),
            result = self.transport.connect() => result?,
        }
        *connected = true;
        info!(attempt, "socket mode transport connected");

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(PumpOutcome::Finished(SessionEnd::Cancelled)),
                next = self.transport.next_envelope() => next?,
            };

            let Some(envelope) = next else {
                info!(attempt, "socket mode transport stream closed");
                return Ok(PumpOutcome::Finished(SessionEnd::SourceClosed));
            };

            debug!(
                event_name = "ingress.slack.envelope_received",
                envelope_kind = envelope.kind.as_str(),
                correlation_id = envelope.envelope_id.as_deref().unwrap_or("none"),
                retry_attempt = envelope.retry_attempt.unwrap_or(0),
                "received slack envelope"
            );

            match envelope.kind {
                EnvelopeKind::Disconnect => {
                    info!(
                        reason = envelope.reason.as_deref().unwrap_or("unknown"),
                        "slack sent disconnect envelope"
                    );
                    return Ok(PumpOutcome::DisconnectRequested);
                }
                EnvelopeKind::Hello => {
                    debug!("socket mode hello received");
                }
                _ => {}
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(PumpOutcome::Finished(SessionEnd::Cancelled)),
                sent = events.send(envelope) => {
                    if sent.is_err() {
                        info!("listener dropped the envelope channel");
                        return Ok(PumpOutcome::Finished(SessionEnd::ListenerGone));
                    }
                }
            }
        }
    }

    async fn close_quietly(&self) {
        if let Err(error) = self.transport.disconnect().await {
            debug!(error = %error, "socket mode transport disconnect failed");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::Duration;

    use super::{SessionEnd, SocketError, SocketModeRunner, SocketTransport, TransportError};
    use crate::events::{EnvelopeKind, SocketEnvelope};
    use crate::retry::RetryPolicy;
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::{mpsc, Mutex};
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        state: Mutex<ScriptedState>,
    }

    #[derive(Default)]
    struct ScriptedState {
        connect_results: VecDeque<Result<(), TransportError>>,
        envelopes: VecDeque<Result<Option<SocketEnvelope>, TransportError>>,
        hold_open: bool,
        connect_attempts: usize,
        acknowledgements: Vec<String>,
        disconnect_calls: usize,
    }

    impl ScriptedTransport {
        pub(crate) fn with_script(
            connect_results: Vec<Result<(), TransportError>>,
            envelopes: Vec<Result<Option<SocketEnvelope>, TransportError>>,
        ) -> Self {
            Self {
                state: Mutex::new(ScriptedState {
                    connect_results: connect_results.into(),
                    envelopes: envelopes.into(),
                    ..ScriptedState::default()
                }),
            }
        }

        /// Keeps `next_envelope` pending once the script is drained.
        pub(crate) fn holding_open(
            envelopes: Vec<Result<Option<SocketEnvelope>, TransportError>>,
        ) -> Self {
            Self {
                state: Mutex::new(ScriptedState {
                    envelopes: envelopes.into(),
                    hold_open: true,
                    ..ScriptedState::default()
                }),
            }
        }

        pub(crate) async fn connect_attempts(&self) -> usize {
            self.state.lock().await.connect_attempts
        }

        pub(crate) async fn acknowledgements(&self) -> Vec<String> {
            self.state.lock().await.acknowledgements.clone()
        }

        pub(crate) async fn disconnect_calls(&self) -> usize {
            self.state.lock().await.disconnect_calls
        }
    }

    #[async_trait]
    impl SocketTransport for ScriptedTransport {
        async fn connect(&self) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.connect_attempts += 1;
            state.connect_results.pop_front().unwrap_or(Ok(()))
        }

        async fn next_envelope(&self) -> Result<Option<SocketEnvelope>, TransportError> {
            let (next, hold_open) = {
                let mut state = self.state.lock().await;
                (state.envelopes.pop_front(), state.hold_open)
            };
            match next {
                Some(next) => next,
                None if hold_open => std::future::pending().await,
                None => Ok(None),
            }
        }

        async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.acknowledgements.push(envelope_id.to_owned());
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.disconnect_calls += 1;
            Ok(())
        }
    }

    fn mention_envelope(envelope_id: &str) -> SocketEnvelope {
        SocketEnvelope::events_api(
            envelope_id,
            json!({
                "type": "event_callback",
                "event": {
                    "type": "app_mention",
                    "user": "U1",
                    "channel": "C123",
                    "text": "hi",
                    "ts": "1.0",
                    "event_ts": "1.0"
                }
            }),
        )
    }

    #[tokio::test]
    async fn reconnects_after_initial_connect_failure() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Err(TransportError::Connect("network down".to_owned())), Ok(())],
            vec![Ok(Some(mention_envelope("env-1"))), Ok(None)],
        ));
        let runner = SocketModeRunner::new(transport.clone(), RetryPolicy::immediate(2));
        let (tx, mut rx) = mpsc::channel(8);

        let end = runner.run(tx, CancellationToken::new()).await.expect("runner should succeed");

        assert_eq!(end, SessionEnd::SourceClosed);
        assert_eq!(transport.connect_attempts().await, 2);
        let forwarded = rx.recv().await.expect("envelope should be forwarded");
        assert_eq!(forwarded.envelope_id.as_deref(), Some("env-1"));
        assert!(rx.recv().await.is_none(), "channel closes when the runner returns");
    }

    #[tokio::test]
    async fn exhausts_retries_with_connection_error() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![
                Err(TransportError::Connect("fail-1".to_owned())),
                Err(TransportError::Connect("fail-2".to_owned())),
                Err(TransportError::Connect("fail-3".to_owned())),
            ],
            vec![],
        ));
        let runner = SocketModeRunner::new(transport.clone(), RetryPolicy::immediate(2));
        let (tx, _rx) = mpsc::channel(8);

        let error = runner.run(tx, CancellationToken::new()).await.expect_err("should fail");

        assert_eq!(
            error,
            SocketError::RetriesExhausted {
                attempts: 3,
                last_error: TransportError::Connect("fail-3".to_owned()),
            }
        );
        assert_eq!(transport.connect_attempts().await, 3);
    }

    #[tokio::test]
    async fn disconnect_envelope_triggers_reconnect_without_spending_retries() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Ok(()), Ok(())],
            vec![
                Ok(Some(SocketEnvelope::control(EnvelopeKind::Disconnect))),
                Ok(Some(mention_envelope("env-after-refresh"))),
                Ok(None),
            ],
        ));
        let runner = SocketModeRunner::new(transport.clone(), RetryPolicy::immediate(0));
        let (tx, mut rx) = mpsc::channel(8);

        let end = runner.run(tx, CancellationToken::new()).await.expect("runner should succeed");

        assert_eq!(end, SessionEnd::SourceClosed);
        assert_eq!(transport.connect_attempts().await, 2);
        let forwarded = rx.recv().await.expect("envelope after refresh");
        assert_eq!(forwarded.envelope_id.as_deref(), Some("env-after-refresh"));
    }

    #[tokio::test]
    async fn dropped_live_connection_does_not_spend_the_retry_budget() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Ok(()), Ok(()), Ok(())],
            vec![
                Err(TransportError::Receive("websocket closed".to_owned())),
                Err(TransportError::Receive("websocket closed".to_owned())),
                Ok(None),
            ],
        ));
        let runner = SocketModeRunner::new(transport.clone(), RetryPolicy::immediate(1));
        let (tx, _rx) = mpsc::channel(8);

        let end = runner.run(tx, CancellationToken::new()).await.expect("runner should succeed");

        assert_eq!(end, SessionEnd::SourceClosed);
        assert_eq!(transport.connect_attempts().await, 3);
    }

    #[tokio::test]
    async fn cancellation_stops_a_pending_session() {
        let transport = Arc::new(ScriptedTransport::holding_open(vec![]));
        let runner = SocketModeRunner::new(transport.clone(), RetryPolicy::default());
        let (tx, _rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let end = tokio::time::timeout(Duration::from_secs(2), runner.run(tx, cancel))
            .await
            .expect("runner should stop promptly")
            .expect("cancelled run is not an error");

        assert_eq!(end, SessionEnd::Cancelled);
        assert!(transport.disconnect_calls().await >= 1);
    }

    #[tokio::test]
    async fn dropped_listener_ends_the_session() {
        let transport = Arc::new(ScriptedTransport::holding_open(vec![Ok(Some(
            mention_envelope("env-1"),
        ))]));
        let runner = SocketModeRunner::new(transport, RetryPolicy::default());
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let end = runner.run(tx, CancellationToken::new()).await.expect("runner should succeed");
        assert_eq!(end, SessionEnd::ListenerGone);
    }
}
