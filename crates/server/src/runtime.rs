//! Runs the listener, the startup notice and the Socket Mode session under one cancellation token.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kunly_core::config::AppConfig;
use kunly_core::errors::ApplicationError;
use kunly_slack::listener::{EventListener, ListenerError, ListenerSession, StopReason};
use kunly_slack::{
    startup_notice, EventDispatcher, MessagePoster, Notifier, RetryPolicy, SocketModeRunner,
    SocketTransport,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct Runtime {
    pub config: AppConfig,
    pub transport: Arc<dyn SocketTransport>,
    pub poster: Arc<dyn MessagePoster>,
    pub dispatcher: EventDispatcher,
}

impl Runtime {
    /// Runs until the session ends on its own, a fatal handler error occurs or `shutdown` completes.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ApplicationError>
    where
        F: Future<Output = ()>,
    {
        let Runtime { config, transport, poster, dispatcher } = self;
        let cancel = CancellationToken::new();
        let (events_tx, events_rx) = mpsc::channel(config.socket.event_buffer);

        let session = Arc::new(ListenerSession::new(transport.clone(), events_rx, cancel.clone()));
        let listener = EventListener::new(dispatcher);
        let listener_task = {
            let session = session.clone();
            tokio::spawn(async move {
                let outcome = listener.run(&session).await;
                if outcome.is_err() {
                    session.cancel();
                }
                outcome
            })
        };

        let notifier_task = spawn_startup_notice(&config, poster, cancel.clone());

        let runner = SocketModeRunner::new(transport, RetryPolicy::from(&config.socket));
        info!(
            event_name = "system.server.started",
            correlation_id = "bootstrap",
            "kunly-server started"
        );
        let session_run = runner.run(events_tx, cancel.clone());
        tokio::pin!(session_run);
        let finished_early = tokio::select! {
            result = &mut session_run => Some(result),
            _ = shutdown => None,
        };

        info!(
            event_name = "system.server.stopping",
            correlation_id = "shutdown",
            "kunly-server stopping"
        );
        session.cancel();

        let deadline =
            Instant::now() + Duration::from_secs(config.server.graceful_shutdown_secs);
        // the runner closes its transport once it observes the cancelled token
        let session_outcome = match finished_early {
            Some(result) => Some(result),
            None => match tokio::time::timeout_at(deadline, &mut session_run).await {
                Ok(result) => Some(result),
                Err(_) => {
                    warn!(
                        task = "socket",
                        "socket mode session missed the shutdown grace period; dropping it"
                    );
                    None
                }
            },
        };
        let listener_outcome = join_before(deadline, listener_task, "listener").await;
        if let Some(notifier_task) = notifier_task {
            join_before(deadline, notifier_task, "notifier").await;
        }

        match listener_outcome {
            Some(Err(ListenerError::FatalHandler { envelope_id, message })) => {
                return Err(ApplicationError::FatalHandler(format!(
                    "envelope `{envelope_id}`: {message}"
                )));
            }
            Some(Err(other)) => warn!(error = %other, "listener did not run"),
            Some(Ok(reason)) => {
                info!(reason = stop_reason_label(reason), "listener stopped");
            }
            None => {}
        }

        match session_outcome {
            Some(Err(socket_error)) => Err(ApplicationError::Connection(socket_error.to_string())),
            Some(Ok(end)) => {
                info!(reason = ?end, "socket mode session finished");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

fn stop_reason_label(reason: StopReason) -> &'static str {
    match reason {
        StopReason::Cancelled => "cancelled",
        StopReason::SourceClosed => "source_closed",
    }
}

fn spawn_startup_notice(
    config: &AppConfig,
    poster: Arc<dyn MessagePoster>,
    cancel: CancellationToken,
) -> Option<JoinHandle<()>> {
    if !config.notifier.enabled {
        info!(event_name = "system.notifier.disabled", "startup notice disabled");
        return None;
    }

    let message = startup_notice(&config.slack.channel_id, &config.notifier, Utc::now());
    let retry_policy = RetryPolicy {
        max_retries: config.notifier.max_retries,
        base_delay_ms: config.socket.base_delay_ms,
        max_delay_ms: config.socket.max_delay_ms,
    };
    let notifier = Notifier::new(poster, retry_policy);

    Some(tokio::spawn(async move {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("startup notice abandoned during shutdown");
            }
            result = notifier.send(&message) => match result {
                Ok(timestamp) => info!(
                    event_name = "system.notifier.startup_notice_sent",
                    channel = %message.channel_id,
                    timestamp = %timestamp,
                    "startup notice posted"
                ),
                Err(error) if error.is_permanent_auth() => error!(
                    event_name = "system.notifier.startup_notice_failed",
                    channel = %message.channel_id,
                    error = %error,
                    "startup notice rejected; check the bot token"
                ),
                Err(error) => warn!(
                    event_name = "system.notifier.startup_notice_failed",
                    channel = %message.channel_id,
                    error = %error,
                    "startup notice failed"
                ),
            },
        }
    }))
}

async fn join_before<T>(deadline: Instant, mut handle: JoinHandle<T>, task: &str) -> Option<T> {
    match tokio::time::timeout_at(deadline, &mut handle).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(join_error)) => {
            error!(task, error = %join_error, "background task ended abnormally");
            None
        }
        Err(_) => {
            warn!(task, "background task missed the shutdown grace period; aborting");
            handle.abort();
            None
        }
    }
}
