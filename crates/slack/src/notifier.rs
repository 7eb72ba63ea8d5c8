use std::sync::Arc;
use std::time::Duration;

use kunly_core::config::is_conversation_id;
use thiserror::Error;
use tracing::{info, warn};

use crate::attachments::OutboundMessage;
use crate::retry::RetryPolicy;
use crate::web::{MessagePoster, MessageTimestamp, WebApiError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("`{0}` is not a valid slack channel id")]
    InvalidChannel(String),
    #[error("message has neither text nor attachments")]
    EmptyMessage,
    #[error(transparent)]
    Platform(#[from] WebApiError),
}

impl NotifyError {
    pub fn is_permanent_auth(&self) -> bool {
        matches!(self, Self::Platform(error) if error.is_auth_failure())
    }
}

/// Posts outbound messages, retrying failures the platform marks as transient.
pub struct Notifier {
    poster: Arc<dyn MessagePoster>,
    retry_policy: RetryPolicy,
}

impl Notifier {
    pub fn new(poster: Arc<dyn MessagePoster>, retry_policy: RetryPolicy) -> Self {
        Self { poster, retry_policy }
    }

    pub async fn send(&self, message: &OutboundMessage) -> Result<MessageTimestamp, NotifyError> {
        if !is_conversation_id(&message.channel_id) {
            return Err(NotifyError::InvalidChannel(message.channel_id.clone()));
        }
        if !message.has_content() {
            return Err(NotifyError::EmptyMessage);
        }

        let body = message.to_post_body();
        let mut attempt: u32 = 0;
        loop {
            match self.poster.post_message(&body).await {
                Ok(timestamp) => {
                    info!(
                        event_name = "egress.slack.message_sent",
                        channel = %message.channel_id,
                        timestamp = %timestamp,
                        attempt,
                        "message sent"
                    );
                    return Ok(timestamp);
                }
                Err(error) if error.is_retryable() && attempt < self.retry_policy.max_retries => {
                    let delay = self.retry_delay(&error, attempt);
                    warn!(
                        event_name = "egress.slack.message_retry",
                        channel = %message.channel_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "retryable send failure"
                    );
                    attempt += 1;
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(error) => return Err(NotifyError::Platform(error)),
            }
        }
    }

    /// `Retry-After` wins over the computed backoff but never exceeds `max_delay_ms`.
    fn retry_delay(&self, error: &WebApiError, attempt: u32) -> Duration {
        let ceiling = Duration::from_millis(self.retry_policy.max_delay_ms);
        match error.retry_after() {
            Some(hinted) => hinted.min(ceiling),
            None => self.retry_policy.backoff(attempt),
        }
    }
}
