//! Slack Web API client: `chat.postMessage`, `auth.test` and `apps.connections.open`.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use kunly_core::config::SlackConfig;
use reqwest::{header::RETRY_AFTER, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::attachments::PostMessageBody;

const TRANSIENT_API_ERRORS: [&str; 5] =
    ["internal_error", "fatal_error", "service_unavailable", "request_timeout", "ratelimited"];

const AUTH_API_ERRORS: [&str; 7] = [
    "invalid_auth",
    "not_authed",
    "account_inactive",
    "token_revoked",
    "token_expired",
    "missing_scope",
    "not_allowed_token_type",
];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WebApiError {
    #[error("slack web api request failed: {0}")]
    Transport(String),
    #[error("slack web api rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },
    #[error("slack web api returned HTTP {status}")]
    Http { status: u16 },
    #[error("slack web api `{method}` failed: {code}")]
    Api { method: String, code: String },
    #[error("slack web api `{method}` returned an unexpected body: {detail}")]
    MalformedResponse { method: String, detail: String },
}

impl WebApiError {
    /// Network failures, rate limits and transient Slack errors are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::RateLimited { .. } => true,
            Self::Http { status } => *status >= 500,
            Self::Api { code, .. } => TRANSIENT_API_ERRORS.contains(&code.as_str()),
            Self::MalformedResponse { .. } => false,
        }
    }

    pub fn is_auth_failure(&self) -> bool {
        match self {
            Self::Api { code, .. } => AUTH_API_ERRORS.contains(&code.as_str()),
            Self::Http { status } => *status == 401 || *status == 403,
            _ => false,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after_secs: Some(secs) } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }
}

/// Platform-assigned timestamp identifying a posted message.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MessageTimestamp(String);

impl MessageTimestamp {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The send-message half of the platform client.
#[async_trait]
pub trait MessagePoster: Send + Sync {
    async fn post_message(&self, body: &PostMessageBody) -> Result<MessageTimestamp, WebApiError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthIdentity {
    pub team: String,
    pub user: String,
    pub user_id: String,
    pub bot_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiStatus {
    ok: bool,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ts: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthTestResponse {
    #[serde(default)]
    team: String,
    #[serde(default)]
    user: String,
    user_id: Option<String>,
    bot_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConnectionsOpenResponse {
    url: Option<String>,
}

#[derive(Clone)]
pub struct SlackWebClient {
    http: reqwest::Client,
    api_base_url: String,
    bot_token: SecretString,
}

impl fmt::Debug for SlackWebClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlackWebClient").field("api_base_url", &self.api_base_url).finish()
    }
}

impl SlackWebClient {
    pub fn new(api_base_url: impl Into<String>, bot_token: SecretString) -> Self {
        Self { http: reqwest::Client::new(), api_base_url: api_base_url.into(), bot_token }
    }

    pub fn from_config(config: &SlackConfig) -> Self {
        Self::new(config.api_base_url.clone(), config.bot_token.clone())
    }

    pub async fn auth_test(&self) -> Result<AuthIdentity, WebApiError> {
        let response: AuthTestResponse = call_api(
            &self.http,
            &self.api_base_url,
            "auth.test",
            &self.bot_token,
            None::<&()>,
        )
        .await?;

        let user_id = response.user_id.ok_or_else(|| WebApiError::MalformedResponse {
            method: "auth.test".to_owned(),
            detail: "missing user_id".to_owned(),
        })?;

        Ok(AuthIdentity { team: response.team, user: response.user, user_id, bot_id: response.bot_id })
    }
}

#[async_trait]
impl MessagePoster for SlackWebClient {
    async fn post_message(&self, body: &PostMessageBody) -> Result<MessageTimestamp, WebApiError> {
        let response: PostMessageResponse = call_api(
            &self.http,
            &self.api_base_url,
            "chat.postMessage",
            &self.bot_token,
            Some(body),
        )
        .await?;

        match response.ts.filter(|ts| !ts.is_empty()) {
            Some(ts) => Ok(MessageTimestamp(ts)),
            None => Err(WebApiError::MalformedResponse {
                method: "chat.postMessage".to_owned(),
                detail: "missing ts".to_owned(),
            }),
        }
    }
}

/// Calls `apps.connections.open` with the app-level token and returns the WebSocket URL.
pub(crate) async fn open_socket_url(
    http: &reqwest::Client,
    api_base_url: &str,
    app_token: &SecretString,
) -> Result<String, WebApiError> {
    let response: ConnectionsOpenResponse =
        call_api(http, api_base_url, "apps.connections.open", app_token, None::<&()>).await?;

    response.url.filter(|url| !url.is_empty()).ok_or_else(|| WebApiError::MalformedResponse {
        method: "apps.connections.open".to_owned(),
        detail: "missing url".to_owned(),
    })
}

async fn call_api<B, T>(
    http: &reqwest::Client,
    api_base_url: &str,
    method: &str,
    token: &SecretString,
    body: Option<&B>,
) -> Result<T, WebApiError>
where
    B: Serialize + ?Sized,
    T: DeserializeOwned,
{
    let url = format!("{}/{method}", api_base_url.trim_end_matches('/'));
    let mut request = http.post(&url).bearer_auth(token.expose_secret());
    if let Some(body) = body {
        request = request.json(body);
    }

    let response =
        request.send().await.map_err(|error| WebApiError::Transport(error.to_string()))?;
    let status = response.status();
    debug!(method, status = status.as_u16(), "slack web api response");

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_secs = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok());
        return Err(WebApiError::RateLimited { retry_after_secs });
    }
    if !status.is_success() {
        return Err(WebApiError::Http { status: status.as_u16() });
    }

    let value: serde_json::Value =
        response.json().await.map_err(|error| WebApiError::MalformedResponse {
            method: method.to_owned(),
            detail: error.to_string(),
        })?;
    decode_api_body(method, value)
}

fn decode_api_body<T>(method: &str, value: serde_json::Value) -> Result<T, WebApiError>
where
    T: DeserializeOwned,
{
    let status = ApiStatus::deserialize(&value).map_err(|error| {
        WebApiError::MalformedResponse { method: method.to_owned(), detail: error.to_string() }
    })?;

    if !status.ok {
        return Err(WebApiError::Api {
            method: method.to_owned(),
            code: status.error.unwrap_or_else(|| "unknown_error".to_owned()),
        });
    }

    serde_json::from_value(value).map_err(|error| WebApiError::MalformedResponse {
        method: method.to_owned(),
        detail: error.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::{decode_api_body, AuthTestResponse, PostMessageResponse, WebApiError};

    #[test]
    fn decodes_successful_post_message_body() {
        let response: PostMessageResponse = decode_api_body(
            "chat.postMessage",
            json!({"ok": true, "channel": "C123", "ts": "1730000000.000100"}),
        )
        .expect("ok body should decode");

        assert_eq!(response.ts.as_deref(), Some("1730000000.000100"));
    }

    #[test]
    fn maps_not_ok_body_to_api_error() {
        let error = decode_api_body::<PostMessageResponse>(
            "chat.postMessage",
            json!({"ok": false, "error": "channel_not_found"}),
        )
        .expect_err("not ok body should fail");

        assert_eq!(
            error,
            WebApiError::Api {
                method: "chat.postMessage".to_owned(),
                code: "channel_not_found".to_owned()
            }
        );
        assert!(!error.is_retryable());
        assert!(!error.is_auth_failure());
    }

    #[test]
    fn decodes_auth_test_identity_fields() {
        let response: AuthTestResponse = decode_api_body(
            "auth.test",
            json!({"ok": true, "team": "Kunly", "user": "kunly-bot", "user_id": "UBOT"}),
        )
        .expect("auth body should decode");

        assert_eq!(response.user_id.as_deref(), Some("UBOT"));
        assert_eq!(response.team, "Kunly");
    }

    #[test]
    fn classifies_retryable_and_permanent_failures() {
        assert!(WebApiError::Transport("connection reset".to_owned()).is_retryable());
        assert!(WebApiError::RateLimited { retry_after_secs: Some(3) }.is_retryable());
        assert!(WebApiError::Http { status: 503 }.is_retryable());
        assert!(WebApiError::Api { method: "m".to_owned(), code: "internal_error".to_owned() }
            .is_retryable());

        let auth = WebApiError::Api { method: "m".to_owned(), code: "invalid_auth".to_owned() };
        assert!(!auth.is_retryable());
        assert!(auth.is_auth_failure());
        assert!(WebApiError::Http { status: 401 }.is_auth_failure());
    }

    #[test]
    fn rate_limit_exposes_retry_after() {
        let error = WebApiError::RateLimited { retry_after_secs: Some(7) };
        assert_eq!(error.retry_after(), Some(Duration::from_secs(7)));
        assert_eq!(WebApiError::RateLimited { retry_after_secs: None }.retry_after(), None);
    }
}
