use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::info;

/// One frame received over the Socket Mode connection.
#[derive(Clone, Debug, PartialEq)]
pub struct SocketEnvelope {
    pub kind: EnvelopeKind,
    pub envelope_id: Option<String>,
    pub payload: Value,
    pub retry_attempt: Option<u32>,
    pub retry_reason: Option<String>,
    pub reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    Hello,
    Disconnect,
    EventsApi,
    SlashCommands,
    Interactive,
    Other(String),
}

impl EnvelopeKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Hello => "hello",
            Self::Disconnect => "disconnect",
            Self::EventsApi => "events_api",
            Self::SlashCommands => "slash_commands",
            Self::Interactive => "interactive",
            Self::Other(kind) => kind,
        }
    }
}

impl From<&str> for EnvelopeKind {
    fn from(value: &str) -> Self {
        match value {
            "hello" => Self::Hello,
            "disconnect" => Self::Disconnect,
            "events_api" => Self::EventsApi,
            "slash_commands" => Self::SlashCommands,
            "interactive" => Self::Interactive,
            other => Self::Other(other.to_owned()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    envelope_id: Option<String>,
    #[serde(default)]
    payload: Value,
    retry_attempt: Option<u32>,
    retry_reason: Option<String>,
    reason: Option<String>,
}

impl SocketEnvelope {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        let raw: RawEnvelope = serde_json::from_str(text)?;
        Ok(Self {
            kind: EnvelopeKind::from(raw.kind.as_str()),
            envelope_id: raw.envelope_id,
            payload: raw.payload,
            retry_attempt: raw.retry_attempt,
            retry_reason: raw.retry_reason.filter(|reason| !reason.is_empty()),
            reason: raw.reason,
        })
    }

    pub fn events_api(envelope_id: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: EnvelopeKind::EventsApi,
            envelope_id: Some(envelope_id.into()),
            payload,
            retry_attempt: None,
            retry_reason: None,
            reason: None,
        }
    }

    pub fn control(kind: EnvelopeKind) -> Self {
        Self {
            kind,
            envelope_id: None,
            payload: Value::Null,
            retry_attempt: None,
            retry_reason: None,
            reason: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventsApiType {
    CallbackEvent,
    UrlVerification,
    AppRateLimited,
    Other(String),
}

impl EventsApiType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::CallbackEvent => "event_callback",
            Self::UrlVerification => "url_verification",
            Self::AppRateLimited => "app_rate_limited",
            Self::Other(kind) => kind,
        }
    }
}

impl From<&str> for EventsApiType {
    fn from(value: &str) -> Self {
        match value {
            "event_callback" => Self::CallbackEvent,
            "url_verification" => Self::UrlVerification,
            "app_rate_limited" => Self::AppRateLimited,
            other => Self::Other(other.to_owned()),
        }
    }
}

/// Structured form of an `events_api` envelope payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventsApiEvent {
    pub outer_type: EventsApiType,
    pub team_id: Option<String>,
    pub api_app_id: Option<String>,
    pub event_id: Option<String>,
    pub event_time: Option<i64>,
    pub inner: Option<InnerEvent>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InnerEvent {
    AppMention(AppMentionEvent),
    Other { event_type: String },
}

impl InnerEvent {
    pub fn event_type(&self) -> &str {
        match self {
            Self::AppMention(_) => "app_mention",
            Self::Other { event_type } => event_type,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppMentionEvent {
    pub user: String,
    pub channel: String,
    pub text: String,
    pub ts: String,
    pub event_ts: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_id: Option<String>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NarrowError {
    #[error("payload is not an events api object: {0}")]
    Shape(String),
    #[error("event_callback payload has no inner event")]
    MissingInnerEvent,
    #[error("inner event has no `type` tag")]
    MissingInnerType,
    #[error("inner `{event_type}` event has unexpected shape: {reason}")]
    InnerShape { event_type: String, reason: String },
}

#[derive(Debug, Deserialize)]
struct RawEventsApi {
    #[serde(rename = "type")]
    event_type: String,
    team_id: Option<String>,
    api_app_id: Option<String>,
    event_id: Option<String>,
    event_time: Option<i64>,
    event: Option<Value>,
}

/// Narrows an `events_api` payload to its structured form.
pub fn narrow_events_api(payload: &Value) -> Result<EventsApiEvent, NarrowError> {
    let raw = RawEventsApi::deserialize(payload)
        .map_err(|error| NarrowError::Shape(error.to_string()))?;
    let outer_type = EventsApiType::from(raw.event_type.as_str());

    let inner = match (&outer_type, raw.event) {
        (EventsApiType::CallbackEvent, None) => return Err(NarrowError::MissingInnerEvent),
        (EventsApiType::CallbackEvent, Some(event)) => Some(narrow_inner_event(event)?),
        (_, _) => None,
    };

    Ok(EventsApiEvent {
        outer_type,
        team_id: raw.team_id,
        api_app_id: raw.api_app_id,
        event_id: raw.event_id,
        event_time: raw.event_time,
        inner,
    })
}

fn narrow_inner_event(event: Value) -> Result<InnerEvent, NarrowError> {
    let event_type = event
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or(NarrowError::MissingInnerType)?;

    match event_type.as_str() {
        "app_mention" => serde_json::from_value::<AppMentionEvent>(event)
            .map(InnerEvent::AppMention)
            .map_err(|error| NarrowError::InnerShape { event_type, reason: error.to_string() }),
        _ => Ok(InnerEvent::Other { event_type }),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
    pub retry_attempt: u32,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned(), retry_attempt: 0 }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Processed,
    Ignored,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error("mention handler failure: {0}")]
    Recoverable(String),
    #[error("unrecoverable mention handler failure: {0}")]
    Fatal(String),
}

impl EventHandlerError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("unsupported event type `{0}`")]
    UnsupportedEventType(String),
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

#[async_trait]
pub trait MentionHandler: Send + Sync {
    async fn handle(
        &self,
        event: &AppMentionEvent,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

/// Records every app mention as one structured log entry.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingMentionHandler;

#[async_trait]
impl MentionHandler for LoggingMentionHandler {
    async fn handle(
        &self,
        event: &AppMentionEvent,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        info!(
            event_name = "ingress.slack.app_mention",
            correlation_id = %ctx.correlation_id,
            user = %event.user,
            channel = %event.channel,
            ts = %event.ts,
            thread_ts = event.thread_ts.as_deref().unwrap_or("none"),
            text = %event.text,
            "application mentioned"
        );
        Ok(HandlerResult::Processed)
    }
}

pub struct EventDispatcher {
    mention_handler: Arc<dyn MentionHandler>,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(LoggingMentionHandler)
    }
}

impl EventDispatcher {
    pub fn new<H>(handler: H) -> Self
    where
        H: MentionHandler + 'static,
    {
        Self { mention_handler: Arc::new(handler) }
    }

    pub fn from_shared(handler: Arc<dyn MentionHandler>) -> Self {
        Self { mention_handler: handler }
    }

    pub async fn dispatch(
        &self,
        event: &EventsApiEvent,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        match &event.outer_type {
            EventsApiType::CallbackEvent => match &event.inner {
                Some(InnerEvent::AppMention(mention)) => {
                    self.mention_handler.handle(mention, ctx).await.map_err(DispatchError::from)
                }
                Some(InnerEvent::Other { .. }) | None => Ok(HandlerResult::Ignored),
            },
            other => Err(DispatchError::UnsupportedEventType(other.as_str().to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::json;

    use super::{
        narrow_events_api, AppMentionEvent, DispatchError, EnvelopeKind, EventContext,
        EventDispatcher, EventHandlerError, EventsApiType, HandlerResult, InnerEvent,
        MentionHandler, NarrowError, SocketEnvelope,
    };

    #[derive(Default)]
    struct CountingHandler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MentionHandler for Arc<CountingHandler> {
        async fn handle(
            &self,
            _event: &AppMentionEvent,
            _ctx: &EventContext,
        ) -> Result<HandlerResult, EventHandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(HandlerResult::Processed)
        }
    }

    fn mention_payload() -> serde_json::Value {
        json!({
            "type": "event_callback",
            "team_id": "T1",
            "api_app_id": "A1",
            "event_id": "Ev1",
            "event_time": 1_730_000_000,
            "event": {
                "type": "app_mention",
                "user": "U1",
                "channel": "C123",
                "text": "<@UBOT> hello",
                "ts": "1730000000.0001",
                "event_ts": "1730000000.0001"
            }
        })
    }

    #[test]
    fn parses_events_api_envelope_frame() {
        let frame = json!({
            "envelope_id": "env-1",
            "type": "events_api",
            "payload": mention_payload(),
            "accepts_response_payload": false,
            "retry_attempt": 0,
            "retry_reason": ""
        })
        .to_string();

        let envelope = SocketEnvelope::from_json(&frame).expect("frame should parse");
        assert_eq!(envelope.kind, EnvelopeKind::EventsApi);
        assert_eq!(envelope.envelope_id.as_deref(), Some("env-1"));
        assert_eq!(envelope.retry_attempt, Some(0));
        assert_eq!(envelope.retry_reason, None);
    }

    #[test]
    fn parses_disconnect_frame_with_reason() {
        let frame = r#"{"type":"disconnect","reason":"refresh_requested","debug_info":{}}"#;
        let envelope = SocketEnvelope::from_json(frame).expect("frame should parse");

        assert_eq!(envelope.kind, EnvelopeKind::Disconnect);
        assert_eq!(envelope.reason.as_deref(), Some("refresh_requested"));
        assert!(envelope.envelope_id.is_none());
    }

    #[test]
    fn narrows_app_mention_payload() {
        let event = narrow_events_api(&mention_payload()).expect("mention should narrow");

        assert_eq!(event.outer_type, EventsApiType::CallbackEvent);
        assert_eq!(event.team_id.as_deref(), Some("T1"));
        let Some(InnerEvent::AppMention(mention)) = event.inner else {
            panic!("expected app mention inner event");
        };
        assert_eq!(mention.user, "U1");
        assert_eq!(mention.channel, "C123");
        assert_eq!(mention.thread_ts, None);
    }

    #[test]
    fn narrowing_rejects_non_object_payload() {
        let error = narrow_events_api(&json!("not an object")).expect_err("should fail");
        assert!(matches!(error, NarrowError::Shape(_)));
    }

    #[test]
    fn narrowing_rejects_callback_without_inner_event() {
        let error =
            narrow_events_api(&json!({"type": "event_callback"})).expect_err("should fail");
        assert_eq!(error, NarrowError::MissingInnerEvent);
    }

    #[test]
    fn narrowing_rejects_malformed_mention() {
        let payload = json!({
            "type": "event_callback",
            "event": { "type": "app_mention", "user": "U1" }
        });

        let error = narrow_events_api(&payload).expect_err("should fail");
        assert!(matches!(error, NarrowError::InnerShape { ref event_type, .. } if event_type == "app_mention"));
    }

    #[test]
    fn narrowing_keeps_other_inner_types() {
        let payload = json!({
            "type": "event_callback",
            "event": { "type": "reaction_added", "reaction": "eyes" }
        });

        let event = narrow_events_api(&payload).expect("should narrow");
        assert_eq!(event.inner, Some(InnerEvent::Other { event_type: "reaction_added".to_owned() }));
    }

    #[tokio::test]
    async fn dispatcher_invokes_mention_handler_once() {
        let handler = Arc::new(CountingHandler::default());
        let dispatcher = EventDispatcher::new(handler.clone());
        let event = narrow_events_api(&mention_payload()).expect("narrow");

        let result =
            dispatcher.dispatch(&event, &EventContext::default()).await.expect("dispatch");

        assert_eq!(result, HandlerResult::Processed);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dispatcher_ignores_other_callback_events() {
        let handler = Arc::new(CountingHandler::default());
        let dispatcher = EventDispatcher::new(handler.clone());
        let event = narrow_events_api(&json!({
            "type": "event_callback",
            "event": { "type": "message", "text": "hi" }
        }))
        .expect("narrow");

        let result =
            dispatcher.dispatch(&event, &EventContext::default()).await.expect("dispatch");

        assert_eq!(result, HandlerResult::Ignored);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn dispatcher_rejects_unsupported_outer_type() {
        let handler = Arc::new(CountingHandler::default());
        let dispatcher = EventDispatcher::new(handler.clone());
        let event = narrow_events_api(&json!({"type": "app_rate_limited", "team_id": "T1"}))
            .expect("narrow");

        let error = dispatcher
            .dispatch(&event, &EventContext::default())
            .await
            .expect_err("unsupported type should fail");

        assert_eq!(error, DispatchError::UnsupportedEventType("app_rate_limited".to_owned()));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn default_dispatcher_logs_and_processes_mentions() {
        let dispatcher = EventDispatcher::default();
        let event = narrow_events_api(&mention_payload()).expect("narrow");

        let result =
            dispatcher.dispatch(&event, &EventContext::default()).await.expect("dispatch");

        assert_eq!(result, HandlerResult::Processed);
    }
}
