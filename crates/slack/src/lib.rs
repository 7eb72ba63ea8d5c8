//! Slack Integration - Socket Mode listener and startup notifier
//!
//! This crate provides the Slack interface for kunly:
//! - **Socket Mode** (`socket`, `transport`) - WebSocket session with reconnection logic
//! - **Events** (`events`) - Envelope narrowing and the `app_mention` dispatcher
//! - **Listener** (`listener`) - Cancellable loop that acknowledges and dispatches envelopes
//! - **Notifier** (`notifier`, `attachments`) - Outbound messages with legacy attachments
//! - **Web API** (`web`) - `chat.postMessage`, `auth.test` and `apps.connections.open`
//!
//! # Architecture
//!
//! ```text
//! SlackSocketTransport → SocketModeRunner → mpsc → EventListener → EventDispatcher → MentionHandler
//!                                                       ↓
//!                                                  envelope ack
//!
//! startup_notice → Notifier → SlackWebClient (chat.postMessage)
//! ```
//!
//! # Key Types
//!
//! - `SocketModeRunner` - Connects, forwards envelopes and reconnects with backoff
//! - `ListenerSession` - Owns the cancellation token for one listener run
//! - `EventDispatcher` - Routes narrowed events to the mention handler
//! - `Notifier` - Validates and posts an `OutboundMessage`

pub mod attachments;
pub mod events;
pub mod listener;
pub mod notifier;
pub mod retry;
pub mod socket;
pub mod transport;
pub mod web;

pub use attachments::{startup_notice, MessageBuilder, OutboundMessage};
pub use events::{
    AppMentionEvent, EventDispatcher, EventHandlerError, LoggingMentionHandler, MentionHandler,
};
pub use listener::{EventListener, ListenerError, ListenerSession, SessionState, StopReason};
pub use notifier::{NotifyError, Notifier};
pub use retry::RetryPolicy;
pub use socket::{SessionEnd, SocketError, SocketModeRunner, SocketTransport};
pub use transport::SlackSocketTransport;
pub use web::{MessagePoster, MessageTimestamp, SlackWebClient, WebApiError};
