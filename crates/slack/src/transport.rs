//! WebSocket implementation of [`SocketTransport`] backed by `tokio-tungstenite`.

use std::fmt;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use kunly_core::config::SlackConfig;
use secrecy::SecretString;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::events::SocketEnvelope;
use crate::socket::{SocketTransport, TransportError};
use crate::web::open_socket_url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Serialize)]
struct Ack<'a> {
    envelope_id: &'a str,
}

/// Holds the read and write halves separately so acks never wait on a pending read.
pub struct SlackSocketTransport {
    http: reqwest::Client,
    api_base_url: String,
    app_token: SecretString,
    writer: Mutex<Option<SplitSink<WsStream, Message>>>,
    reader: Mutex<Option<SplitStream<WsStream>>>,
}

impl fmt::Debug for SlackSocketTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlackSocketTransport").field("api_base_url", &self.api_base_url).finish()
    }
}

impl SlackSocketTransport {
    pub fn new(api_base_url: impl Into<String>, app_token: SecretString) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base_url: api_base_url.into(),
            app_token,
            writer: Mutex::new(None),
            reader: Mutex::new(None),
        }
    }

    pub fn from_config(config: &SlackConfig) -> Self {
        Self::new(config.api_base_url.clone(), config.app_token.clone())
    }

    async fn send(&self, message: Message) -> Result<(), String> {
        let mut writer = self.writer.lock().await;
        let sink = writer.as_mut().ok_or_else(|| "transport is not connected".to_owned())?;
        sink.send(message).await.map_err(|error| error.to_string())
    }
}

#[async_trait]
impl SocketTransport for SlackSocketTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let url = open_socket_url(&self.http, &self.api_base_url, &self.app_token)
            .await
            .map_err(|error| TransportError::Connect(error.to_string()))?;

        let (stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|error| TransportError::Connect(error.to_string()))?;
        let (write, read) = stream.split();

        *self.writer.lock().await = Some(write);
        *self.reader.lock().await = Some(read);
        Ok(())
    }

    async fn next_envelope(&self) -> Result<Option<SocketEnvelope>, TransportError> {
        let mut reader = self.reader.lock().await;
        let stream = reader
            .as_mut()
            .ok_or_else(|| TransportError::Receive("transport is not connected".to_owned()))?;

        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => match SocketEnvelope::from_json(&text) {
                    Ok(envelope) => return Ok(Some(envelope)),
                    Err(error) => {
                        warn!(error = %error, "discarding unparseable socket mode frame");
                    }
                },
                Some(Ok(Message::Ping(data))) => {
                    if let Err(error) = self.send(Message::Pong(data)).await {
                        debug!(error = %error, "failed to answer websocket ping");
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|frame| frame.reason.to_string())
                        .filter(|reason| !reason.is_empty())
                        .unwrap_or_else(|| "no reason".to_owned());
                    return Err(TransportError::Receive(format!("websocket closed: {reason}")));
                }
                Some(Ok(_)) => {}
                Some(Err(error)) => return Err(TransportError::Receive(error.to_string())),
                None => return Err(TransportError::Receive("websocket stream ended".to_owned())),
            }
        }
    }

    async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError> {
        let ack = serde_json::to_string(&Ack { envelope_id })
            .map_err(|error| TransportError::Acknowledge(error.to_string()))?;
        self.send(Message::Text(ack.into())).await.map_err(TransportError::Acknowledge)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let writer = self.writer.lock().await.take();
        let closed = match writer {
            Some(mut sink) => {
                sink.close().await.map_err(|error| TransportError::Disconnect(error.to_string()))
            }
            None => Ok(()),
        };
        self.reader.lock().await.take();
        closed
    }
}
