//! Thin JSON-over-WebSocket framing shared by the client and gateway
//! listeners. One `WsConnection` wraps a single accepted socket.

use futures_util::{SinkExt, StreamExt};
use serde::{de::DeserializeOwned, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("websocket error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("malformed json payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("connection closed")]
    Closed,
}

pub struct WsConnection {
    inner: WebSocketStream<TcpStream>,
}

impl WsConnection {
    #[must_use]
    pub fn new(inner: WebSocketStream<TcpStream>) -> Self {
        Self { inner }
    }

    pub async fn send<T: Serialize>(&mut self, event: &T) -> Result<(), SessionError> {
        let payload = serde_json::to_string(event)?;
        self.inner.send(Message::Text(payload)).await?;
        Ok(())
    }

    /// Read the next text frame, skipping pings/pongs, and decode it.
    /// Returns `Err(SessionError::Closed)` once the peer hangs up.
    pub async fn recv<T: DeserializeOwned>(&mut self) -> Result<T, SessionError> {
        loop {
            match self.inner.next().await {
                Some(Ok(Message::Text(text))) => return Ok(serde_json::from_str(&text)?),
                Some(Ok(Message::Binary(bytes))) => return Ok(serde_json::from_slice(&bytes)?),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) | None => return Err(SessionError::Closed),
                Some(Ok(Message::Frame(_))) => continue,
                Some(Err(err)) => return Err(SessionError::Ws(err)),
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.inner.close(None).await;
    }
}
