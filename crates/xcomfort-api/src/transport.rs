//! Raw text-frame channel to the bridge.
//!
//! The bridge speaks WebSocket on `ws://<address>/`; each WebSocket text
//! message is one protocol frame. [`Connector`] / [`Connection`] abstract
//! the socket so the session engine can run against an in-memory bridge
//! in tests.

use std::future::Future;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::TransportError;

/// One open, ordered, bidirectional frame channel.
///
/// `recv` is cancel-safe: dropping its future never loses a frame.
pub trait Connection: Send + 'static {
    fn send(&mut self, frame: String) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Next inbound frame, or `None` once the channel is closed.
    fn recv(&mut self) -> impl Future<Output = Option<Result<String, TransportError>>> + Send;

    /// Release the channel. Idempotent.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Opens connections to a bridge address.
pub trait Connector: Send + Sync + 'static {
    type Connection: Connection;

    fn connect(
        &self,
        address: &str,
    ) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;
}

// ── WebSocket implementation ─────────────────────────────────────────

/// Production connector on `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

/// Build the WebSocket URL for a bridge address (`host` or `host:port`).
pub fn bridge_url(address: &str) -> Result<Url, TransportError> {
    let raw = if address.contains("://") {
        address.to_owned()
    } else {
        format!("ws://{address}/")
    };
    Url::parse(&raw).map_err(|e| TransportError::Connect {
        address: address.to_owned(),
        reason: e.to_string(),
    })
}

impl Connector for WsConnector {
    type Connection = WsConnection;

    async fn connect(&self, address: &str) -> Result<WsConnection, TransportError> {
        let url = bridge_url(address)?;
        tracing::info!(url = %url, "Connecting to bridge");

        let (stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Connect {
                address: address.to_owned(),
                reason: e.to_string(),
            })?;

        tracing::debug!("WebSocket connected");
        Ok(WsConnection {
            stream,
            closed: false,
        })
    }
}

pub struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    closed: bool,
}

impl Connection for WsConnection {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.stream
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        if self.closed {
            return None;
        }
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => tracing::debug!(len = bytes.len(), "ignoring non-text binary frame"),
                },
                Ok(Message::Close(frame)) => {
                    if let Some(ref cf) = frame {
                        tracing::info!(code = %cf.code, reason = %cf.reason, "Bridge closed the connection");
                    } else {
                        tracing::info!("Bridge closed the connection");
                    }
                    self.closed = true;
                    return None;
                }
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {
                    // tungstenite answers pings itself
                    tracing::trace!("WebSocket control frame");
                }
                Err(e) => return Some(Err(TransportError::Receive(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!(error = %e, "WebSocket close handshake failed");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn bare_address_becomes_ws_root() {
        assert_eq!(bridge_url("192.168.1.20").unwrap().as_str(), "ws://192.168.1.20/");
        assert_eq!(
            bridge_url("bridge.local:8080").unwrap().as_str(),
            "ws://bridge.local:8080/"
        );
    }

    #[test]
    fn explicit_scheme_is_kept() {
        assert_eq!(bridge_url("ws://10.0.0.2/").unwrap().as_str(), "ws://10.0.0.2/");
    }

    #[test]
    fn garbage_address_is_a_connect_error() {
        let err = bridge_url("exa mple:::").unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
    }
}
