//! Transport abstraction over the persistent connection.
//!
//! The connection manager only ever sees a [`Connector`] that yields a
//! [`Transport`]: a write half ([`FrameSink`]) and a read half
//! ([`FrameSource`]) that can be driven from one `select!` loop. The
//! production implementation is [`WebSocketConnector`] over
//! `tokio-tungstenite`; tests plug in channel-backed fakes.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use kgchat_core::TransportError;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Write half of a transport.
#[async_trait]
pub trait FrameSink: Send {
    /// Send one text frame.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Close the connection.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Read half of a transport.
#[async_trait]
pub trait FrameSource: Send {
    /// Next text frame, or `None` once the peer has closed.
    async fn next_text(&mut self) -> Option<Result<String, TransportError>>;
}

/// An open connection, split into halves.
pub struct Transport {
    /// Write half.
    pub sink: Box<dyn FrameSink>,
    /// Read half.
    pub source: Box<dyn FrameSource>,
}

/// Opens transports to an endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new transport to `url`.
    async fn connect(&self, url: &str) -> Result<Transport, TransportError>;
}

/// [`Connector`] for `ws://` and `wss://` endpoints.
#[derive(Clone, Copy, Debug, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<Transport, TransportError> {
        let (ws, _response) = connect_async(url)
            .await
            .map_err(|e| TransportError::Connect {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        let (sink, source) = ws.split();
        Ok(Transport {
            sink: Box::new(sink),
            source: Box::new(source),
        })
    }
}

#[async_trait]
impl FrameSink for SplitSink<WsStream, Message> {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        SinkExt::close(self)
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}

#[async_trait]
impl FrameSource for SplitStream<WsStream> {
    async fn next_text(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => debug!(len = bytes.len(), "dropping non-UTF-8 binary frame"),
                },
                Ok(Message::Close(_)) => return None,
                // Ping/Pong are answered by tungstenite itself.
                Ok(_) => {}
                Err(e) => return Some(Err(TransportError::Receive(e.to_string()))),
            }
        }
    }
}
