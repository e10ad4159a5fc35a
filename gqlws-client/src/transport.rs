//! Socket transport capability.
//!
//! The client drives an abstract [`ClientSocket`] — send, close, and a
//! frame/close event stream — produced by a [`Connector`]. The default
//! connector speaks WebSocket via `tokio-tungstenite` and negotiates the
//! `graphql-transport-ws` subprotocol on the upgrade request; tests inject
//! channel-backed fakes instead.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as WsCloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use gqlws_protocol::{CloseFrame, SUBPROTOCOL};

use crate::error::ClientError;

/// One observation from the socket.
#[derive(Debug)]
pub enum SocketInput {
    /// A text frame (binary frames are tolerated and read as UTF-8).
    Frame(String),
    /// The socket is gone. `1005` means the peer closed without a status,
    /// `1006` that the connection dropped without a close frame at all.
    Closed(CloseFrame),
}

/// An established socket.
#[async_trait]
pub trait ClientSocket: Send {
    /// Write one text frame.
    async fn send(&mut self, text: String) -> Result<(), ClientError>;

    /// Close with a code and reason; best-effort.
    async fn close(&mut self, code: u16, reason: String);

    /// The next frame or the close event. Cancel-safe.
    async fn next_frame(&mut self) -> SocketInput;
}

/// Produces sockets; the client calls this for every (re)connect attempt.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<Box<dyn ClientSocket>, ClientError>;
}

// ════════════════════════════════════════════════════════════════════
// tokio-tungstenite connector
// ════════════════════════════════════════════════════════════════════

/// The default WebSocket connector.
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn ClientSocket>, ClientError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| ClientError::connection_failed(url, e.to_string()))?;
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static(SUBPROTOCOL),
        );

        let (stream, response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| ClientError::connection_failed(url, e.to_string()))?;

        // The handshake fails unless the server selected our subprotocol.
        let negotiated = response
            .headers()
            .get("sec-websocket-protocol")
            .and_then(|value| value.to_str().ok());
        if negotiated != Some(SUBPROTOCOL) {
            return Err(ClientError::SubprotocolRejected {
                url: url.to_string(),
            });
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(url = %url, "websocket connected");

        Ok(Box::new(TungsteniteSocket { inner: stream }))
    }
}

struct TungsteniteSocket {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl ClientSocket for TungsteniteSocket {
    async fn send(&mut self, text: String) -> Result<(), ClientError> {
        self.inner
            .send(WsMessage::Text(text))
            .await
            .map_err(|e| ClientError::connection_failed("<established>", e.to_string()))
    }

    async fn close(&mut self, code: u16, reason: String) {
        let _ = self
            .inner
            .close(Some(WsCloseFrame {
                code: WsCloseCode::from(code),
                reason: reason.into(),
            }))
            .await;
    }

    async fn next_frame(&mut self) -> SocketInput {
        loop {
            match self.inner.next().await {
                Some(Ok(WsMessage::Text(text))) => return SocketInput::Frame(text),
                Some(Ok(WsMessage::Binary(bytes))) => {
                    return SocketInput::Frame(String::from_utf8_lossy(&bytes).into_owned());
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    return SocketInput::Closed(match frame {
                        Some(frame) => CloseFrame::new(
                            u16::from(frame.code),
                            frame.reason.into_owned(),
                            true,
                        ),
                        None => CloseFrame::new(1005, "", true),
                    });
                }
                // Ping/pong are answered by tungstenite itself.
                Some(Ok(_)) => continue,
                Some(Err(e)) => return SocketInput::Closed(CloseFrame::new(1006, e.to_string(), false)),
                None => return SocketInput::Closed(CloseFrame::new(1006, "", false)),
            }
        }
    }
}
