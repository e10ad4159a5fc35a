//! Shared test harness: a channel-backed socket transport and helpers for
//! playing the server side of the subprotocol by hand.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::timeout;

use gqlws_client::{ClientError, ClientSocket, Connector, SinkEvent, SocketInput};
use gqlws_protocol::{decode, encode, CloseFrame, Message};

/// Generous bound for every await in the tests.
pub const WAIT: Duration = Duration::from_secs(2);

/// What the client wrote to the socket.
#[derive(Debug)]
pub enum ClientOutput {
    Frame(Message),
    Close { code: u16, reason: String },
}

// ════════════════════════════════════════════════════════════════════
// Fake socket
// ════════════════════════════════════════════════════════════════════

pub struct FakeSocket {
    in_rx: mpsc::UnboundedReceiver<SocketInput>,
    out_tx: mpsc::UnboundedSender<ClientOutput>,
}

#[async_trait]
impl ClientSocket for FakeSocket {
    async fn send(&mut self, text: String) -> Result<(), ClientError> {
        let message = decode(&text)
            .map_err(|e| ClientError::connection_failed("fake", e.to_string()))?;
        self.out_tx
            .send(ClientOutput::Frame(message))
            .map_err(|_| ClientError::connection_failed("fake", "peer gone"))
    }

    async fn close(&mut self, code: u16, reason: String) {
        let _ = self.out_tx.send(ClientOutput::Close { code, reason });
    }

    async fn next_frame(&mut self) -> SocketInput {
        match self.in_rx.recv().await {
            Some(input) => input,
            None => SocketInput::Closed(CloseFrame::new(1006, "", false)),
        }
    }
}

/// The test's side of one fake socket.
pub struct ServerEnd {
    in_tx: mpsc::UnboundedSender<SocketInput>,
    out_rx: mpsc::UnboundedReceiver<ClientOutput>,
}

impl ServerEnd {
    /// Push a protocol message to the client.
    pub fn send(&self, message: Message) {
        let text = encode(&message).expect("encodable message");
        let _ = self.in_tx.send(SocketInput::Frame(text));
    }

    /// Close the socket from the server side.
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self
            .in_tx
            .send(SocketInput::Closed(CloseFrame::new(code, reason, true)));
    }

    /// Drop the connection without a close frame.
    pub fn drop_connection(&self, frame: CloseFrame) {
        let _ = self.in_tx.send(SocketInput::Closed(frame));
    }

    /// Next thing the client wrote.
    pub async fn recv(&mut self) -> ClientOutput {
        timeout(WAIT, self.out_rx.recv())
            .await
            .expect("timed out waiting for client output")
            .expect("client side hung up")
    }

    /// Next frame the client wrote, asserting it is not a close.
    pub async fn recv_frame(&mut self) -> Message {
        match self.recv().await {
            ClientOutput::Frame(message) => message,
            other => panic!("expected frame, got {other:?}"),
        }
    }

    /// Next close the client wrote, asserting code and skipping nothing.
    pub async fn expect_close(&mut self, code: u16) -> String {
        match self.recv().await {
            ClientOutput::Close { code: got, reason } => {
                assert_eq!(got, code, "unexpected close code (reason: {reason})");
                reason
            }
            other => panic!("expected close, got {other:?}"),
        }
    }

    /// Assert the client has written nothing for `window`.
    pub async fn expect_silence(&mut self, window: Duration) {
        match timeout(window, self.out_rx.recv()).await {
            Err(_) => {}
            Ok(output) => panic!("expected silence, got {output:?}"),
        }
    }

    /// Expect `connection_init` and answer with `connection_ack`.
    pub async fn accept_handshake(&mut self) {
        match self.recv_frame().await {
            Message::ConnectionInit { .. } => {}
            other => panic!("expected connection_init, got {other:?}"),
        }
        self.send(Message::ConnectionAck { payload: None });
    }

    /// Expect a `subscribe` frame and return its id.
    pub async fn expect_subscribe(&mut self) -> String {
        match self.recv_frame().await {
            Message::Subscribe { id, .. } => id,
            other => panic!("expected subscribe, got {other:?}"),
        }
    }
}

// ════════════════════════════════════════════════════════════════════
// Fake connector
// ════════════════════════════════════════════════════════════════════

/// Hands out channel-backed sockets and reports each accepted connection to
/// the test through `accept_rx`.
#[derive(Clone)]
pub struct FakeConnector {
    accept_tx: mpsc::UnboundedSender<ServerEnd>,
    connects: Arc<AtomicUsize>,
    refuse: Arc<AtomicUsize>,
}

pub struct FakeNetwork {
    pub accept_rx: mpsc::UnboundedReceiver<ServerEnd>,
    pub connects: Arc<AtomicUsize>,
    refuse: Arc<AtomicUsize>,
}

impl FakeNetwork {
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::Relaxed)
    }

    /// Make the next `n` connection attempts fail outright.
    pub fn refuse_next(&self, n: usize) {
        self.refuse.store(n, Ordering::Relaxed);
    }

    /// The next socket the client opened.
    pub async fn accept(&mut self) -> ServerEnd {
        timeout(WAIT, self.accept_rx.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("connector gone")
    }

    /// Assert no connection attempt lands within `window`.
    pub async fn expect_no_connection(&mut self, window: Duration) {
        if timeout(window, self.accept_rx.recv()).await.is_ok() {
            panic!("unexpected connection attempt");
        }
    }
}

pub fn fake_network() -> (FakeConnector, FakeNetwork) {
    let (accept_tx, accept_rx) = mpsc::unbounded_channel();
    let connects = Arc::new(AtomicUsize::new(0));
    let refuse = Arc::new(AtomicUsize::new(0));
    (
        FakeConnector {
            accept_tx,
            connects: connects.clone(),
            refuse: refuse.clone(),
        },
        FakeNetwork {
            accept_rx,
            connects,
            refuse,
        },
    )
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn ClientSocket>, ClientError> {
        if self
            .refuse
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ClientError::connection_failed(url, "connection refused"));
        }
        self.connects.fetch_add(1, Ordering::Relaxed);

        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let _ = self.accept_tx.send(ServerEnd { in_tx, out_rx });
        Ok(Box::new(FakeSocket { in_rx, out_tx }))
    }
}

// ════════════════════════════════════════════════════════════════════
// Sink helpers
// ════════════════════════════════════════════════════════════════════

/// A channel-backed sink plus its receiving end.
pub fn sink() -> (
    mpsc::UnboundedSender<SinkEvent>,
    mpsc::UnboundedReceiver<SinkEvent>,
) {
    mpsc::unbounded_channel()
}

/// Next sink event, bounded.
pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<SinkEvent>) -> SinkEvent {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for sink event")
        .expect("sink dropped")
}

/// Assert the sink stays quiet for `window`.
pub async fn expect_quiet(rx: &mut mpsc::UnboundedReceiver<SinkEvent>, window: Duration) {
    if let Ok(Some(event)) = timeout(window, rx.recv()).await {
        panic!("expected quiet sink, got {event:?}");
    }
}
