//! Connection lifecycle state machine.
//!
//! One task per client owns the socket, the subscriber registry, and every
//! state transition — commands from the [`Client`](crate::Client) handle and
//! inbound frames are serialized through it, which is what gives the sink
//! ordering and single-terminal guarantees. The task moves between:
//!
//! ```text
//!       subscribe / eager
//! Idle ───────────────► Connecting ──ack──► Acknowledged
//!  ▲                         │                  │
//!  │                         │ close/err        │ last unsubscribe (lazy)
//!  │ dispose                 ▼                  ▼
//!  └──── Exit ◄──── Retrying ◄────── (after keep-alive) Idle
//!                      │ terminal code / retries exhausted
//!                      ▼
//!                     Exit (remaining sinks get the close as their error)
//! ```

use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Sleep;

use gqlws_protocol::{
    decode, encode, CloseCode, CloseFrame, GraphqlError, Message, SubscribePayload,
};

use crate::builder::ClientOptions;
use crate::error::OperationError;
use crate::events::{ClientEvent, EventListeners};
use crate::registry::SubscriberMap;
use crate::sink::EventSink;
use crate::transport::{ClientSocket, SocketInput};

// ════════════════════════════════════════════════════════════════════
// Commands
// ════════════════════════════════════════════════════════════════════

/// What the client handle asks the task to do.
pub(crate) enum Command {
    Subscribe {
        id: String,
        payload: SubscribePayload,
        sink: Box<dyn EventSink>,
    },
    Dispose {
        id: String,
    },
    Shutdown,
}

// ════════════════════════════════════════════════════════════════════
// Task
// ════════════════════════════════════════════════════════════════════

enum Step {
    Idle,
    Connect,
    Retry,
    Exit,
}

pub(crate) struct ClientTask {
    options: ClientOptions,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    events: Arc<EventListeners>,
    subscribers: SubscriberMap,
    retry_count: u32,
}

impl ClientTask {
    pub(crate) fn new(
        options: ClientOptions,
        cmd_rx: mpsc::UnboundedReceiver<Command>,
        events: Arc<EventListeners>,
    ) -> Self {
        Self {
            options,
            cmd_rx,
            events,
            subscribers: SubscriberMap::new(),
            retry_count: 0,
        }
    }

    pub(crate) async fn run(mut self) {
        let mut step = if self.options.lazy {
            Step::Idle
        } else {
            Step::Connect
        };
        loop {
            step = match step {
                Step::Idle => self.idle().await,
                Step::Connect => self.connect().await,
                Step::Retry => self.retry_wait().await,
                Step::Exit => break,
            };
        }
    }

    // ────────────────────────────────────────────────────────────────
    // Idle: no socket, wait for a reason to connect
    // ────────────────────────────────────────────────────────────────

    async fn idle(&mut self) -> Step {
        loop {
            match self.cmd_rx.recv().await {
                Some(Command::Subscribe { id, payload, sink }) => {
                    if self.register(id, payload, sink) {
                        return Step::Connect;
                    }
                }
                Some(Command::Dispose { id }) => {
                    self.subscribers.remove(&id);
                }
                Some(Command::Shutdown) | None => {
                    self.complete_all();
                    return Step::Exit;
                }
            }
        }
    }

    // ────────────────────────────────────────────────────────────────
    // Connecting: socket, init, ack
    // ────────────────────────────────────────────────────────────────

    async fn connect(&mut self) -> Step {
        self.events.emit(&ClientEvent::Connecting);

        let url = match (self.options.url)().await {
            Ok(url) => url,
            Err(reason) => return self.handle_close(CloseFrame::new(1006, reason, false)),
        };

        let mut socket = match self.options.connector.connect(&url).await {
            Ok(socket) => socket,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(url = %url, error = %e, "connect failed");
                return self.handle_close(CloseFrame::new(1006, e.to_string(), false));
            }
        };

        let params = match (self.options.connection_params)().await {
            Ok(params) => params,
            Err(reason) => {
                // The producer's rejection message becomes the close reason.
                socket.close(CloseCode::BadRequest.code(), reason.clone()).await;
                return self.handle_close(CloseFrame::new(
                    CloseCode::BadRequest.code(),
                    reason,
                    true,
                ));
            }
        };

        let init = Message::ConnectionInit { payload: params };
        match encode(&init) {
            Ok(text) => {
                if socket.send(text).await.is_err() {
                    return self.handle_close(CloseFrame::new(1006, "", false));
                }
            }
            Err(e) => return self.handle_close(CloseFrame::new(1006, e.to_string(), false)),
        }

        loop {
            let input = match self.options.connection_ack_timeout {
                Some(wait) => match tokio::time::timeout(wait, socket.next_frame()).await {
                    Ok(input) => input,
                    Err(_) => {
                        let reason = "Connection acknowledgement timeout";
                        socket.close(4504, reason.to_string()).await;
                        return self.handle_close(CloseFrame::new(4504, reason, true));
                    }
                },
                None => socket.next_frame().await,
            };

            match input {
                SocketInput::Closed(frame) => return self.handle_close(frame),
                SocketInput::Frame(text) => match decode(&text) {
                    Err(e) => return self.violation(&mut socket, e.to_string()).await,
                    Ok(Message::ConnectionAck { payload }) => {
                        self.retry_count = 0;
                        self.events.emit(&ClientEvent::Message(Message::ConnectionAck {
                            payload: payload.clone(),
                        }));
                        self.events.emit(&ClientEvent::Connected {
                            ack_payload: payload,
                        });
                        return self.acknowledged(socket).await;
                    }
                    Ok(_) => {
                        return self
                            .violation(
                                &mut socket,
                                "only connection_ack is valid before acknowledgement",
                            )
                            .await;
                    }
                },
            }
        }
    }

    // ────────────────────────────────────────────────────────────────
    // Acknowledged: multiplex subscribers over the socket
    // ────────────────────────────────────────────────────────────────

    async fn acknowledged(&mut self, mut socket: Box<dyn ClientSocket>) -> Step {
        // (Re-)dispatch everything registered but not yet sent on this
        // socket, in registration order, with the original ids.
        for id in self.subscribers.unsent_ids() {
            if let Some(step) = self.dispatch(&mut socket, &id).await {
                return step;
            }
        }

        // Armed only in lazy mode once the last subscriber is gone.
        let mut keepalive: Option<Pin<Box<Sleep>>> = None;
        if let Some(step) = self.maybe_release_socket(&mut socket, &mut keepalive).await {
            return step;
        }

        loop {
            tokio::select! {
                input = socket.next_frame() => match input {
                    SocketInput::Closed(frame) => return self.handle_close(frame),
                    SocketInput::Frame(text) => {
                        let message = match decode(&text) {
                            Ok(message) => message,
                            Err(e) => return self.violation(&mut socket, e.to_string()).await,
                        };
                        self.events.emit(&ClientEvent::Message(message.clone()));
                        match message {
                            Message::Next { id, payload } => {
                                // Unknown ids (disposed or never ours) are dropped.
                                if let Some(sub) = self.subscribers.get_mut(&id) {
                                    sub.sink.next(payload);
                                }
                            }
                            Message::Error { id, payload } => {
                                if let Some(mut sub) = self.subscribers.remove(&id) {
                                    sub.sink.error(OperationError::Graphql(payload));
                                }
                                if let Some(step) =
                                    self.maybe_release_socket(&mut socket, &mut keepalive).await
                                {
                                    return step;
                                }
                            }
                            Message::Complete { id } => {
                                if let Some(mut sub) = self.subscribers.remove(&id) {
                                    sub.sink.complete();
                                }
                                if let Some(step) =
                                    self.maybe_release_socket(&mut socket, &mut keepalive).await
                                {
                                    return step;
                                }
                            }
                            // A duplicate ack is tolerated.
                            Message::ConnectionAck { .. } => {}
                            Message::ConnectionInit { .. } | Message::Subscribe { .. } => {
                                return self
                                    .violation(&mut socket, "message is only valid client to server")
                                    .await;
                            }
                        }
                    }
                },
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Subscribe { id, payload, sink }) => {
                        keepalive = None;
                        if self.register(id.clone(), payload, sink) {
                            if let Some(step) = self.dispatch(&mut socket, &id).await {
                                return step;
                            }
                        }
                    }
                    Some(Command::Dispose { id }) => {
                        if let Some(sub) = self.subscribers.remove(&id) {
                            // Best-effort: tell the server to stop; the sink
                            // was removed above so nothing arrives after this.
                            if sub.sent {
                                if let Ok(text) = encode(&Message::Complete { id }) {
                                    let _ = socket.send(text).await;
                                }
                            }
                        }
                        if let Some(step) =
                            self.maybe_release_socket(&mut socket, &mut keepalive).await
                        {
                            return step;
                        }
                    }
                    Some(Command::Shutdown) | None => {
                        self.complete_all();
                        return self.deliberate_close(&mut socket, Step::Exit).await;
                    }
                },
                _ = async { keepalive.as_mut().expect("keepalive armed").await },
                    if keepalive.is_some() =>
                {
                    return self.deliberate_close(&mut socket, Step::Idle).await;
                }
            }
        }
    }

    // ────────────────────────────────────────────────────────────────
    // Retrying: wait out the backoff, then reconnect
    // ────────────────────────────────────────────────────────────────

    async fn retry_wait(&mut self) -> Step {
        let delay = (self.options.retry_wait)(self.retry_count);
        #[cfg(feature = "tracing")]
        tracing::debug!(attempt = self.retry_count, ?delay, "reconnecting after backoff");

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return Step::Connect,
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Subscribe { id, payload, sink }) => {
                        self.register(id, payload, sink);
                    }
                    Some(Command::Dispose { id }) => {
                        self.subscribers.remove(&id);
                        if self.options.lazy && self.subscribers.is_empty() {
                            return Step::Idle;
                        }
                    }
                    Some(Command::Shutdown) | None => {
                        self.complete_all();
                        return Step::Exit;
                    }
                }
            }
        }
    }

    // ────────────────────────────────────────────────────────────────
    // Close handling
    // ────────────────────────────────────────────────────────────────

    /// Classify a socket close and decide the next step.
    fn handle_close(&mut self, frame: CloseFrame) -> Step {
        self.subscribers.mark_all_unsent();

        if CloseCode::is_terminal(frame.code) {
            #[cfg(feature = "tracing")]
            tracing::warn!(code = frame.code, reason = %frame.reason, "terminal close");
            self.fail_all(&frame);
            self.events.emit(&ClientEvent::Closed(frame));
            return Step::Exit;
        }

        if self.options.lazy && self.subscribers.is_empty() {
            self.events.emit(&ClientEvent::Closed(frame));
            return Step::Idle;
        }

        self.retry_count += 1;
        if self.retry_count > self.options.retry_attempts {
            #[cfg(feature = "tracing")]
            tracing::warn!(code = frame.code, "retries exhausted");
            self.fail_all(&frame);
            self.events.emit(&ClientEvent::Closed(frame));
            return Step::Exit;
        }

        self.events.emit(&ClientEvent::Closed(frame));
        Step::Retry
    }

    /// Protocol violation by the server: close `4400` and treat it as a
    /// terminal close.
    async fn violation(
        &mut self,
        socket: &mut Box<dyn ClientSocket>,
        reason: impl Into<String>,
    ) -> Step {
        let reason = reason.into();
        socket
            .close(CloseCode::BadRequest.code(), reason.clone())
            .await;
        self.handle_close(CloseFrame::new(CloseCode::BadRequest.code(), reason, true))
    }

    /// Cleanly close a socket this side no longer wants; no sink events.
    async fn deliberate_close(&mut self, socket: &mut Box<dyn ClientSocket>, next: Step) -> Step {
        let code = CloseCode::NormalClosure;
        socket.close(code.code(), code.reason().to_string()).await;
        self.subscribers.mark_all_unsent();
        self.events.emit(&ClientEvent::Closed(CloseFrame::new(
            code.code(),
            code.reason(),
            true,
        )));
        next
    }

    // ────────────────────────────────────────────────────────────────
    // Helpers
    // ────────────────────────────────────────────────────────────────

    fn register(&mut self, id: String, payload: SubscribePayload, sink: Box<dyn EventSink>) -> bool {
        match self.subscribers.insert(id.clone(), payload, sink) {
            Ok(()) => true,
            Err(mut sink) => {
                sink.error(OperationError::Graphql(vec![GraphqlError::new(format!(
                    "subscriber for id '{id}' already exists"
                ))]));
                false
            }
        }
    }

    /// Send `subscribe` for a registered operation and mark it sent.
    async fn dispatch(&mut self, socket: &mut Box<dyn ClientSocket>, id: &str) -> Option<Step> {
        let Some(sub) = self.subscribers.get_mut(id) else {
            return None;
        };
        let frame = Message::Subscribe {
            id: id.to_string(),
            payload: sub.payload.clone(),
        };
        sub.sent = true;
        match encode(&frame) {
            Ok(text) => {
                if socket.send(text).await.is_err() {
                    return Some(self.handle_close(CloseFrame::new(1006, "", false)));
                }
            }
            Err(e) => return Some(self.handle_close(CloseFrame::new(1006, e.to_string(), false))),
        }
        None
    }

    /// In lazy mode, a socket with no subscribers left is released: either
    /// immediately, or after the keep-alive grace period.
    async fn maybe_release_socket(
        &mut self,
        socket: &mut Box<dyn ClientSocket>,
        keepalive: &mut Option<Pin<Box<Sleep>>>,
    ) -> Option<Step> {
        if !self.options.lazy || !self.subscribers.is_empty() {
            return None;
        }
        match self.options.keep_alive {
            Some(grace) if !grace.is_zero() => {
                if keepalive.is_none() {
                    *keepalive = Some(Box::pin(tokio::time::sleep(grace)));
                }
                None
            }
            _ => Some(self.deliberate_close(socket, Step::Idle).await),
        }
    }

    /// Deliver the close as the terminal error of every remaining sink.
    fn fail_all(&mut self, frame: &CloseFrame) {
        for (_, mut sub) in self.subscribers.drain_ordered() {
            sub.sink.error(OperationError::Closed(frame.clone()));
        }
    }

    fn complete_all(&mut self) {
        for (_, mut sub) in self.subscribers.drain_ordered() {
            sub.sink.complete();
        }
    }
}
