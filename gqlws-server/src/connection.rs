//! Per-socket protocol state machine.
//!
//! [`Connection`] enforces the subprotocol on one socket: handshake phases,
//! close-code semantics, operation identity, and the dispatch of prepared
//! operations to per-operation execution tasks. It is deliberately
//! socket-agnostic — everything it emits goes through an [`Outbound`] mpsc
//! channel that the session's send loop drains — so the machine can be
//! driven frame-by-frame in tests without a WebSocket.

use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};

use gqlws_protocol::{decode, CloseCode, Message, SubscribePayload};

use crate::engine::{ExecutionEngine, PreparedOperation, SubscribeError};
use crate::hooks::{ConnectAck, ConnectionContext, ServerHooks};
use crate::registry::ActiveOperations;

// ════════════════════════════════════════════════════════════════════
// Outbound channel
// ════════════════════════════════════════════════════════════════════

/// What the connection asks the socket writer to do.
///
/// The socket has a single writer (the session's send loop); the state
/// machine and every execution task funnel through this channel, which also
/// guarantees that frames queued before a close are flushed first.
#[derive(Debug)]
pub(crate) enum Outbound {
    Frame(Message),
    Close { code: u16, reason: String },
}

pub(crate) type OutboundSender = mpsc::UnboundedSender<Outbound>;

// ════════════════════════════════════════════════════════════════════
// Connection
// ════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingInit,
    Acknowledged,
}

pub(crate) struct Connection {
    phase: Phase,
    remote_addr: Option<SocketAddr>,
    ctx: Arc<ConnectionContext>,
    ops: ActiveOperations,
    out: OutboundSender,
    engine: Arc<dyn ExecutionEngine>,
    hooks: Arc<dyn ServerHooks>,
    /// Resolves the connection-init watchdog once the handshake completes.
    acked: Option<oneshot::Sender<()>>,
}

impl Connection {
    pub(crate) fn new(
        remote_addr: Option<SocketAddr>,
        engine: Arc<dyn ExecutionEngine>,
        hooks: Arc<dyn ServerHooks>,
        ops: ActiveOperations,
        out: OutboundSender,
        acked: oneshot::Sender<()>,
    ) -> Self {
        Self {
            phase: Phase::AwaitingInit,
            remote_addr,
            ctx: Arc::new(ConnectionContext {
                remote_addr,
                connection_params: None,
            }),
            ops,
            out,
            engine,
            hooks,
            acked: Some(acked),
        }
    }

    pub(crate) fn context(&self) -> Arc<ConnectionContext> {
        self.ctx.clone()
    }

    pub(crate) fn operations(&self) -> &ActiveOperations {
        &self.ops
    }

    /// Process one inbound text frame.
    ///
    /// `Break` means the connection requested a close and the caller must
    /// stop reading.
    pub(crate) async fn handle_frame(&mut self, text: &str) -> ControlFlow<()> {
        let message = match decode(text) {
            Ok(message) => message,
            Err(e) => return self.close(CloseCode::BadRequest, e.to_string()),
        };

        if self.phase == Phase::AwaitingInit && !matches!(message, Message::ConnectionInit { .. })
        {
            return self.close(
                CloseCode::Unauthorized,
                CloseCode::Unauthorized.reason(),
            );
        }

        match message {
            Message::ConnectionInit { payload } => self.handle_init(payload).await,
            Message::Subscribe { id, payload } => self.handle_subscribe(id, payload).await,
            Message::Complete { id } => {
                self.handle_complete(&id).await;
                ControlFlow::Continue(())
            }
            Message::ConnectionAck { .. } | Message::Next { .. } | Message::Error { .. } => self
                .close(
                    CloseCode::BadRequest,
                    "message is only valid server to client",
                ),
        }
    }

    // ────────────────────────────────────────────────────────────────
    // Handshake
    // ────────────────────────────────────────────────────────────────

    async fn handle_init(&mut self, payload: Option<Map<String, Value>>) -> ControlFlow<()> {
        if self.phase != Phase::AwaitingInit {
            return self.close(
                CloseCode::TooManyInitRequests,
                CloseCode::TooManyInitRequests.reason(),
            );
        }

        self.ctx = Arc::new(ConnectionContext {
            remote_addr: self.remote_addr,
            connection_params: payload,
        });

        let ack_payload = match self.hooks.on_connect(&self.ctx).await {
            Ok(ConnectAck::Accept) => None,
            Ok(ConnectAck::AcceptWithPayload(payload)) => Some(payload),
            Ok(ConnectAck::Reject) => {
                return self.close(CloseCode::Forbidden, CloseCode::Forbidden.reason());
            }
            Err(e) => return self.close(CloseCode::BadRequest, e.message),
        };

        self.phase = Phase::Acknowledged;
        if let Some(acked) = self.acked.take() {
            let _ = acked.send(());
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(remote = ?self.remote_addr, "connection acknowledged");

        self.send(Message::ConnectionAck {
            payload: ack_payload,
        });
        ControlFlow::Continue(())
    }

    // ────────────────────────────────────────────────────────────────
    // Subscribe
    // ────────────────────────────────────────────────────────────────

    async fn handle_subscribe(
        &mut self,
        id: String,
        payload: SubscribePayload,
    ) -> ControlFlow<()> {
        if !self.ops.reserve(&id) {
            return self.close(
                CloseCode::SubscriberAlreadyExists,
                format!("Subscriber for {id} already exists"),
            );
        }

        let prepared = match self.hooks.on_subscribe(&self.ctx, &id, &payload).await {
            Ok(Some(operation)) => Ok(operation),
            Ok(None) => self.engine.prepare(payload).await,
            Err(e) => {
                self.ops.finish(&id);
                return self.close(CloseCode::BadRequest, e.message);
            }
        };

        let operation = match prepared {
            Ok(operation) => operation,
            Err(errors) => {
                // The operation never started: report and free the id.
                let errors = self.hooks.on_error(&self.ctx, &id, errors).await;
                self.ops.finish(&id);
                self.send(Message::Error {
                    id,
                    payload: errors,
                });
                return ControlFlow::Continue(());
            }
        };

        let operation = match self.hooks.on_operation(&self.ctx, &id, operation).await {
            Ok(operation) => operation,
            Err(e) => {
                self.ops.finish(&id);
                return self.close(CloseCode::BadRequest, e.message);
            }
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(id = %id, kind = ?operation.kind, "operation starting");

        let task = tokio::spawn(run_operation(
            id.clone(),
            operation,
            self.ctx.clone(),
            self.engine.clone(),
            self.hooks.clone(),
            self.ops.clone(),
            self.out.clone(),
        ));
        // If the task already terminated it freed the id itself and the
        // stale handle is simply dropped.
        let _ = self.ops.activate(&id, task);
        ControlFlow::Continue(())
    }

    // ────────────────────────────────────────────────────────────────
    // Complete (client-initiated cancellation)
    // ────────────────────────────────────────────────────────────────

    async fn handle_complete(&mut self, id: &str) {
        // Unknown ids are ignored: the client may race our own completion.
        if self.ops.cancel(id) {
            #[cfg(feature = "tracing")]
            tracing::debug!(id = %id, "operation cancelled by client");
            self.hooks.on_complete(&self.ctx, id).await;
        }
    }

    // ────────────────────────────────────────────────────────────────
    // Helpers
    // ────────────────────────────────────────────────────────────────

    fn send(&self, message: Message) {
        let _ = self.out.send(Outbound::Frame(message));
    }

    fn close(&mut self, code: CloseCode, reason: impl Into<String>) -> ControlFlow<()> {
        let reason = reason.into();
        #[cfg(feature = "tracing")]
        tracing::debug!(code = code.code(), reason = %reason, "closing connection");
        let _ = self.out.send(Outbound::Close {
            code: code.code(),
            reason,
        });
        ControlFlow::Break(())
    }
}

// ════════════════════════════════════════════════════════════════════
// Per-operation execution task
// ════════════════════════════════════════════════════════════════════

/// Drive one operation to termination.
///
/// This task is the only producer of frames for its id, which gives the
/// per-subscriber ordering guarantee for free: `next*` then exactly one
/// terminal frame, all through the connection's single outbound channel.
async fn run_operation(
    id: String,
    operation: PreparedOperation,
    ctx: Arc<ConnectionContext>,
    engine: Arc<dyn ExecutionEngine>,
    hooks: Arc<dyn ServerHooks>,
    ops: ActiveOperations,
    out: OutboundSender,
) {
    if operation.kind.is_single_shot() {
        match engine.execute(operation).await {
            Ok(result) => {
                let result = hooks.on_next(&ctx, &id, result).await;
                let _ = out.send(Outbound::Frame(Message::Next {
                    id: id.clone(),
                    payload: result,
                }));
                hooks.on_complete(&ctx, &id).await;
                ops.finish(&id);
                let _ = out.send(Outbound::Frame(Message::Complete { id }));
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::error!(id = %id, error = %e, "execution failed");
                ops.finish(&id);
                let _ = out.send(Outbound::Close {
                    code: CloseCode::InternalServerError.code(),
                    reason: e.to_string(),
                });
            }
        }
        return;
    }

    let mut stream = match engine.subscribe(operation).await {
        Ok(stream) => stream,
        Err(SubscribeError::Graphql(errors)) => {
            let errors = hooks.on_error(&ctx, &id, errors).await;
            ops.finish(&id);
            let _ = out.send(Outbound::Frame(Message::Error {
                id,
                payload: errors,
            }));
            return;
        }
        Err(SubscribeError::Internal(e)) => {
            #[cfg(feature = "tracing")]
            tracing::error!(id = %id, error = %e, "subscription setup failed");
            ops.finish(&id);
            let _ = out.send(Outbound::Close {
                code: CloseCode::InternalServerError.code(),
                reason: e.to_string(),
            });
            return;
        }
    };

    while let Some(item) = stream.next().await {
        match item {
            Ok(result) => {
                let result = hooks.on_next(&ctx, &id, result).await;
                let _ = out.send(Outbound::Frame(Message::Next {
                    id: id.clone(),
                    payload: result,
                }));
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::error!(id = %id, error = %e, "subscription stream failed");
                ops.finish(&id);
                let _ = out.send(Outbound::Close {
                    code: CloseCode::InternalServerError.code(),
                    reason: e.to_string(),
                });
                return;
            }
        }
    }

    hooks.on_complete(&ctx, &id).await;
    ops.finish(&id);
    let _ = out.send(Outbound::Frame(Message::Complete { id }));
}

// ════════════════════════════════════════════════════════════════════
// Tests
// ════════════════════════════════════════════════════════════════════
