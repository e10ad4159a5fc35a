//! Per-connection server hooks.
//!
//! The [`ServerHooks`] trait provides pluggable hooks around the connection
//! lifecycle and every operation:
//!
//! 1. **Handshake** — `on_connect()`: accept, accept with an ack payload,
//!    or reject the connection after `connection_init`.
//! 2. **Operation start** — `on_subscribe()`: observe or replace the
//!    planning of an operation.
//! 3. **Emissions** — `on_next()` / `on_error()`: transform payloads before
//!    they are written to the socket.
//! 4. **Termination** — `on_complete()` / `on_close()`.
//!
//! The default implementation ([`DefaultHooks`]) accepts everything and
//! leaves payloads untouched.

use std::net::SocketAddr;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use gqlws_protocol::{ExecutionResult, GraphqlError, SubscribePayload};

use crate::engine::PreparedOperation;

// ════════════════════════════════════════════════════════════════════
// Public types
// ════════════════════════════════════════════════════════════════════

/// What the hooks see of a connection.
///
/// `connection_params` is `None` until `connection_init` has been received.
#[derive(Debug, Default, Clone)]
pub struct ConnectionContext {
    pub remote_addr: Option<SocketAddr>,
    pub connection_params: Option<Map<String, Value>>,
}

/// Outcome of [`ServerHooks::on_connect`].
#[derive(Debug, Clone)]
pub enum ConnectAck {
    /// Acknowledge with no payload.
    Accept,
    /// Acknowledge and attach a payload to the `connection_ack` frame.
    AcceptWithPayload(Map<String, Value>),
    /// Refuse the connection; the socket closes with `4403 Forbidden`.
    Reject,
}

/// Error raised by a hook.
///
/// The message becomes the reason of a `4400` close, verbatim.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HookError {
    pub message: String,
}

impl HookError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// ════════════════════════════════════════════════════════════════════
// ServerHooks trait
// ════════════════════════════════════════════════════════════════════

/// Pluggable connection and operation hooks.
///
/// # Example — token gate in `connection_init`
///
/// ```rust,ignore
/// use gqlws_server::{ConnectAck, ConnectionContext, HookError, ServerHooks};
///
/// struct TokenGate { valid_token: String }
///
/// #[async_trait::async_trait]
/// impl ServerHooks for TokenGate {
///     async fn on_connect(&self, ctx: &ConnectionContext) -> Result<ConnectAck, HookError> {
///         let token = ctx.connection_params.as_ref()
///             .and_then(|p| p.get("token"))
///             .and_then(|v| v.as_str());
///
///         if token == Some(self.valid_token.as_str()) {
///             Ok(ConnectAck::Accept)
///         } else {
///             Ok(ConnectAck::Reject)
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait ServerHooks: Send + Sync + 'static {
    /// Called when `connection_init` arrives, before the ack is sent.
    ///
    /// Returning [`ConnectAck::Reject`] closes the socket with `4403`;
    /// returning an error closes it with `4400` and the error message as
    /// the close reason.
    async fn on_connect(&self, _ctx: &ConnectionContext) -> Result<ConnectAck, HookError> {
        Ok(ConnectAck::Accept)
    }

    /// Called when a `subscribe` frame arrives, after the id is reserved.
    ///
    /// Returning `Some` replaces the engine's own
    /// [`prepare`](crate::engine::ExecutionEngine::prepare) step.
    async fn on_subscribe(
        &self,
        _ctx: &ConnectionContext,
        _id: &str,
        _payload: &SubscribePayload,
    ) -> Result<Option<PreparedOperation>, HookError> {
        Ok(None)
    }

    /// Called once planning produced an executable operation, before it
    /// runs. May replace the operation; an error closes the socket with
    /// `4400` and the message as reason.
    async fn on_operation(
        &self,
        _ctx: &ConnectionContext,
        _id: &str,
        operation: PreparedOperation,
    ) -> Result<PreparedOperation, HookError> {
        Ok(operation)
    }

    /// Transform a result before it is sent as a `next` frame.
    async fn on_next(
        &self,
        _ctx: &ConnectionContext,
        _id: &str,
        result: ExecutionResult,
    ) -> ExecutionResult {
        result
    }

    /// Transform errors before they are sent as an `error` frame.
    async fn on_error(
        &self,
        _ctx: &ConnectionContext,
        _id: &str,
        errors: Vec<GraphqlError>,
    ) -> Vec<GraphqlError> {
        errors
    }

    /// Called when an operation terminates, whether it completed on its own
    /// or the client cancelled it.
    async fn on_complete(&self, _ctx: &ConnectionContext, _id: &str) {}

    /// Called once when the socket is gone, after all executions have been
    /// cancelled.
    async fn on_close(&self, _ctx: &ConnectionContext, _code: u16, _reason: &str) {}
}

/// Default hooks: accept every connection, pass payloads through.
pub struct DefaultHooks;

#[async_trait]
impl ServerHooks for DefaultHooks {}
