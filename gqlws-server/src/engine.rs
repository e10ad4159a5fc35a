//! The pluggable GraphQL execution engine capability.
//!
//! The transport treats GraphQL itself as opaque: an [`ExecutionEngine`]
//! turns a subscribe payload into a [`PreparedOperation`] (parsing,
//! validation and operation-kind inference), executes queries and mutations
//! as single results, and runs subscriptions as cancellable result streams.
//!
//! Cancellation is dropping: when a client completes an operation or the
//! socket closes, the stream returned by [`ExecutionEngine::subscribe`] is
//! dropped and must stop yielding.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use thiserror::Error;

use gqlws_protocol::{ExecutionResult, GraphqlError, SubscribePayload};

/// A cancellable stream of execution results.
///
/// An `Err` item is an engine failure *outside* the GraphQL result (resolver
/// infrastructure, lost upstream, …) and closes the socket with `1011`;
/// GraphQL field errors belong inside [`ExecutionResult::errors`] and are
/// delivered as `next` data.
pub type ResultStream = Pin<Box<dyn Stream<Item = Result<ExecutionResult, EngineError>> + Send>>;

/// Which kind of operation a subscribe payload resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

impl OperationKind {
    /// Queries and mutations produce exactly one result.
    pub fn is_single_shot(self) -> bool {
        !matches!(self, OperationKind::Subscription)
    }
}

/// A parsed and validated operation, ready to execute.
///
/// Produced by [`ExecutionEngine::prepare`] or returned directly from the
/// `on_subscribe` hook to bypass the engine's own planning.
#[derive(Debug, Clone)]
pub struct PreparedOperation {
    pub kind: OperationKind,
    pub payload: SubscribePayload,
}

impl PreparedOperation {
    pub fn new(kind: OperationKind, payload: SubscribePayload) -> Self {
        Self { kind, payload }
    }
}

/// Unexpected failure inside the execution engine.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct EngineError {
    pub message: String,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Why a subscription failed to start.
#[derive(Debug, Error)]
pub enum SubscribeError {
    /// GraphQL-level failure (validation, resolver setup). Sent to the
    /// client as an `error` frame; the socket stays open.
    #[error("subscription failed to start")]
    Graphql(Vec<GraphqlError>),

    /// Engine failure. Closes the socket with `1011`.
    #[error(transparent)]
    Internal(#[from] EngineError),
}

/// The execution engine capability consumed by the server.
///
/// `prepare` covers the parse/validate pair of a GraphQL implementation so
/// no engine-specific document type leaks through the transport; its errors
/// are delivered to the client as an `error` frame for the operation.
#[async_trait]
pub trait ExecutionEngine: Send + Sync + 'static {
    /// Parse and validate the payload, inferring the operation kind.
    async fn prepare(
        &self,
        payload: SubscribePayload,
    ) -> Result<PreparedOperation, Vec<GraphqlError>>;

    /// Execute a query or mutation to a single result.
    async fn execute(&self, operation: PreparedOperation) -> Result<ExecutionResult, EngineError>;

    /// Start a subscription stream.
    async fn subscribe(&self, operation: PreparedOperation) -> Result<ResultStream, SubscribeError>;
}
