//! # gqlws-server
//!
//! Server-side protocol engine for the `graphql-transport-ws` WebSocket
//! subprotocol.
//!
//! The transport multiplexes any number of GraphQL operations — queries,
//! mutations, and subscriptions — over one WebSocket, enforcing the
//! handshake, operation identity, ordering, cancellation and close-code
//! semantics of the subprotocol. GraphQL itself stays pluggable behind the
//! [`ExecutionEngine`] trait; per-connection policy is pluggable behind
//! [`ServerHooks`].
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use gqlws_server::GraphqlWsServer;
//!
//! GraphqlWsServer::new(MyEngine::default())
//!     .bind("0.0.0.0:4000".parse()?)
//!     .path("/graphql")
//!     .serve()
//!     .await?;
//! ```
//!
//! ## Protocol enforcement
//!
//! | Situation | Close |
//! |-----------|-------|
//! | malformed frame | `4400` with the decoder's message |
//! | operation frame before ack | `4401` |
//! | hook rejected the connection | `4403` |
//! | no `connection_init` in time | `4408` |
//! | duplicate operation id | `4409` |
//! | second `connection_init` | `4429` |
//! | engine failure | `1011` |

pub mod engine;
pub mod hooks;
pub mod server;

pub(crate) mod connection;
pub(crate) mod registry;
pub(crate) mod session;

// ════════════════════════════════════════════════════════════════════
// Public re-exports
// ════════════════════════════════════════════════════════════════════

pub use engine::{
    EngineError, ExecutionEngine, OperationKind, PreparedOperation, ResultStream, SubscribeError,
};
pub use hooks::{ConnectAck, ConnectionContext, DefaultHooks, HookError, ServerHooks};
pub use server::{GraphqlWsServer, ServerError, DEFAULT_CONNECTION_INIT_WAIT};

pub use gqlws_protocol as protocol;
