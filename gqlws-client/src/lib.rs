//! # gqlws-client
//!
//! Client-side protocol engine for the `graphql-transport-ws` WebSocket
//! subprotocol.
//!
//! One [`Client`] multiplexes any number of GraphQL operations — queries,
//! mutations, and subscriptions — over a single WebSocket that it
//! establishes lazily (or eagerly), keeps alive, and re-establishes across
//! failures per the retry policy. Subscribers survive reconnects with their
//! original operation ids until they complete, error, or are disposed.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use gqlws_client::{Client, SinkEvent};
//! use gqlws_protocol::SubscribePayload;
//!
//! let client = Client::builder("ws://localhost:4000/graphql").build();
//!
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<SinkEvent>();
//! let subscription = client.subscribe(
//!     SubscribePayload::query("subscription { greetings }"),
//!     tx,
//! );
//!
//! while let Some(event) = rx.recv().await {
//!     match event {
//!         SinkEvent::Next(result) => println!("{:?}", result.data),
//!         SinkEvent::Complete => break,
//!         SinkEvent::Error(e) => return Err(e.into()),
//!     }
//! }
//! # drop(subscription);
//! ```
//!
//! ## Reconnection
//!
//! Abnormal closes are retried with jittered exponential backoff; closes
//! with a terminal code (`1002`, `1011`, `4400`, `4401`, `4403`, `4408`,
//! `4409`, `4429`) are not. Still-registered subscribers are re-subscribed
//! after a successful reconnect; once the retry budget is spent, each one
//! receives the last close event as its error.

pub mod builder;
pub mod client;
pub mod error;
pub mod events;
pub mod retry;
pub mod sink;
pub mod transport;

pub(crate) mod connection;
pub(crate) mod registry;

// ════════════════════════════════════════════════════════════════════
// Public re-exports
// ════════════════════════════════════════════════════════════════════

pub use builder::ClientBuilder;
pub use client::{Client, Subscription};
pub use error::{ClientError, ClientResult, OperationError};
pub use events::{ClientEvent, ListenerId};
pub use retry::{backoff_with_rng, randomised_exponential_backoff, RetryWaitFn};
pub use sink::{EventSink, SinkEvent};
pub use transport::{ClientSocket, Connector, SocketInput, TungsteniteConnector};

pub use gqlws_protocol as protocol;
