//! Builder for the client.
//!
//! Every option of the connection lifecycle lives here; [`build`]
//! normalizes value-or-producer options into async producers, spawns the
//! connection task, and hands back the [`Client`] handle.
//!
//! [`build`]: ClientBuilder::build

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::client::Client;
use crate::connection::ClientTask;
use crate::events::{ClientEvent, EventListeners};
use crate::retry::{randomised_exponential_backoff, RetryWaitFn};
use crate::transport::{Connector, TungsteniteConnector};

/// Async producer of the target URL; errors are retried like transport
/// failures.
pub(crate) type UrlProvider =
    Arc<dyn Fn() -> BoxFuture<'static, Result<String, String>> + Send + Sync>;

/// Async producer of the `connection_init` payload; an `Err` closes the
/// socket with `4400` and the message as reason.
pub(crate) type ParamsProvider =
    Arc<dyn Fn() -> BoxFuture<'static, Result<Option<Map<String, Value>>, String>> + Send + Sync>;

/// Producer of fresh operation ids.
pub(crate) type IdGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// Resolved options handed to the connection task.
pub(crate) struct ClientOptions {
    pub url: UrlProvider,
    pub connection_params: ParamsProvider,
    pub lazy: bool,
    pub keep_alive: Option<Duration>,
    pub retry_attempts: u32,
    pub retry_wait: RetryWaitFn,
    pub connection_ack_timeout: Option<Duration>,
    pub connector: Arc<dyn Connector>,
}

/// Builder for a [`Client`].
///
/// # Example
///
/// ```rust,ignore
/// use gqlws_client::Client;
///
/// let client = Client::builder("ws://localhost:4000/graphql")
///     .connection_params(params)
///     .keep_alive(Duration::from_secs(30))
///     .retry_attempts(3)
///     .build();
/// ```
pub struct ClientBuilder {
    url: UrlProvider,
    connection_params: ParamsProvider,
    lazy: bool,
    keep_alive: Option<Duration>,
    retry_attempts: u32,
    retry_wait: RetryWaitFn,
    connection_ack_timeout: Option<Duration>,
    generate_id: IdGenerator,
    connector: Arc<dyn Connector>,
    listeners: Vec<Box<dyn Fn(&ClientEvent) + Send + Sync>>,
}

impl ClientBuilder {
    /// Create a builder targeting a fixed URL.
    ///
    /// Defaults:
    /// - lazy: `true` (connect on first subscribe)
    /// - keep-alive: none (close as soon as the last subscriber is gone)
    /// - retry attempts: `5`
    /// - retry wait: exponential backoff with jitter
    /// - ack timeout: none (wait forever)
    /// - operation ids: UUID v4
    /// - transport: `tokio-tungstenite`
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            url: Arc::new(move || {
                let url = url.clone();
                Box::pin(async move { Ok(url) })
            }),
            connection_params: Arc::new(|| Box::pin(async { Ok(None) })),
            lazy: true,
            keep_alive: None,
            retry_attempts: 5,
            retry_wait: randomised_exponential_backoff(),
            connection_ack_timeout: None,
            generate_id: Arc::new(|| uuid::Uuid::new_v4().to_string()),
            connector: Arc::new(TungsteniteConnector),
            listeners: Vec::new(),
        }
    }

    /// Resolve the URL freshly for every connect attempt (rotating
    /// gateways, signed URLs, …).
    pub fn url_with<F, Fut>(mut self, producer: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, String>> + Send + 'static,
    {
        self.url = Arc::new(move || Box::pin(producer()));
        self
    }

    /// Fixed connection parameters sent with `connection_init`.
    pub fn connection_params(mut self, params: Map<String, Value>) -> Self {
        self.connection_params = Arc::new(move || {
            let params = params.clone();
            Box::pin(async move { Ok(Some(params)) })
        });
        self
    }

    /// Resolve connection parameters freshly for every connect attempt.
    ///
    /// An `Err` closes the socket with `4400` and the message as the close
    /// reason, which is terminal: remaining subscribers fail.
    pub fn connection_params_with<F, Fut>(mut self, producer: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Map<String, Value>>, String>> + Send + 'static,
    {
        self.connection_params = Arc::new(move || Box::pin(producer()));
        self
    }

    /// Lazy mode (the default): the socket exists only while at least one
    /// subscriber is active. `lazy(false)` connects eagerly at build time
    /// and keeps the connection alive.
    pub fn lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    /// How long an idle socket lingers after the last subscriber is gone
    /// (lazy mode). Without it the socket closes immediately.
    pub fn keep_alive(mut self, grace: Duration) -> Self {
        self.keep_alive = Some(grace);
        self
    }

    /// Reconnect attempts after an abnormal close (default `5`).
    ///
    /// `0` disables reconnection; `u32::MAX` effectively retries forever.
    /// Closes with a terminal code ({1002, 1011, 4400, 4401, 4403, 4408,
    /// 4409, 4429}) are never retried. A `1005` (no status) close is
    /// retried like any other non-terminal close, and is what remaining
    /// subscribers observe as their error once attempts run out.
    pub fn retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    /// Delay producer before reconnect attempt `n` (1-based).
    pub fn retry_wait(mut self, wait: impl FnMut(u32) -> Duration + Send + 'static) -> Self {
        self.retry_wait = Box::new(wait);
        self
    }

    /// Fail the handshake when `connection_ack` does not arrive in time;
    /// the socket closes with `4504` and the attempt is retried.
    pub fn connection_ack_timeout(mut self, wait: Duration) -> Self {
        self.connection_ack_timeout = Some(wait);
        self
    }

    /// Replace the operation-id generator (default UUID v4). Ids must be
    /// unique among the client's active operations.
    pub fn generate_id(mut self, generate: impl Fn() -> String + Send + Sync + 'static) -> Self {
        self.generate_id = Arc::new(generate);
        self
    }

    /// Replace the socket transport (default `tokio-tungstenite`).
    pub fn connector(mut self, connector: impl Connector) -> Self {
        self.connector = Arc::new(connector);
        self
    }

    /// Register an event listener at construction time.
    pub fn on_event(mut self, listener: impl Fn(&ClientEvent) + Send + Sync + 'static) -> Self {
        self.listeners.push(Box::new(listener));
        self
    }

    /// Spawn the connection task and return the client handle.
    ///
    /// Must be called within a Tokio runtime. With `lazy(false)` the
    /// connection is established immediately in the background.
    pub fn build(self) -> Client {
        let events = Arc::new(EventListeners::new());
        for listener in self.listeners {
            events.add(listener);
        }

        let options = ClientOptions {
            url: self.url,
            connection_params: self.connection_params,
            lazy: self.lazy,
            keep_alive: self.keep_alive,
            retry_attempts: self.retry_attempts,
            retry_wait: self.retry_wait,
            connection_ack_timeout: self.connection_ack_timeout,
            connector: self.connector,
        };

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        tokio::spawn(ClientTask::new(options, cmd_rx, events.clone()).run());

        Client::new(cmd_tx, self.generate_id, events)
    }
}
