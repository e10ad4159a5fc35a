//! Axum WebSocket server and upgrade handler.
//!
//! [`GraphqlWsServer`] is a builder: give it an execution engine, optionally
//! hooks and timeouts, then either [`serve`](GraphqlWsServer::serve) it on a
//! TCP address or take the assembled [`into_router`](GraphqlWsServer::into_router)
//! and mount it inside an existing Axum application.
//!
//! # Health endpoint
//!
//! `GET /health` returns `200 OK` with a JSON body:
//! ```json
//! { "status": "ok", "connections": 3, "uptime_secs": 120 }
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use thiserror::Error;
use tower_http::cors::CorsLayer;

use gqlws_protocol::SUBPROTOCOL;

use crate::engine::ExecutionEngine;
use crate::hooks::{DefaultHooks, ServerHooks};
use crate::session::run_session;

/// Default window for receiving `connection_init` after the socket opens.
pub const DEFAULT_CONNECTION_INIT_WAIT: Duration = Duration::from_secs(3);

// ════════════════════════════════════════════════════════════════════
// Shared server state
// ════════════════════════════════════════════════════════════════════

pub(crate) struct ServerOptions {
    pub connection_init_wait_timeout: Duration,
}

#[derive(Clone)]
pub(crate) struct ServerState {
    pub engine: Arc<dyn ExecutionEngine>,
    pub hooks: Arc<dyn ServerHooks>,
    pub options: Arc<ServerOptions>,
    pub connections: Arc<AtomicUsize>,
    pub started_at: Instant,
}

// ════════════════════════════════════════════════════════════════════
// Errors
// ════════════════════════════════════════════════════════════════════

/// Errors raised while standing up the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

// ════════════════════════════════════════════════════════════════════
// Builder
// ════════════════════════════════════════════════════════════════════

/// Builder for a `graphql-transport-ws` server.
///
/// # Example
///
/// ```rust,ignore
/// use gqlws_server::GraphqlWsServer;
///
/// GraphqlWsServer::new(MyEngine::default())
///     .bind("0.0.0.0:4000".parse()?)
///     .path("/graphql")
///     .with_hooks(MyHooks)
///     .serve()
///     .await?;
/// ```
pub struct GraphqlWsServer {
    bind_addr: SocketAddr,
    ws_path: String,
    engine: Arc<dyn ExecutionEngine>,
    hooks: Arc<dyn ServerHooks>,
    connection_init_wait_timeout: Duration,
    additional_routes: Option<Router>,
}

impl GraphqlWsServer {
    /// Create a builder with sensible defaults.
    ///
    /// Defaults:
    /// - bind address: `0.0.0.0:4000`
    /// - WebSocket path: `/graphql`
    /// - hooks: accept everything
    /// - connection-init wait: 3 s
    pub fn new(engine: impl ExecutionEngine) -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 4000)),
            ws_path: "/graphql".to_string(),
            engine: Arc::new(engine),
            hooks: Arc::new(DefaultHooks),
            connection_init_wait_timeout: DEFAULT_CONNECTION_INIT_WAIT,
            additional_routes: None,
        }
    }

    /// Set the TCP address to listen on.
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the URL path of the WebSocket endpoint (default `/graphql`).
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.ws_path = path.into();
        self
    }

    /// Install connection and operation hooks.
    pub fn with_hooks(mut self, hooks: impl ServerHooks) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    /// How long a socket may stay silent before `connection_init` arrives.
    ///
    /// On expiry the socket closes with `4408`.
    pub fn with_connection_init_wait_timeout(mut self, wait: Duration) -> Self {
        self.connection_init_wait_timeout = wait;
        self
    }

    /// Merge user-supplied Axum routes into the served router (REST and
    /// WebSocket on the same port).
    pub fn with_additional_routes(mut self, routes: Router) -> Self {
        self.additional_routes = Some(routes);
        self
    }

    /// Assemble the Axum router without binding a listener.
    pub fn into_router(self) -> Router {
        let state = ServerState {
            engine: self.engine,
            hooks: self.hooks,
            options: Arc::new(ServerOptions {
                connection_init_wait_timeout: self.connection_init_wait_timeout,
            }),
            connections: Arc::new(AtomicUsize::new(0)),
            started_at: Instant::now(),
        };

        let ws_app = Router::new()
            .route(&self.ws_path, get(ws_upgrade_handler))
            .route("/health", get(health_handler))
            .with_state(state)
            .layer(CorsLayer::permissive());

        match self.additional_routes {
            Some(extra) => ws_app.merge(extra),
            None => ws_app,
        }
    }

    /// Bind the configured address and serve until the task is dropped.
    pub async fn serve(self) -> Result<(), ServerError> {
        let bind_addr = self.bind_addr;
        let app = self.into_router();

        let listener = tokio::net::TcpListener::bind(bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: bind_addr,
                source,
            })?;

        #[cfg(feature = "tracing")]
        tracing::info!("graphql-transport-ws server listening on {}", bind_addr);

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════
// Handlers
// ════════════════════════════════════════════════════════════════════

/// WebSocket upgrade handler.
///
/// Rejects clients that do not offer the `graphql-transport-ws` subprotocol
/// before agreeing to upgrade.
async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    State(state): State<ServerState>,
) -> impl IntoResponse {
    if !offers_subprotocol(&headers) {
        #[cfg(feature = "tracing")]
        tracing::warn!("upgrade rejected: client did not offer {}", SUBPROTOCOL);
        return (
            StatusCode::BAD_REQUEST,
            format!("missing subprotocol {SUBPROTOCOL}"),
        )
            .into_response();
    }

    let remote_addr = connect_info.map(|ConnectInfo(addr)| addr);

    ws.protocols([SUBPROTOCOL])
        .on_upgrade(move |socket: WebSocket| track_session(socket, remote_addr, state))
        .into_response()
}

async fn track_session(socket: WebSocket, remote_addr: Option<SocketAddr>, state: ServerState) {
    state.connections.fetch_add(1, Ordering::Relaxed);
    run_session(socket, remote_addr, state.clone()).await;
    state.connections.fetch_sub(1, Ordering::Relaxed);
}

fn offers_subprotocol(headers: &HeaderMap) -> bool {
    headers
        .get_all("sec-websocket-protocol")
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|proto| proto.trim() == SUBPROTOCOL)
}

/// Health check endpoint.
async fn health_handler(State(state): State<ServerState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "connections": state.connections.load(Ordering::Relaxed),
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn subprotocol_offer_detection() {
        let mut headers = HeaderMap::new();
        assert!(!offers_subprotocol(&headers));

        headers.insert(
            "sec-websocket-protocol",
            HeaderValue::from_static("graphql-transport-ws"),
        );
        assert!(offers_subprotocol(&headers));

        let mut headers = HeaderMap::new();
        headers.insert(
            "sec-websocket-protocol",
            HeaderValue::from_static("foo, graphql-transport-ws"),
        );
        assert!(offers_subprotocol(&headers));

        let mut headers = HeaderMap::new();
        headers.insert(
            "sec-websocket-protocol",
            HeaderValue::from_static("graphql-ws"),
        );
        assert!(!offers_subprotocol(&headers));
    }
}
