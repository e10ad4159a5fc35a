//! Error types for the client.

use thiserror::Error;

use gqlws_protocol::{CloseFrame, GraphqlError, SUBPROTOCOL};

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors raised while establishing or driving a connection.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The WebSocket connection could not be established.
    #[error("connection failed to {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    /// The server accepted the upgrade but did not select the
    /// `graphql-transport-ws` subprotocol.
    #[error("server at {url} did not select the {SUBPROTOCOL} subprotocol")]
    SubprotocolRejected { url: String },

    /// The `url` producer failed.
    #[error("url could not be resolved: {0}")]
    Url(String),

    /// The `connection_params` producer failed. The message is used as the
    /// reason of the `4400` close.
    #[error("connection parameters could not be resolved: {0}")]
    ConnectionParams(String),

    /// The client has been disposed; no further operations are possible.
    #[error("client is disposed")]
    Disposed,

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    /// Create a connection failed error.
    pub fn connection_failed(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            url: url.into(),
            reason: reason.into(),
        }
    }
}

/// The terminal error delivered to a subscriber's sink.
#[derive(Debug, Clone, Error)]
pub enum OperationError {
    /// The operation failed to start; the payload of the `error` frame.
    #[error("operation failed: {}", join_messages(.0))]
    Graphql(Vec<GraphqlError>),

    /// The operation was terminated by the connection closing.
    #[error("connection closed ({0})")]
    Closed(CloseFrame),

    /// The client was disposed before the operation could run.
    #[error("client is disposed")]
    Disposed,
}

impl OperationError {
    /// The close event, when termination was closure-driven.
    pub fn close_frame(&self) -> Option<&CloseFrame> {
        match self {
            OperationError::Closed(frame) => Some(frame),
            _ => None,
        }
    }
}

fn join_messages(errors: &[GraphqlError]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graphql_errors_join_into_message() {
        let err = OperationError::Graphql(vec![
            GraphqlError::new("first"),
            GraphqlError::new("second"),
        ]);
        assert_eq!(err.to_string(), "operation failed: first; second");
    }

    #[test]
    fn closed_error_carries_frame() {
        let err = OperationError::Closed(CloseFrame::new(4400, "Welcome", true));
        assert_eq!(err.to_string(), "connection closed (4400: Welcome)");
        assert_eq!(err.close_frame().unwrap().code, 4400);
    }
}
