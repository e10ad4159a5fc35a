//! # gqlws-protocol
//!
//! Shared wire protocol types for the `graphql-transport-ws` WebSocket
//! subprotocol.
//!
//! This crate is `no_std + alloc` compatible so it can be used from:
//!
//! - **`gqlws-server`** — the server side (Axum/Tokio)
//! - **`gqlws-client`** — the native client (Tokio/tungstenite)
//! - **Future browser client** — a wasm `WebSocket` bridge
//!
//! # Wire Protocol
//!
//! All messages are JSON text frames with a `"type"` discriminant tag:
//!
//! - `connection_init` — client opens the handshake, optionally carrying
//!   connection parameters
//! - `connection_ack` — server accepts the connection
//! - `subscribe` — client starts an operation identified by a unique `id`
//! - `next` — server streams an execution result for an operation
//! - `error` — server reports that an operation failed to start
//! - `complete` — either peer terminates an operation
//!
//! Decoding is strict: [`decode`] rejects frames that violate the grammar
//! with a [`DecodeError`] whose `Display` form is suitable as the reason of
//! a `4400` close. Unknown object fields are ignored for forward
//! compatibility.
//!
//! # Close Codes
//!
//! [`CloseCode`] carries the codes reserved by the subprotocol together with
//! the RFC 6455 codes a client has to classify when deciding whether a
//! dropped connection may be retried ([`CloseCode::is_terminal`]).

#![no_std]

extern crate alloc;

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The subprotocol identifier negotiated via `Sec-WebSocket-Protocol`.
pub const SUBPROTOCOL: &str = "graphql-transport-ws";

// ════════════════════════════════════════════════════════════════════
// Messages
// ════════════════════════════════════════════════════════════════════

/// A protocol frame, in either direction.
///
/// `connection_init` and `subscribe` travel client → server, `connection_ack`,
/// `next` and `error` travel server → client, and `complete` travels both
/// ways.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Opens the handshake; must be the first frame on the socket.
    ConnectionInit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Map<String, Value>>,
    },

    /// Accepts the handshake and opens the data-carrying phase.
    ConnectionAck {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Map<String, Value>>,
    },

    /// Starts a GraphQL operation under a connection-unique `id`.
    Subscribe { id: String, payload: SubscribePayload },

    /// One execution result for the operation `id`.
    Next { id: String, payload: ExecutionResult },

    /// The operation `id` failed before producing any `next`.
    Error {
        id: String,
        payload: Vec<GraphqlError>,
    },

    /// Terminates the operation `id`.
    Complete { id: String },
}

impl Message {
    /// The operation id this frame addresses, if any.
    pub fn id(&self) -> Option<&str> {
        match self {
            Message::Subscribe { id, .. }
            | Message::Next { id, .. }
            | Message::Error { id, .. }
            | Message::Complete { id } => Some(id),
            Message::ConnectionInit { .. } | Message::ConnectionAck { .. } => None,
        }
    }
}

/// The payload of a `subscribe` frame.
///
/// Only `query` is required; `operationName`, `variables` and `extensions`
/// may be absent or `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribePayload {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Map<String, Value>>,
}

impl SubscribePayload {
    /// A payload carrying only a query document.
    pub fn query(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            operation_name: None,
            variables: None,
            extensions: None,
        }
    }
}

/// The result of one GraphQL execution step, streamed via `next`.
///
/// `data` may be any serializable value including JSON `null`; errors inside
/// the result are data as far as the transport is concerned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<GraphqlError>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Map<String, Value>>,
}

impl ExecutionResult {
    /// A result carrying only a `data` value.
    pub fn from_data(data: Value) -> Self {
        Self {
            data: Some(data),
            errors: None,
            extensions: None,
        }
    }
}

/// A GraphQL error as it appears in `error` frames and result `errors`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphqlError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locations: Option<Vec<ErrorLocation>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Map<String, Value>>,
}

impl GraphqlError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            locations: None,
            path: None,
            extensions: None,
        }
    }
}

/// Source position attached to a [`GraphqlError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorLocation {
    pub line: u32,
    pub column: u32,
}

// ════════════════════════════════════════════════════════════════════
// Codec
// ════════════════════════════════════════════════════════════════════

/// Why an inbound frame was rejected.
///
/// The `Display` form is phrased so it can be used verbatim as the reason of
/// a `4400 Bad Request` close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The frame is not valid JSON.
    InvalidJson,
    /// The frame is JSON but not an object.
    NotAnObject,
    /// The `type` property is absent or not a string.
    MissingType,
    /// The `type` property names no known message.
    UnknownType(String),
    /// An id-carrying message has an empty `id`.
    EmptyId,
    /// An `error` message carries an empty error list.
    EmptyErrorPayload,
    /// The frame has the right `type` but an invalid structure.
    Malformed(String),
}

impl core::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DecodeError::InvalidJson => write!(f, "message is not valid JSON"),
            DecodeError::NotAnObject => write!(f, "message must be a JSON object"),
            DecodeError::MissingType => write!(f, "message is missing the 'type' property"),
            DecodeError::UnknownType(ty) => write!(f, "invalid message type '{ty}'"),
            DecodeError::EmptyId => write!(f, "message contains an empty operation id"),
            DecodeError::EmptyErrorPayload => {
                write!(f, "error payload must be a non-empty list of errors")
            }
            DecodeError::Malformed(detail) => write!(f, "invalid message: {detail}"),
        }
    }
}

const MESSAGE_TYPES: &[&str] = &[
    "connection_init",
    "connection_ack",
    "subscribe",
    "next",
    "error",
    "complete",
];

/// Decode and validate one inbound text frame.
///
/// Enforces the structural grammar beyond what serde checks: the frame must
/// be a JSON object with a known `type`, id-carrying variants need a
/// non-empty string id, and `error` payloads must be non-empty.
pub fn decode(text: &str) -> Result<Message, DecodeError> {
    let value: Value = serde_json::from_str(text).map_err(|_| DecodeError::InvalidJson)?;
    let object = value.as_object().ok_or(DecodeError::NotAnObject)?;

    let ty = object
        .get("type")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingType)?;
    if !MESSAGE_TYPES.contains(&ty) {
        return Err(DecodeError::UnknownType(ty.to_string()));
    }

    let message: Message =
        serde_json::from_value(value).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    if message.id().is_some_and(str::is_empty) {
        return Err(DecodeError::EmptyId);
    }
    if let Message::Error { payload, .. } = &message {
        if payload.is_empty() {
            return Err(DecodeError::EmptyErrorPayload);
        }
    }

    Ok(message)
}

/// Encode a message as a JSON text frame.
pub fn encode(message: &Message) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}

// ════════════════════════════════════════════════════════════════════
// Close codes
// ════════════════════════════════════════════════════════════════════

/// Close codes meaningful to the subprotocol.
///
/// The `44xx` range is reserved by the subprotocol; `1000`–`1011` are the
/// RFC 6455 codes both peers have to classify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    /// 1000 — normal closure.
    NormalClosure,
    /// 1001 — endpoint going away.
    GoingAway,
    /// 1002 — protocol error at the WebSocket layer.
    ProtocolError,
    /// 1005 — no status code present in the close frame.
    NoStatus,
    /// 1006 — connection dropped without a close frame.
    Abnormal,
    /// 1011 — internal error during execution.
    InternalServerError,
    /// 4400 — invalid message / bad request.
    BadRequest,
    /// 4401 — operation frame received before the connection was acknowledged.
    Unauthorized,
    /// 4403 — the server refused the connection.
    Forbidden,
    /// 4408 — `connection_init` was not received in time.
    ConnectionInitTimeout,
    /// 4409 — a subscriber for the requested id already exists.
    SubscriberAlreadyExists,
    /// 4429 — more than one `connection_init` on the socket.
    TooManyInitRequests,
}

impl CloseCode {
    /// The numeric wire code.
    pub const fn code(self) -> u16 {
        match self {
            CloseCode::NormalClosure => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::NoStatus => 1005,
            CloseCode::Abnormal => 1006,
            CloseCode::InternalServerError => 1011,
            CloseCode::BadRequest => 4400,
            CloseCode::Unauthorized => 4401,
            CloseCode::Forbidden => 4403,
            CloseCode::ConnectionInitTimeout => 4408,
            CloseCode::SubscriberAlreadyExists => 4409,
            CloseCode::TooManyInitRequests => 4429,
        }
    }

    /// Map a wire code back to a known variant.
    pub const fn from_code(code: u16) -> Option<CloseCode> {
        Some(match code {
            1000 => CloseCode::NormalClosure,
            1001 => CloseCode::GoingAway,
            1002 => CloseCode::ProtocolError,
            1005 => CloseCode::NoStatus,
            1006 => CloseCode::Abnormal,
            1011 => CloseCode::InternalServerError,
            4400 => CloseCode::BadRequest,
            4401 => CloseCode::Unauthorized,
            4403 => CloseCode::Forbidden,
            4408 => CloseCode::ConnectionInitTimeout,
            4409 => CloseCode::SubscriberAlreadyExists,
            4429 => CloseCode::TooManyInitRequests,
            _ => return None,
        })
    }

    /// The canonical close reason.
    pub const fn reason(self) -> &'static str {
        match self {
            CloseCode::NormalClosure => "Normal closure",
            CloseCode::GoingAway => "Going away",
            CloseCode::ProtocolError => "Protocol error",
            CloseCode::NoStatus => "No status received",
            CloseCode::Abnormal => "Abnormal closure",
            CloseCode::InternalServerError => "Internal server error",
            CloseCode::BadRequest => "Bad request",
            CloseCode::Unauthorized => "Unauthorized",
            CloseCode::Forbidden => "Forbidden",
            CloseCode::ConnectionInitTimeout => "Connection initialisation timeout",
            CloseCode::SubscriberAlreadyExists => "Subscriber already exists",
            CloseCode::TooManyInitRequests => "Too many initialisation requests",
        }
    }

    /// Returns `true` if a client must not reconnect after a close with
    /// this code.
    ///
    /// Note that `1005` (no status) is deliberately not terminal: a close
    /// without a status is retried like any transport drop, and only
    /// surfaces to subscribers once the retry budget is exhausted.
    pub const fn is_terminal(code: u16) -> bool {
        matches!(code, 1002 | 1011 | 4400 | 4401 | 4403 | 4408 | 4409 | 4429)
    }
}

/// A close event as observed by a peer.
///
/// This is what a client delivers to subscriber sinks when an operation is
/// terminated by the socket closing rather than by the protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
    pub was_clean: bool,
}

impl CloseFrame {
    pub fn new(code: u16, reason: impl Into<String>, was_clean: bool) -> Self {
        Self {
            code,
            reason: reason.into(),
            was_clean,
        }
    }
}

impl core::fmt::Display for CloseFrame {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.reason.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.reason)
        }
    }
}

// ════════════════════════════════════════════════════════════════════
// Tests
// ════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use serde_json::json;

    #[test]
    fn decode_connection_init_without_payload() {
        let msg = decode(r#"{"type":"connection_init"}"#).unwrap();
        assert_eq!(msg, Message::ConnectionInit { payload: None });
    }

    #[test]
    fn decode_connection_init_with_params() {
        let msg = decode(r#"{"type":"connection_init","payload":{"token":"abc"}}"#).unwrap();
        match msg {
            Message::ConnectionInit { payload: Some(p) } => {
                assert_eq!(p.get("token"), Some(&json!("abc")));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn decode_subscribe_with_operation_name() {
        let msg = decode(
            r#"{"type":"subscribe","id":"op-1","payload":{"query":"{ getValue }","operationName":"Q","variables":null}}"#,
        )
        .unwrap();
        match msg {
            Message::Subscribe { id, payload } => {
                assert_eq!(id, "op-1");
                assert_eq!(payload.query, "{ getValue }");
                assert_eq!(payload.operation_name.as_deref(), Some("Q"));
                assert!(payload.variables.is_none());
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn reject_non_json() {
        assert_eq!(decode("not json").unwrap_err(), DecodeError::InvalidJson);
    }

    #[test]
    fn reject_non_object() {
        assert_eq!(decode("[1,2,3]").unwrap_err(), DecodeError::NotAnObject);
        assert_eq!(decode("42").unwrap_err(), DecodeError::NotAnObject);
    }

    #[test]
    fn reject_missing_or_invalid_type() {
        assert_eq!(decode("{}").unwrap_err(), DecodeError::MissingType);
        assert_eq!(
            decode(r#"{"type":7}"#).unwrap_err(),
            DecodeError::MissingType
        );
        assert_eq!(
            decode(r#"{"type":"ping"}"#).unwrap_err(),
            DecodeError::UnknownType("ping".to_string())
        );
    }

    #[test]
    fn reject_empty_id() {
        assert_eq!(
            decode(r#"{"type":"complete","id":""}"#).unwrap_err(),
            DecodeError::EmptyId
        );
    }

    #[test]
    fn reject_subscribe_without_query() {
        let err = decode(r#"{"type":"subscribe","id":"1","payload":{}}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn reject_empty_error_payload() {
        assert_eq!(
            decode(r#"{"type":"error","id":"1","payload":[]}"#).unwrap_err(),
            DecodeError::EmptyErrorPayload
        );
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let msg = decode(r#"{"type":"complete","id":"1","future":true}"#).unwrap();
        assert_eq!(msg, Message::Complete { id: "1".to_string() });
    }

    #[test]
    fn encode_next_uses_snake_case_tag() {
        let msg = Message::Next {
            id: "op".to_string(),
            payload: ExecutionResult::from_data(json!({"getValue": "value"})),
        };
        let text = encode(&msg).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "next");
        assert_eq!(value["payload"]["data"]["getValue"], "value");
    }

    #[test]
    fn encode_subscribe_uses_camel_case_payload() {
        let mut payload = SubscribePayload::query("query Q { ping }");
        payload.operation_name = Some("Q".to_string());
        let text = encode(&Message::Subscribe {
            id: "1".to_string(),
            payload,
        })
        .unwrap();
        assert!(text.contains("\"operationName\":\"Q\""));
    }

    #[test]
    fn null_data_survives_round_trip() {
        let msg = decode(r#"{"type":"next","id":"1","payload":{"data":null}}"#).unwrap();
        match msg {
            Message::Next { payload, .. } => assert_eq!(payload.data, None),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn terminal_close_codes() {
        for code in [1002, 1011, 4400, 4401, 4403, 4408, 4409, 4429] {
            assert!(CloseCode::is_terminal(code), "{code} must be terminal");
        }
        for code in [1000, 1001, 1005, 1006, 4500] {
            assert!(!CloseCode::is_terminal(code), "{code} must be retryable");
        }
    }

    #[test]
    fn close_code_round_trip() {
        for variant in [
            CloseCode::NormalClosure,
            CloseCode::BadRequest,
            CloseCode::ConnectionInitTimeout,
            CloseCode::TooManyInitRequests,
        ] {
            assert_eq!(CloseCode::from_code(variant.code()), Some(variant));
        }
        assert_eq!(CloseCode::from_code(4999), None);
    }

    #[test]
    fn decode_error_display_reads_as_close_reason() {
        let err = decode(r#"{"type":"nope"}"#).unwrap_err();
        assert_eq!(err.to_string(), "invalid message type 'nope'");
    }

    #[test]
    fn error_frame_round_trip() {
        let msg = Message::Error {
            id: "op".to_string(),
            payload: vec![GraphqlError::new("boom")],
        };
        let decoded = decode(&encode(&msg).unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }
}
