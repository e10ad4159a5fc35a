//! Per-socket WebSocket session wiring.
//!
//! Each accepted connection runs:
//!
//! 1. A **send loop** task — drains the per-connection [`Outbound`] channel
//!    and writes frames to the WebSocket; a queued close is flushed after
//!    every frame enqueued before it, then ends the loop.
//! 2. The **recv loop** in place — feeds inbound text frames to the
//!    [`Connection`] state machine.
//! 3. A **connection-init watchdog** — closes with `4408` if the handshake
//!    does not complete within the configured window.
//!
//! When the recv loop finishes (either peer closed, or the state machine
//! requested a close) all active executions are cancelled, the outbound
//! channel is drained to flush any queued close frame, and the `on_close`
//! hook fires exactly once.

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::ws::{CloseFrame as WsCloseFrame, Message as WsMessage, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};

use gqlws_protocol::CloseCode;

use crate::connection::{Connection, Outbound, OutboundSender};
use crate::server::ServerState;

/// How long the send loop gets to flush queued frames during teardown.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Drive a single WebSocket connection to completion.
///
/// `await`ed inside the Axum upgrade callback.
pub(crate) async fn run_session(
    socket: WebSocket,
    remote_addr: Option<SocketAddr>,
    state: ServerState,
) {
    #[cfg(feature = "tracing")]
    tracing::debug!(remote = ?remote_addr, "session started");

    let (ws_sender, ws_receiver) = socket.split();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (acked_tx, acked_rx) = oneshot::channel();

    let watchdog = tokio::spawn(init_watchdog(
        state.options.connection_init_wait_timeout,
        acked_rx,
        out_tx.clone(),
    ));
    let send_task = tokio::spawn(send_loop(ws_sender, out_rx));

    let mut connection = Connection::new(
        remote_addr,
        state.engine.clone(),
        state.hooks.clone(),
        Default::default(),
        out_tx,
        acked_tx,
    );

    let peer_close = recv_loop(ws_receiver, &mut connection).await;

    // Teardown fence: cancel executions, then drop every outbound sender so
    // the send loop drains and exits on its own — flushing any queued close
    // frame in the process.
    watchdog.abort();
    connection.operations().drain();
    let ctx = connection.context();
    drop(connection);
    let sent_close = match tokio::time::timeout(FLUSH_TIMEOUT, send_task).await {
        Ok(Ok(close)) => close,
        _ => None,
    };

    let (code, reason) = sent_close
        .or(peer_close)
        .unwrap_or((CloseCode::Abnormal.code(), String::new()));
    state.hooks.on_close(&ctx, code, &reason).await;

    #[cfg(feature = "tracing")]
    tracing::debug!(remote = ?remote_addr, code, "session ended");
}

// ════════════════════════════════════════════════════════════════════
// Send loop
// ════════════════════════════════════════════════════════════════════

/// Returns the close this side performed, if any.
async fn send_loop(
    mut ws_sender: SplitSink<WebSocket, WsMessage>,
    mut out_rx: mpsc::UnboundedReceiver<Outbound>,
) -> Option<(u16, String)> {
    while let Some(outbound) = out_rx.recv().await {
        match outbound {
            Outbound::Frame(message) => {
                let text = match gqlws_protocol::encode(&message) {
                    Ok(text) => text,
                    Err(_e) => {
                        #[cfg(feature = "tracing")]
                        tracing::error!("failed to serialize frame: {}", _e);
                        continue;
                    }
                };
                if ws_sender.send(WsMessage::Text(text)).await.is_err() {
                    break;
                }
            }
            Outbound::Close { code, reason } => {
                let _ = ws_sender
                    .send(WsMessage::Close(Some(WsCloseFrame {
                        code,
                        reason: reason.clone().into(),
                    })))
                    .await;
                return Some((code, reason));
            }
        }
    }
    None
}

// ════════════════════════════════════════════════════════════════════
// Recv loop
// ════════════════════════════════════════════════════════════════════

/// Returns the peer's close frame, if one was received.
async fn recv_loop(
    mut ws_receiver: SplitStream<WebSocket>,
    connection: &mut Connection,
) -> Option<(u16, String)> {
    while let Some(result) = ws_receiver.next().await {
        let frame = match result {
            Ok(frame) => frame,
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("recv error: {}", _e);
                break;
            }
        };

        match frame {
            WsMessage::Text(text) => {
                if connection.handle_frame(&text).await.is_break() {
                    break;
                }
            }
            WsMessage::Binary(bytes) => {
                let text = String::from_utf8_lossy(&bytes);
                if connection.handle_frame(&text).await.is_break() {
                    break;
                }
            }
            WsMessage::Close(frame) => {
                return frame.map(|f| (f.code, f.reason.to_string()));
            }
            // WebSocket ping/pong frames are handled transparently by axum.
            _ => {}
        }
    }
    None
}

// ════════════════════════════════════════════════════════════════════
// Connection-init watchdog
// ════════════════════════════════════════════════════════════════════

async fn init_watchdog(
    wait: Duration,
    acked: oneshot::Receiver<()>,
    out: OutboundSender,
) {
    tokio::select! {
        _ = tokio::time::sleep(wait) => {
            let _ = out.send(Outbound::Close {
                code: CloseCode::ConnectionInitTimeout.code(),
                reason: CloseCode::ConnectionInitTimeout.reason().to_string(),
            });
        }
        // Resolved on ack, or when the connection is torn down first.
        _ = acked => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[tokio::test]
    async fn watchdog_closes_4408_on_expiry() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (_acked_tx, acked_rx) = oneshot::channel::<()>();

        tokio::spawn(init_watchdog(Duration::from_millis(10), acked_rx, out_tx));

        match timeout(Duration::from_secs(1), out_rx.recv()).await {
            Ok(Some(Outbound::Close { code, reason })) => {
                assert_eq!(code, 4408);
                assert_eq!(reason, "Connection initialisation timeout");
            }
            other => panic!("expected close, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn watchdog_is_disarmed_by_ack() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (acked_tx, acked_rx) = oneshot::channel::<()>();

        let watchdog = tokio::spawn(init_watchdog(
            Duration::from_millis(50),
            acked_rx,
            out_tx,
        ));
        let _ = acked_tx.send(());
        let _ = timeout(Duration::from_secs(1), watchdog).await;

        // Nothing was emitted and the channel is closed.
        assert!(out_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn watchdog_stands_down_when_connection_drops() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (acked_tx, acked_rx) = oneshot::channel::<()>();

        let watchdog = tokio::spawn(init_watchdog(
            Duration::from_millis(50),
            acked_rx,
            out_tx,
        ));
        drop(acked_tx);
        let _ = timeout(Duration::from_secs(1), watchdog).await;
        assert!(out_rx.recv().await.is_none());
    }
}
