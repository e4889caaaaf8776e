//! Actor-per-connection loop for an accepted WebSocket.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::state::AppState;
use crate::ws::protocol;
use crate::ws::ConnectionSender;

/// Server sends a WebSocket ping every 30 seconds so half-open connections
/// cannot occupy a registry slot indefinitely.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// If no pong arrives within 10 seconds after a ping, close.
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Run the connection actor for a user.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards frames from an mpsc channel
/// - Reader loop: processes incoming events, dispatches to protocol handlers
///
/// Pending-queue flush order on connect: drain, register, drain again. The
/// first drain delivers everything queued while the user was offline; the
/// second catches messages queued in the window before registration made
/// the user visible to live dispatch. Queued entries reach the writer
/// channel before any live fan-out, preserving FIFO delivery.
pub async fn run_connection(socket: WebSocket, state: AppState, user_id: i64) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    flush_pending(&state, user_id, &tx).await;
    let conn_id = state.connections.register(user_id, tx.clone());
    flush_pending(&state, user_id, &tx).await;

    tracing::info!(user_id, conn_id, "connection actor started");

    // Writer task: forwards mpsc frames to the WebSocket sink.
    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    // Ping task: periodic pings, close on pong timeout.
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();
    let ping_tx = tx.clone();
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(PING_INTERVAL);
        // Skip the first immediate tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            if ping_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                // Writer task has died, connection is gone
                break;
            }

            match timeout(PONG_TIMEOUT, pong_rx.recv()).await {
                Ok(Some(())) => {}
                _ => {
                    tracing::warn!(user_id, "pong timeout, closing connection");
                    let _ = ping_tx.send(Message::Close(Some(CloseFrame {
                        code: 1001,
                        reason: "pong timeout".into(),
                    })));
                    break;
                }
            }
        }
    });

    // Reader loop: an event failure never terminates the loop; only channel
    // errors and close frames do.
    loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    protocol::handle_event(text.as_str(), &tx, &state, user_id).await;
                }
                Message::Binary(_) => {
                    tracing::debug!(user_id, "ignoring binary frame (protocol is JSON text)");
                }
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(user_id, reason = ?frame, "client initiated close");
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(user_id, error = %e, "WebSocket receive error");
                break;
            }
            None => {
                tracing::info!(user_id, "WebSocket stream ended");
                break;
            }
        }
    }

    // Cleanup runs on every exit path of the reader loop. The conn_id guard
    // keeps a superseded actor from unregistering its replacement.
    writer_handle.abort();
    ping_handle.abort();
    state.connections.unregister(user_id, conn_id);

    tracing::info!(user_id, conn_id, "connection actor stopped");
}

/// Drain the user's pending queue and push every entry, oldest first.
/// A store failure degrades to a warning; queued entries stay put for the
/// next reconnect.
async fn flush_pending(state: &AppState, user_id: i64, tx: &ConnectionSender) {
    match state.cache.drain_queue(user_id).await {
        Ok(entries) => {
            if entries.is_empty() {
                return;
            }
            tracing::debug!(user_id, count = entries.len(), "flushing pending messages");
            for payload in entries {
                let _ = tx.send(Message::Text(payload.into()));
            }
        }
        Err(e) => {
            tracing::warn!(user_id, error = %e, "failed to drain pending queue");
        }
    }
}

/// Writer task: receives frames from the mpsc channel and forwards them to
/// the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if ws_sender.send(msg).await.is_err() {
            // WebSocket send failed, connection is broken
            break;
        }
    }
}
