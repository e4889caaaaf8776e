//! WebSocket upgrade endpoint.

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};

use crate::state::AppState;
use crate::ws::actor;

/// Close code for an upgrade addressed to an unknown user id.
const CLOSE_UNKNOWN_USER: u16 = 4004;

/// GET /ws/{user_id}
/// WebSocket upgrade endpoint. The connection is addressed by user id; an
/// unknown id upgrades and is immediately closed with code 4004 so the
/// client sees a definite rejection rather than a hung handshake.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    ws: WebSocketUpgrade,
) -> Response {
    let known = matches!(state.directory.get_user(user_id).await, Ok(Some(_)));

    if known {
        ws.on_upgrade(move |socket| actor::run_connection(socket, state, user_id))
    } else {
        tracing::warn!(user_id, "rejecting connection for unknown user");
        ws.on_upgrade(move |mut socket: WebSocket| async move {
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: CLOSE_UNKNOWN_USER,
                    reason: "unknown user".into(),
                })))
                .await;
        })
    }
}
