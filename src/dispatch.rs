//! Fan-out dispatcher: one persisted message to every chat member but the
//! sender, online members directly, offline members via the pending queue.

use crate::state::AppState;
use crate::ws::Delivery;

/// Deliver a serialized message frame to every member of `chat_id` except
/// `sender_id`.
///
/// `deliver` is the registry's atomic send-or-miss: a member disconnecting
/// between lookup and write surfaces as `Offline` and falls through to the
/// queue instead of being dropped. Queue failures (presence store down) are
/// logged and skipped; the message is already persisted, so delivery to
/// that member degrades from at-least-once to best-effort.
pub async fn fan_out(state: &AppState, chat_id: i64, sender_id: i64, frame: &str) {
    let members = match state.cache.get_chat_members(chat_id).await {
        Ok(members) => members,
        Err(e) => {
            tracing::warn!(chat_id, error = %e, "fan-out aborted: membership lookup failed");
            return;
        }
    };

    for member in members {
        if member == sender_id {
            continue;
        }
        match state.connections.deliver(member, frame) {
            Delivery::Sent => {
                tracing::trace!(chat_id, member, "delivered live");
            }
            Delivery::Offline => {
                if let Err(e) = state.cache.queue_message(member, frame).await {
                    tracing::warn!(
                        chat_id,
                        member,
                        error = %e,
                        "failed to queue message for offline member"
                    );
                }
            }
        }
    }
}
