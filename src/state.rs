use std::sync::Arc;

use crate::cache::PresenceCache;
use crate::directory::Directory;
use crate::ws::ConnectionRegistry;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Authoritative user/chat/message store
    pub directory: Arc<dyn Directory>,
    /// Membership cache and pending-delivery queues
    pub cache: Arc<PresenceCache>,
    /// Active WebSocket connections, one per user
    pub connections: ConnectionRegistry,
}
