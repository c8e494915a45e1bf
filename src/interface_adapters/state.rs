use crate::interface_adapters::protocol::MessageCodec;
use crate::use_cases::{LobbyRegistry, MessageRouter};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct AppState {
    // Active lobbies and their world tasks.
    pub lobby_registry: Arc<LobbyRegistry>,
    // Lobby used when a client does not name one.
    pub default_lobby_id: Arc<str>,
    // Shared binary codec for every connection.
    pub codec: Arc<MessageCodec>,
    // Tag categories, used to reject server-only messages from clients.
    pub router: Arc<MessageRouter>,
}
