// Lobby orchestration for spawning and managing authoritative worlds.

use crate::domain::{LatencySettings, Message, ResyncSettings, World, WorldRules, Zone};
use crate::use_cases::game::world_task;
use crate::use_cases::{GameEvent, GameServer, MessageRouter};
use axum::body::Bytes;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Notify, RwLock, broadcast, mpsc};
use tracing::info;

/// Shared configuration for spawning lobby worlds.
#[derive(Debug, Clone)]
pub struct LobbySettings {
    /// Capacity for inbound connection events.
    pub input_channel_capacity: usize,
    /// Capacity for broadcast commands.
    pub broadcast_capacity: usize,
    /// Fixed tick interval for the game loop.
    pub tick_interval: Duration,
    /// Time between lobby creation and the game starting.
    pub start_delay: Duration,
    pub resync: ResyncSettings,
    pub latency: LatencySettings,
    pub rules: WorldRules,
}

/// Errors returned by lobby registry operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LobbyError {
    #[error("lobby already exists")]
    AlreadyExists,
    #[error("map has no team-owned zone")]
    NoTeams,
}

/// Per-lobby channels.
#[derive(Debug, Clone)]
pub struct LobbyHandle {
    /// Identifier clients use to target this lobby.
    pub lobby_id: Arc<str>,
    /// Sender for connection events into the lobby world task.
    pub input_tx: mpsc::Sender<GameEvent>,
    /// Broadcast sender for commands in issue order.
    pub commands_tx: broadcast::Sender<Message>,
    /// Broadcast sender for encoded commands.
    pub command_bytes_tx: broadcast::Sender<Bytes>,
    /// Stops the world task.
    pub shutdown: Arc<Notify>,
}

/// Thread-safe registry for active lobbies.
#[derive(Debug)]
pub struct LobbyRegistry {
    /// Global settings applied to newly created lobbies.
    settings: LobbySettings,
    router: Arc<MessageRouter>,
    /// Map of lobby id to active handle.
    lobbies: RwLock<HashMap<String, LobbyHandle>>,
}

impl LobbyRegistry {
    pub fn new(settings: LobbySettings, router: Arc<MessageRouter>) -> Self {
        Self {
            settings,
            router,
            lobbies: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a new lobby and spawns its world task. An empty zone list uses the default map.
    pub async fn create_lobby(
        &self,
        lobby_id: String,
        zones: Vec<Zone>,
    ) -> Result<LobbyHandle, LobbyError> {
        // Players join a team, so a map of only neutral zones could never be joined.
        if !zones.is_empty() && zones.iter().all(|z| z.owner.is_none()) {
            return Err(LobbyError::NoTeams);
        }

        let mut lobbies = self.lobbies.write().await;
        if lobbies.contains_key(&lobby_id) {
            return Err(LobbyError::AlreadyExists);
        }

        // Channel wiring for the lobby world loop.
        let (input_tx, input_rx) = mpsc::channel::<GameEvent>(self.settings.input_channel_capacity);
        let (commands_tx, _commands_rx) =
            broadcast::channel::<Message>(self.settings.broadcast_capacity);
        let (command_bytes_tx, _command_bytes_rx) =
            broadcast::channel::<Bytes>(self.settings.broadcast_capacity);
        let shutdown = Arc::new(Notify::new());

        let world = build_world(self.settings.rules, zones);
        let server = GameServer::new(world, self.router.clone(), self.settings.resync)
            .with_latency(self.settings.latency);

        // Spawn the authoritative world loop for this lobby.
        tokio::spawn(world_task(
            server,
            input_rx,
            commands_tx.clone(),
            self.settings.tick_interval,
            self.settings.start_delay,
            shutdown.clone(),
        ));
        info!(%lobby_id, "lobby created");

        let lobby = LobbyHandle {
            lobby_id: Arc::from(lobby_id.clone()),
            input_tx,
            commands_tx,
            command_bytes_tx,
            shutdown,
        };

        lobbies.insert(lobby_id, lobby.clone());
        Ok(lobby)
    }

    /// Returns a lobby handle for the provided id, if it exists.
    pub async fn get_lobby(&self, lobby_id: &str) -> Option<LobbyHandle> {
        let lobbies = self.lobbies.read().await;
        lobbies.get(lobby_id).cloned()
    }

    /// Removes the lobby and stops its world task.
    pub async fn remove_lobby(&self, lobby_id: &str) -> Option<LobbyHandle> {
        let removed = self.lobbies.write().await.remove(lobby_id);
        if let Some(lobby) = &removed {
            lobby.shutdown.notify_one();
            info!(%lobby_id, "lobby removed");
        }
        removed
    }
}

/// Teams come from the zone owners. Unowned zones are neutral.
fn build_world(rules: WorldRules, zones: Vec<Zone>) -> World {
    if zones.is_empty() {
        return World::with_default_layout(rules);
    }

    let mut world = World::new(rules);
    let teams: BTreeSet<_> = zones.iter().filter_map(|z| z.owner).collect();
    for team in teams {
        world.add_team(team, char::from(team).to_string());
    }
    for zone in zones {
        world.add_zone(zone);
    }
    world
}
