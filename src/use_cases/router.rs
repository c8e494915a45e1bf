// Tag-indexed dispatch of decoded messages to server, agent and prediction handlers.

use super::agent::{self, Agent};
use super::server::{self, GameServer};
use super::types::Outbound;
use crate::domain::messages::{
    AddPlayerMsg, AimPlayerAtMsg, AssignPlayerMsg, CannotRespawnMsg, CheckSyncMsg,
    DelayUpdatedMsg, PlayerUpdateMsg, RemovePlayerMsg, RespawnMsg, RespawnRequestMsg,
    ResyncAcknowledgedMsg, ResyncPlayerMsg, ShootRequestMsg, ShotFiredMsg, TickMsg,
    UpdatePlayerStateMsg,
};
use crate::domain::{Message, MessageKind, MessageTag, PlayerId, RequestError, WireMessage};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

/// Validates a client message against the authoritative world.
pub type ServerHandler =
    fn(&mut GameServer, PlayerId, &Message) -> Result<Vec<Outbound>, RequestError>;

/// Applies a server message on the client. Returns replies to send back.
pub type AgentHandler = fn(&mut Agent, &Message) -> Vec<Message>;

#[derive(Clone, Copy)]
pub struct Route {
    pub kind: MessageKind,
    pub server: Option<ServerHandler>,
    pub agent: Option<AgentHandler>,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("kind", &self.kind)
            .field("server", &self.server.is_some())
            .field("agent", &self.agent.is_some())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct MessageRouter {
    routes: HashMap<MessageTag, Route>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }

    /// Adds a route for `M`. The category always comes from the message type itself.
    pub fn route<M: WireMessage>(
        mut self,
        server: Option<ServerHandler>,
        agent: Option<AgentHandler>,
    ) -> Self {
        self.routes.insert(
            M::TAG,
            Route {
                kind: M::KIND,
                server,
                agent,
            },
        );
        self
    }

    /// Routes for the full message catalogue.
    pub fn standard() -> Self {
        let world_order: AgentHandler = agent::apply_world_order;

        Self::new()
            .route::<TickMsg>(None, Some(world_order))
            .route::<PlayerUpdateMsg>(None, Some(world_order))
            .route::<ResyncPlayerMsg>(None, Some(agent::apply_resync))
            .route::<CheckSyncMsg>(Some(server::check_sync), None)
            // The server rebroadcasts accepted acknowledgements as the world-level signal that
            // the player is no longer resyncing.
            .route::<ResyncAcknowledgedMsg>(
                Some(server::acknowledge_resync),
                Some(agent::release_resync),
            )
            .route::<CannotRespawnMsg>(None, Some(agent::record_refusal))
            .route::<UpdatePlayerStateMsg>(Some(server::client_command), Some(world_order))
            .route::<AimPlayerAtMsg>(Some(server::client_command), Some(world_order))
            .route::<RespawnRequestMsg>(Some(server::respawn_request), None)
            .route::<ShootRequestMsg>(Some(server::shoot_request), None)
            .route::<RespawnMsg>(None, Some(world_order))
            .route::<ShotFiredMsg>(None, Some(world_order))
            .route::<AddPlayerMsg>(None, Some(world_order))
            .route::<RemovePlayerMsg>(None, Some(world_order))
            .route::<AssignPlayerMsg>(None, Some(agent::record_assignment))
            .route::<DelayUpdatedMsg>(None, Some(agent::record_delay))
    }

    pub fn get(&self, tag: MessageTag) -> Option<&Route> {
        self.routes.get(&tag)
    }

    pub fn kind_of(&self, tag: MessageTag) -> Option<MessageKind> {
        self.get(tag).map(|r| r.kind)
    }

    /// Only client commands and agent requests may arrive from a client.
    pub fn accepts_from_client(&self, tag: MessageTag) -> bool {
        self.kind_of(tag)
            .is_some_and(MessageKind::is_client_originated)
    }

    /// Runs the server handler for `msg`. Rejections become a reply to the originator and
    /// detected desyncs become a resync; neither is surfaced to the caller.
    pub fn server_apply(
        &self,
        game: &mut GameServer,
        player_id: PlayerId,
        msg: &Message,
    ) -> Vec<Outbound> {
        let tag = msg.tag();
        let Some(handler) = self.get(tag).and_then(|r| r.server) else {
            warn!(player_id, %tag, "no server handler for message");
            return Vec::new();
        };

        match handler(game, player_id, msg) {
            Ok(outbound) => outbound,
            Err(RequestError::InvalidRequest(reply)) => {
                debug!(player_id, %tag, reply = %reply.tag(), "request rejected");
                vec![Outbound::ToPlayer(player_id, reply)]
            }
            Err(RequestError::DesyncDetected(reason)) => {
                debug!(player_id, %tag, reason, "desync detected");
                game.send_resync(player_id)
            }
        }
    }

    /// Runs the agent handler for a message received from the server.
    pub fn agent_apply(&self, agent: &mut Agent, msg: &Message) -> Vec<Message> {
        match self.get(msg.tag()).and_then(|r| r.agent) {
            Some(handler) => handler(agent, msg),
            None => {
                debug!(tag = %msg.tag(), "no agent handler for message");
                Vec::new()
            }
        }
    }
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::standard()
    }
}
