// Client side of the protocol: a canonical world fed by server commands, local prediction of
// the agent's own commands, and replies to server corrections.

use super::router::MessageRouter;
use crate::domain::messages::{
    AimPlayerAtMsg, CheckSyncMsg, RespawnRefusal, RespawnRequestMsg, ResyncPlayerMsg,
    ShootRequestMsg, StateKey, UpdatePlayerStateMsg,
};
use crate::domain::tick::is_newer;
use crate::domain::{Message, MessageKind, Player, PlayerId, World, WorldModel};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug)]
pub struct Agent {
    world: World,
    player_id: Option<PlayerId>,
    router: Arc<MessageRouter>,
    last_refusal: Option<RespawnRefusal>,
    // Correction applied and acknowledged, awaiting the server's release.
    applied_resync: Option<ResyncPlayerMsg>,
    // Correction the server has released us from. Late copies of it are stale.
    settled_resync: Option<ResyncPlayerMsg>,
    delay: Option<u16>,
}

impl Agent {
    pub fn new(world: World, router: Arc<MessageRouter>) -> Self {
        Self {
            world,
            player_id: None,
            router,
            last_refusal: None,
            applied_resync: None,
            settled_resync: None,
            delay: None,
        }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn player_id(&self) -> Option<PlayerId> {
        self.player_id
    }

    pub fn player(&self) -> Option<&Player> {
        self.player_id.and_then(|id| self.world.get_player(id))
    }

    pub fn last_refusal(&self) -> Option<RespawnRefusal> {
        self.last_refusal
    }

    /// Ticks of delay the server last reported for this client.
    pub fn delay(&self) -> Option<u16> {
        self.delay
    }

    /// Handles a message from the server and returns any replies for it.
    pub fn receive(&mut self, msg: &Message) -> Vec<Message> {
        let router = Arc::clone(&self.router);
        router.agent_apply(self, msg)
    }

    /// Stamps an outgoing request and predicts its effect when it is a client command.
    fn send(&mut self, msg: Message) -> Message {
        if self.router.kind_of(msg.tag()) == Some(MessageKind::ClientCommand) {
            self.apply_request_to_local_state(&msg);
        }
        msg
    }

    /// Local prediction only. Agent requests wait for the server.
    fn apply_request_to_local_state(&mut self, msg: &Message) {
        self.world.apply_order(msg);
    }

    fn tick_id(&self) -> u16 {
        self.world.last_tick_id()
    }

    pub fn press_key(&mut self, key: StateKey, value: bool) -> Option<Message> {
        let msg = UpdatePlayerStateMsg {
            tick_id: self.tick_id(),
            player_id: self.player_id?,
            key,
            value,
        };
        Some(self.send(msg.into()))
    }

    pub fn aim(&mut self, angle: f32, thrust: f32) -> Option<Message> {
        let msg = AimPlayerAtMsg {
            tick_id: self.tick_id(),
            player_id: self.player_id?,
            angle,
            thrust,
        };
        Some(self.send(msg.into()))
    }

    pub fn request_respawn(&mut self) -> Option<Message> {
        let msg = RespawnRequestMsg {
            tick_id: self.tick_id(),
            player_id: self.player_id?,
        };
        self.last_refusal = None;
        Some(self.send(msg.into()))
    }

    pub fn request_shoot(&mut self) -> Option<Message> {
        let msg = ShootRequestMsg {
            tick_id: self.tick_id(),
            player_id: self.player_id?,
        };
        Some(self.send(msg.into()))
    }

    /// Reports where this client believes its player is.
    pub fn check_sync(&mut self) -> Option<Message> {
        let player = self.player()?;
        let msg = CheckSyncMsg {
            tick_id: self.tick_id(),
            x_pos: player.x,
            y_pos: player.y,
            y_vel: player.y_vel,
        };
        Some(self.send(msg.into()))
    }
}

pub(crate) fn apply_world_order(agent: &mut Agent, msg: &Message) -> Vec<Message> {
    agent.world.apply_order(msg);
    Vec::new()
}

/// Overwrites the local player with the server's state and acknowledges it. Applying the same
/// correction twice leaves the same state and produces the same acknowledgement.
pub(crate) fn apply_resync(agent: &mut Agent, msg: &Message) -> Vec<Message> {
    let Message::ResyncPlayer(resync) = msg else {
        return Vec::new();
    };
    if agent.player_id != Some(resync.update.player_id) {
        debug!(player_id = resync.update.player_id, "resync for another player ignored");
        return Vec::new();
    }
    if let Some(settled) = &agent.settled_resync {
        let late_copy =
            settled.tick_id == resync.tick_id && settled.update.same_state(&resync.update);
        if late_copy || is_newer(settled.tick_id, resync.tick_id) {
            debug!(tick_id = resync.tick_id, "resync already settled ignored");
            return Vec::new();
        }
    }
    // Without the player there is nothing to acknowledge; the server resends.
    let Some(player) = agent.world.get_player_mut(resync.update.player_id) else {
        return Vec::new();
    };

    player.apply_update(&resync.update);
    let ack = player.build_resync_acknowledgement(resync.tick_id);
    agent.applied_resync = Some(resync.clone());
    vec![ack.into()]
}

/// The server accepted an acknowledgement. For our own player this settles the correction
/// we applied for that tick.
pub(crate) fn release_resync(agent: &mut Agent, msg: &Message) -> Vec<Message> {
    agent.world.apply_order(msg);
    if let Message::ResyncAcknowledged(ack) = msg {
        let ours = agent.player_id == Some(ack.player_id);
        if ours
            && agent
                .applied_resync
                .as_ref()
                .is_some_and(|applied| applied.tick_id == ack.tick_id)
        {
            agent.settled_resync = agent.applied_resync.take();
        }
    }
    Vec::new()
}

pub(crate) fn record_delay(agent: &mut Agent, msg: &Message) -> Vec<Message> {
    if let Message::DelayUpdated(update) = msg {
        debug!(delay = update.delay, "server delay estimate changed");
        agent.delay = Some(update.delay);
    }
    Vec::new()
}

pub(crate) fn record_refusal(agent: &mut Agent, msg: &Message) -> Vec<Message> {
    if let Message::CannotRespawn(refusal) = msg {
        debug!(reason = ?refusal.reason, "respawn refused");
        agent.last_refusal = Some(refusal.reason);
    }
    Vec::new()
}

pub(crate) fn record_assignment(agent: &mut Agent, msg: &Message) -> Vec<Message> {
    if let Message::AssignPlayer(assign) = msg {
        agent.player_id = Some(assign.player_id);
    }
    Vec::new()
}
