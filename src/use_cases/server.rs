// Authoritative side of the protocol: validates client messages against the world and drives
// each player's resync state machine.

use super::ledger::{LedgerVerdict, RequestLedger};
use super::router::MessageRouter;
use super::types::Outbound;
use crate::domain::messages::{
    AddPlayerMsg, CannotRespawnMsg, DelayUpdatedMsg, RemovePlayerMsg, RespawnMsg,
    RespawnRefusal, ResyncPlayerMsg, ShotFiredMsg, TeamId, TickMsg,
};
use crate::domain::{
    AckOutcome, LatencySettings, LatencyTracker, Message, PlayerId, RequestError,
    ResyncSettings, ResyncState, ResyncStateMachine, World, WorldModel,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug)]
struct Session {
    resync: ResyncStateMachine,
    ledger: RequestLedger,
    latency: LatencyTracker,
}

#[derive(Debug)]
pub struct GameServer {
    world: World,
    sessions: HashMap<PlayerId, Session>,
    router: Arc<MessageRouter>,
    settings: ResyncSettings,
    latency: LatencySettings,
}

impl GameServer {
    pub fn new(world: World, router: Arc<MessageRouter>, settings: ResyncSettings) -> Self {
        Self {
            world,
            sessions: HashMap::new(),
            router,
            settings,
            latency: LatencySettings::default(),
        }
    }

    pub fn with_latency(mut self, latency: LatencySettings) -> Self {
        self.latency = latency;
        self
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn resync_state(&self, player_id: PlayerId) -> Option<&ResyncState> {
        self.sessions.get(&player_id).map(|s| s.resync.state())
    }

    /// Ticks of delay currently assumed for the player's client.
    pub fn assumed_delay(&self, player_id: PlayerId) -> Option<u16> {
        self.sessions.get(&player_id).map(|s| s.latency.current())
    }

    pub fn start_game(&mut self) {
        self.world.start_game();
    }

    fn now(&self) -> u64 {
        self.world.monotonic_tick()
    }

    /// Adds a player to the smallest team. Returns `None` when every player id is taken.
    pub fn join(&mut self, nick: &str) -> Option<(PlayerId, Vec<Outbound>)> {
        let player_id = (1..=PlayerId::MAX).find(|id| self.world.get_player(*id).is_none())?;
        let team_id = self.smallest_team()?;
        let zone_id = self.world.home_zone(team_id)?.id;

        // Catch the newcomer up on everyone already in the world.
        let mut outbound: Vec<Outbound> = self
            .snapshot()
            .into_iter()
            .map(|msg| Outbound::ToPlayer(player_id, msg))
            .collect();

        let add = Message::from(AddPlayerMsg {
            player_id,
            team_id,
            zone_id,
            dead: true,
            nick: nick.as_bytes().to_vec(),
        });
        self.world.apply_order(&add);
        outbound.push(Outbound::ToPlayer(player_id, add.clone()));
        outbound.push(Outbound::Broadcast(add));

        let now = self.now();
        self.sessions.insert(
            player_id,
            Session {
                resync: ResyncStateMachine::new(self.settings),
                ledger: RequestLedger::new(),
                latency: LatencyTracker::new(self.latency, now),
            },
        );
        info!(player_id, team_id, zone_id, nick, "player joined");

        // The client has no agreed state yet, so it starts with a correction.
        outbound.extend(self.send_resync(player_id));
        Some((player_id, outbound))
    }

    fn smallest_team(&self) -> Option<TeamId> {
        self.world.team_ids().min_by_key(|team| {
            self.world
                .players()
                .filter(|p| p.team == *team)
                .count()
        })
    }

    /// Add and update orders describing every current player.
    fn snapshot(&self) -> Vec<Message> {
        self.world
            .players()
            .flat_map(|p| {
                [
                    AddPlayerMsg {
                        player_id: p.id,
                        team_id: p.team,
                        zone_id: p.zone,
                        dead: !p.is_alive(),
                        nick: p.nick.as_bytes().to_vec(),
                    }
                    .into(),
                    Message::from(p.update_args(p.resyncing)),
                ]
            })
            .collect()
    }

    pub fn leave(&mut self, player_id: PlayerId) -> Vec<Outbound> {
        self.sessions.remove(&player_id);
        match self.world.remove_player(player_id) {
            Some(_) => {
                info!(player_id, "player left");
                vec![Outbound::Broadcast(RemovePlayerMsg { player_id }.into())]
            }
            None => Vec::new(),
        }
    }

    /// Entry point for every decoded client message.
    pub fn handle_message(&mut self, player_id: PlayerId, msg: &Message) -> Vec<Outbound> {
        let tag = msg.tag();
        if !self.router.accepts_from_client(tag) {
            warn!(player_id, %tag, "server-only message from client ignored");
            return Vec::new();
        }
        if msg.player_id().is_some_and(|claimed| claimed != player_id) {
            warn!(player_id, %tag, claimed = msg.player_id(), "message for another player ignored");
            return Vec::new();
        }
        let now = self.now();
        let server_tick = self.world.last_tick_id();
        let Some(session) = self.sessions.get_mut(&player_id) else {
            debug!(player_id, %tag, "message from unknown player ignored");
            return Vec::new();
        };

        // Acknowledgements carry the tick of the resync they answer, not the client's clock,
        // so they bypass ordering and are checked by the resync state machine instead.
        let is_ack = matches!(msg, Message::ResyncAcknowledged(_));
        if !is_ack {
            match session.ledger.check(msg, now) {
                LedgerVerdict::Accept => {}
                verdict => {
                    debug!(player_id, %tag, ?verdict, tick_id = msg.client_tick(), "message discarded");
                    return Vec::new();
                }
            }
        }

        let mut outbound = Vec::new();
        let spike = msg
            .client_tick()
            .and_then(|stamped| session.latency.observe(stamped, server_tick));
        if let Some(delay) = spike {
            outbound.push(Outbound::ToPlayer(player_id, DelayUpdatedMsg { delay }.into()));
            if !is_ack {
                // The request was predicted against a world the server has moved past.
                warn!(player_id, %tag, delay, "latency spike; resyncing instead of applying");
                outbound.extend(self.send_resync(player_id));
                return outbound;
            }
        }

        let router = Arc::clone(&self.router);
        outbound.extend(router.server_apply(self, player_id, msg));
        outbound
    }

    /// Advances the world one tick and services pending resyncs.
    pub fn tick(&mut self) -> Vec<Outbound> {
        self.world.tick();
        let now = self.now();
        let mut outbound = vec![Outbound::Broadcast(
            TickMsg {
                tick_id: self.world.last_tick_id(),
            }
            .into(),
        )];

        let mut expired = Vec::new();
        for (&player_id, session) in &mut self.sessions {
            if session.resync.expired(now) {
                expired.push(player_id);
            } else if let Some(msg) = session.resync.retry_due(now) {
                debug!(player_id, tick_id = msg.tick_id, "resending unacknowledged resync");
                outbound.push(Outbound::ToPlayer(player_id, msg.into()));
            }
            if let Some(delay) = session.latency.roll_window(now) {
                debug!(player_id, delay, "assumed delay lowered");
                outbound.push(Outbound::ToPlayer(player_id, DelayUpdatedMsg { delay }.into()));
            }
        }

        for player_id in expired {
            warn!(player_id, "resync never acknowledged; removing player");
            outbound.extend(self.leave(player_id));
        }
        outbound
    }

    /// Sends the player's authoritative state to its client and the matching ghost update to
    /// everyone else. Nothing is sent if the same correction is already outstanding.
    pub fn send_resync(&mut self, player_id: PlayerId) -> Vec<Outbound> {
        let tick_id = self.world.last_tick_id();
        let now = self.now();
        let Some(player) = self.world.get_player_mut(player_id) else {
            return Vec::new();
        };
        let Some(session) = self.sessions.get_mut(&player_id) else {
            return Vec::new();
        };

        player.resyncing = true;
        let msg = ResyncPlayerMsg {
            tick_id,
            update: player.update_args(true),
        };
        match session.resync.begin(msg, now) {
            Some(sent) => {
                debug!(player_id, tick_id, "resync sent");
                let ghost = Outbound::Broadcast(sent.update.clone().into());
                vec![Outbound::ToPlayer(player_id, sent.into()), ghost]
            }
            None => {
                debug!(player_id, "resync already outstanding");
                Vec::new()
            }
        }
    }

    /// Recovery for a client that missed broadcast commands: full world state plus its own
    /// correction, re-sent even if one is already outstanding.
    pub fn resync_requested(&mut self, player_id: PlayerId) -> Vec<Outbound> {
        if !self.sessions.contains_key(&player_id) {
            return Vec::new();
        }
        let mut outbound: Vec<Outbound> = self
            .snapshot()
            .into_iter()
            .map(|msg| Outbound::ToPlayer(player_id, msg))
            .collect();

        let resync = self.send_resync(player_id);
        if resync.is_empty() {
            if let Some(sent) = self
                .sessions
                .get(&player_id)
                .and_then(|s| s.resync.outstanding())
            {
                outbound.push(Outbound::ToPlayer(player_id, sent.clone().into()));
            }
        }
        outbound.extend(resync);
        outbound
    }

    /// Authoritative teleport; the client is corrected straight away.
    pub fn move_player(&mut self, player_id: PlayerId, x: f32, y: f32) -> Vec<Outbound> {
        match self.world.get_player_mut(player_id) {
            Some(player) => player.set_pos(x, y),
            None => return Vec::new(),
        }
        self.send_resync(player_id)
    }

    fn is_resyncing(&self, player_id: PlayerId) -> bool {
        let pending = self
            .sessions
            .get(&player_id)
            .is_some_and(|s| s.resync.is_pending());
        let frozen = self
            .world
            .get_player(player_id)
            .is_some_and(|p| p.resyncing);
        pending || frozen
    }
}

fn refusal(reason: RespawnRefusal) -> Message {
    CannotRespawnMsg { reason }.into()
}

/// Client position report. Drift from server truth starts a resync.
pub(crate) fn check_sync(
    game: &mut GameServer,
    player_id: PlayerId,
    msg: &Message,
) -> Result<Vec<Outbound>, RequestError> {
    let Message::CheckSync(report) = msg else {
        return Ok(Vec::new());
    };
    // Reports made before the client applied its correction say nothing about the present.
    if game.is_resyncing(player_id) {
        return Ok(Vec::new());
    }
    let (Some(session), Some(truth)) = (
        game.sessions.get(&player_id),
        game.world.get_player(player_id),
    ) else {
        return Ok(Vec::new());
    };

    if session.resync.detect_drift(report, truth) {
        debug!(
            player_id,
            tick_id = report.tick_id,
            reported_x = report.x_pos,
            reported_y = report.y_pos,
            x = truth.x,
            y = truth.y,
            "client position drifted"
        );
        return Err(RequestError::DesyncDetected("position drift"));
    }
    Ok(Vec::new())
}

/// Client confirmation that it applied a resync.
pub(crate) fn acknowledge_resync(
    game: &mut GameServer,
    player_id: PlayerId,
    msg: &Message,
) -> Result<Vec<Outbound>, RequestError> {
    let Message::ResyncAcknowledged(ack) = msg else {
        return Ok(Vec::new());
    };
    let Some(session) = game.sessions.get_mut(&player_id) else {
        return Ok(Vec::new());
    };

    match session.resync.acknowledge(ack) {
        AckOutcome::Accepted => {
            game.world.apply_order(msg);
            info!(player_id, tick_id = ack.tick_id, "resync acknowledged");
            Ok(vec![Outbound::Broadcast(msg.clone())])
        }
        AckOutcome::Repeated => {
            // A late copy of the correction froze the client again; release it once more.
            debug!(player_id, tick_id = ack.tick_id, "repeated acknowledgement answered");
            Ok(vec![Outbound::ToPlayer(player_id, msg.clone())])
        }
        outcome => {
            debug!(player_id, tick_id = ack.tick_id, ?outcome, "acknowledgement ignored");
            Ok(Vec::new())
        }
    }
}

/// Key and aim changes. Applied and rebroadcast unless the player is being corrected.
pub(crate) fn client_command(
    game: &mut GameServer,
    player_id: PlayerId,
    msg: &Message,
) -> Result<Vec<Outbound>, RequestError> {
    if game.is_resyncing(player_id) {
        debug!(player_id, tag = %msg.tag(), "command ignored while resyncing");
        return Ok(Vec::new());
    }
    if !game.world.apply_order(msg) {
        return Ok(Vec::new());
    }
    Ok(vec![Outbound::Broadcast(msg.clone())])
}

pub(crate) fn respawn_request(
    game: &mut GameServer,
    player_id: PlayerId,
    _msg: &Message,
) -> Result<Vec<Outbound>, RequestError> {
    if game.is_resyncing(player_id) {
        return Ok(Vec::new());
    }
    if !game.world.game_started() {
        return Err(RequestError::InvalidRequest(refusal(
            RespawnRefusal::GameNotStarted,
        )));
    }
    let Some(player) = game.world.get_player(player_id) else {
        return Ok(Vec::new());
    };

    let zone = game.world.zone(player.zone);
    let verdict = if player.is_alive() {
        Some(RespawnRefusal::AlreadyAlive)
    } else if player.respawn_time > 0.0 {
        Some(RespawnRefusal::TooSoon)
    } else if zone.is_none_or(|z| z.owner != Some(player.team)) {
        Some(RespawnRefusal::EnemyZone)
    } else if zone.is_some_and(|z| z.frozen) {
        Some(RespawnRefusal::FrozenZone)
    } else {
        None
    };

    match verdict {
        Some(reason) if reason.implies_desync() => {
            // The client thought it could respawn here, so its picture of itself is wrong.
            let mut outbound = vec![Outbound::ToPlayer(player_id, refusal(reason))];
            outbound.extend(game.send_resync(player_id));
            Ok(outbound)
        }
        Some(reason) => Err(RequestError::InvalidRequest(refusal(reason))),
        None => {
            let order = Message::from(RespawnMsg {
                player_id,
                zone_id: player.zone,
            });
            game.world.apply_order(&order);
            Ok(vec![Outbound::Broadcast(order)])
        }
    }
}

pub(crate) fn shoot_request(
    game: &mut GameServer,
    player_id: PlayerId,
    _msg: &Message,
) -> Result<Vec<Outbound>, RequestError> {
    if game.is_resyncing(player_id) {
        return Ok(Vec::new());
    }
    let Some(player) = game.world.get_player(player_id) else {
        return Ok(Vec::new());
    };
    if !player.is_alive() {
        return Err(RequestError::DesyncDetected("shot while dead"));
    }
    if player.gun_reload > 0.0 {
        return Err(RequestError::DesyncDetected("shot while reloading"));
    }

    let (x_pos, y_pos, angle) = (player.x, player.y, player.angle);
    let shot = Message::from(ShotFiredMsg {
        player_id,
        shot_id: game.world.allocate_shot_id(),
        x_pos,
        y_pos,
        angle,
    });
    game.world.apply_order(&shot);
    Ok(vec![Outbound::Broadcast(shot)])
}
