// World model: players, teams, zones and shots, advanced one tick at a time.

use super::messages::{
    AddPlayerMsg, Message, PlayerId, ShotFiredMsg, ShotId, TeamId, TickId, ZoneId,
};
use super::player::Player;
use std::collections::BTreeMap;

/// Lookups and advancement the protocol core needs from a world.
pub trait WorldModel {
    fn get_player(&self, id: PlayerId) -> Option<&Player>;
    fn get_player_mut(&mut self, id: PlayerId) -> Option<&mut Player>;
    fn get_shot(&self, id: ShotId) -> Option<&Shot>;
    fn get_team(&self, id: TeamId) -> Option<&Team>;
    fn tick(&mut self);
}

#[derive(Debug, Clone, Copy)]
pub struct WorldRules {
    /// Seconds of simulated time per tick.
    pub tick_period: f32,
    pub respawn_health: u8,
    pub respawn_delay: f32,
    pub reload_time: f32,
    pub shot_speed: f32,
    pub shot_lifetime: f32,
}

impl Default for WorldRules {
    fn default() -> Self {
        Self {
            tick_period: 1.0 / 60.0,
            respawn_health: 3,
            respawn_delay: 3.0,
            reload_time: 0.3,
            shot_speed: 600.0,
            shot_lifetime: 1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Team {
    pub id: TeamId,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct Zone {
    pub id: ZoneId,
    pub owner: Option<TeamId>,
    pub frozen: bool,
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone)]
pub struct Shot {
    pub id: ShotId,
    pub owner: PlayerId,
    pub x: f32,
    pub y: f32,
    pub angle: f32,
    pub ttl: f32,
}

#[derive(Debug, Clone)]
pub struct World {
    rules: WorldRules,
    players: BTreeMap<PlayerId, Player>,
    teams: BTreeMap<TeamId, Team>,
    zones: BTreeMap<ZoneId, Zone>,
    shots: BTreeMap<ShotId, Shot>,
    next_shot_id: ShotId,
    last_tick_id: TickId,
    monotonic_tick: u64,
    game_started: bool,
}

impl World {
    pub fn new(rules: WorldRules) -> Self {
        Self {
            rules,
            players: BTreeMap::new(),
            teams: BTreeMap::new(),
            zones: BTreeMap::new(),
            shots: BTreeMap::new(),
            next_shot_id: 1,
            last_tick_id: 0,
            monotonic_tick: 0,
            game_started: false,
        }
    }

    /// Two teams with two zones each.
    pub fn with_default_layout(rules: WorldRules) -> Self {
        let mut world = Self::new(rules);
        world.add_team(b'A', "Blue");
        world.add_team(b'B', "Red");
        world.add_zone(Zone {
            id: 1,
            owner: Some(b'A'),
            frozen: false,
            x: -300.0,
            y: 0.0,
        });
        world.add_zone(Zone {
            id: 2,
            owner: Some(b'A'),
            frozen: false,
            x: -100.0,
            y: 0.0,
        });
        world.add_zone(Zone {
            id: 3,
            owner: Some(b'B'),
            frozen: false,
            x: 100.0,
            y: 0.0,
        });
        world.add_zone(Zone {
            id: 4,
            owner: Some(b'B'),
            frozen: false,
            x: 300.0,
            y: 0.0,
        });
        world
    }

    pub fn add_team(&mut self, id: TeamId, name: impl Into<String>) {
        self.teams.insert(
            id,
            Team {
                id,
                name: name.into(),
            },
        );
    }

    pub fn add_zone(&mut self, zone: Zone) {
        self.zones.insert(zone.id, zone);
    }

    pub fn zone(&self, id: ZoneId) -> Option<&Zone> {
        self.zones.get(&id)
    }

    pub fn zone_mut(&mut self, id: ZoneId) -> Option<&mut Zone> {
        self.zones.get_mut(&id)
    }

    pub fn team_ids(&self) -> impl Iterator<Item = TeamId> + '_ {
        self.teams.keys().copied()
    }

    /// First zone held by `team`, falling back to any zone.
    pub fn home_zone(&self, team: TeamId) -> Option<&Zone> {
        self.zones
            .values()
            .find(|z| z.owner == Some(team))
            .or_else(|| self.zones.values().next())
    }

    pub fn add_player(&mut self, player: Player) {
        self.players.insert(player.id, player);
    }

    pub fn remove_player(&mut self, id: PlayerId) -> Option<Player> {
        self.shots.retain(|_, s| s.owner != id);
        self.players.remove(&id)
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn shots(&self) -> impl Iterator<Item = &Shot> {
        self.shots.values()
    }

    pub fn game_started(&self) -> bool {
        self.game_started
    }

    pub fn start_game(&mut self) {
        self.game_started = true;
    }

    pub fn last_tick_id(&self) -> TickId {
        self.last_tick_id
    }

    /// Ticks since the world was created; never wraps in practice.
    pub fn monotonic_tick(&self) -> u64 {
        self.monotonic_tick
    }

    pub fn allocate_shot_id(&mut self) -> ShotId {
        let id = self.next_shot_id;
        self.next_shot_id = self.next_shot_id.wrapping_add(1).max(1);
        id
    }

    /// Applies a server command to this world. Returns false for messages that are not world
    /// orders or that name an unknown player.
    pub fn apply_order(&mut self, msg: &Message) -> bool {
        match msg {
            Message::Tick(m) => {
                self.tick();
                self.last_tick_id = m.tick_id;
                true
            }
            Message::PlayerUpdate(m) => self.with_player(m.player_id, |p| p.apply_update(m)),
            Message::Respawn(m) => {
                let health = self.rules.respawn_health;
                let Some((x, y)) = self.zone(m.zone_id).map(|z| (z.x, z.y)) else {
                    return false;
                };
                self.with_player(m.player_id, |p| {
                    p.zone = m.zone_id;
                    p.return_to_life(health);
                    p.set_pos(x, y);
                })
            }
            Message::ShotFired(m) => {
                if self.players.get(&m.player_id).is_none() {
                    return false;
                }
                self.insert_shot(m);
                true
            }
            // Joins can reach a client twice (snapshot and broadcast); the first one wins.
            Message::AddPlayer(m) if self.players.contains_key(&m.player_id) => false,
            Message::AddPlayer(m) => {
                self.add_player_from(m);
                true
            }
            Message::RemovePlayer(m) => self.remove_player(m.player_id).is_some(),
            Message::UpdatePlayerState(m) => {
                self.with_player(m.player_id, |p| p.update_state(m.key, m.value))
            }
            Message::AimPlayerAt(m) => {
                self.with_player(m.player_id, |p| p.look_at(m.angle, m.thrust))
            }
            Message::ResyncAcknowledged(m) => self.with_player(m.player_id, |p| {
                p.resyncing = false;
                p.last_acknowledged_tick = Some(m.tick_id);
            }),
            Message::ResyncPlayer(_)
            | Message::CheckSync(_)
            | Message::CannotRespawn(_)
            | Message::RespawnRequest(_)
            | Message::ShootRequest(_)
            | Message::AssignPlayer(_)
            | Message::DelayUpdated(_) => false,
        }
    }

    fn with_player(&mut self, id: PlayerId, f: impl FnOnce(&mut Player)) -> bool {
        match self.players.get_mut(&id) {
            Some(player) => {
                f(player);
                true
            }
            None => false,
        }
    }

    fn add_player_from(&mut self, msg: &AddPlayerMsg) {
        let nick = String::from_utf8_lossy(&msg.nick).into_owned();
        let mut player = Player::new(msg.player_id, nick, msg.team_id, msg.zone_id);
        if let Some(zone) = self.zone(msg.zone_id) {
            player.set_pos(zone.x, zone.y);
        }
        if !msg.dead {
            player.return_to_life(self.rules.respawn_health);
        }
        // A new player has no agreed state until the first resync is acknowledged.
        player.resyncing = true;
        self.add_player(player);
    }

    fn insert_shot(&mut self, msg: &ShotFiredMsg) {
        let reload = self.rules.reload_time;
        self.shots.insert(
            msg.shot_id,
            Shot {
                id: msg.shot_id,
                owner: msg.player_id,
                x: msg.x_pos,
                y: msg.y_pos,
                angle: msg.angle,
                ttl: self.rules.shot_lifetime,
            },
        );
        if let Some(player) = self.players.get_mut(&msg.player_id) {
            player.gun_reload = reload;
        }
    }
}

impl WorldModel for World {
    fn get_player(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(&id)
    }

    fn get_player_mut(&mut self, id: PlayerId) -> Option<&mut Player> {
        self.players.get_mut(&id)
    }

    fn get_shot(&self, id: ShotId) -> Option<&Shot> {
        self.shots.get(&id)
    }

    fn get_team(&self, id: TeamId) -> Option<&Team> {
        self.teams.get(&id)
    }

    fn tick(&mut self) {
        let dt = self.rules.tick_period;
        self.monotonic_tick += 1;
        self.last_tick_id = self.last_tick_id.wrapping_add(1);

        for player in self.players.values_mut() {
            player.advance(dt);
        }

        // Shots travel along their facing (clockwise from vertical).
        let speed = self.rules.shot_speed;
        for shot in self.shots.values_mut() {
            shot.x += shot.angle.sin() * speed * dt;
            shot.y -= shot.angle.cos() * speed * dt;
            shot.ttl -= dt;
        }
        self.shots.retain(|_, s| s.ttl > 0.0);
    }
}
