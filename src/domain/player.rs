// Replicated per-player state and the rules for applying updates to it.

use super::messages::{
    KeyFlags, PlayerId, PlayerUpdateMsg, ResyncAcknowledgedMsg, StateKey, TeamId, TickId, ZoneId,
};
use std::f32::consts::PI;

/// Default tolerance for float comparisons between client and server state.
pub const NEAR_EPSILON: f32 = 1e-3;

pub fn is_near(a: f32, b: f32, epsilon: f32) -> bool {
    (a - b).abs() <= epsilon
}

#[derive(Debug, Clone, PartialEq)]
pub struct Emote {
    pub id: u32,
    pub ticks_remaining: u32,
}

#[derive(Debug, Clone)]
pub struct Player {
    pub id: PlayerId,
    pub nick: String,
    pub team: TeamId,
    pub zone: ZoneId,

    pub x: f32,
    pub y: f32,
    pub x_vel: f32,
    pub y_vel: f32,
    /// Radians, clockwise from vertical, normalised to [-pi, pi).
    pub angle: f32,
    pub ghost_thrust: f32,

    // Timers, in seconds.
    pub jump_time: f32,
    pub gun_reload: f32,
    pub respawn_time: f32,

    pub coins: u32,
    pub health: u8,

    /// Set while the server is correcting this player's client-side prediction.
    pub resyncing: bool,
    pub last_acknowledged_tick: Option<TickId>,

    pub keys: KeyFlags,
    pub ignore: KeyFlags,
    pub grip_countdown: f32,
    pub grabbed_surface_angle: Option<f32>,
    pub emote: Option<Emote>,
    // Opaque to this crate; replicated verbatim.
    pub grappling_hook_state: Vec<u8>,
}

impl Player {
    pub fn new(id: PlayerId, nick: impl Into<String>, team: TeamId, zone: ZoneId) -> Self {
        Self {
            id,
            nick: nick.into(),
            team,
            zone,
            x: 0.0,
            y: 0.0,
            x_vel: 0.0,
            y_vel: 0.0,
            angle: 0.0,
            ghost_thrust: 0.0,
            jump_time: 0.0,
            gun_reload: 0.0,
            respawn_time: 0.0,
            coins: 0,
            health: 0,
            resyncing: false,
            last_acknowledged_tick: None,
            keys: KeyFlags::default(),
            ignore: KeyFlags::default(),
            grip_countdown: 0.0,
            grabbed_surface_angle: None,
            emote: None,
            grappling_hook_state: Vec::new(),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.health > 0
    }

    pub fn set_pos(&mut self, x: f32, y: f32) {
        self.x = x;
        self.y = y;
    }

    /// Key press or release. Ignored while resyncing.
    pub fn update_state(&mut self, key: StateKey, value: bool) {
        if self.resyncing {
            return;
        }
        self.ignore.set(key, false);
        self.keys.set(key, value);
    }

    /// Changes where the player is aiming. Ignored while resyncing.
    pub fn look_at(&mut self, angle: f32, thrust: f32) {
        if self.resyncing {
            return;
        }
        self.ghost_thrust = thrust.clamp(0.0, 1.0);
        self.angle = normalise_angle(angle);
    }

    pub fn return_to_life(&mut self, health: u8) {
        self.health = health;
        self.respawn_time = 0.0;
        self.x_vel = 0.0;
        self.y_vel = 0.0;
        self.grip_countdown = 0.0;
        self.grabbed_surface_angle = None;
    }

    fn clear_life_state(&mut self) {
        self.jump_time = 0.0;
        self.grip_countdown = 0.0;
        self.grabbed_surface_angle = None;
        self.grappling_hook_state.clear();
    }

    /// Advances timers and position by one tick. Frozen while resyncing.
    pub fn advance(&mut self, dt: f32) {
        if self.resyncing {
            return;
        }

        if let Some(emote) = &mut self.emote {
            emote.ticks_remaining = emote.ticks_remaining.saturating_sub(1);
            if emote.ticks_remaining == 0 {
                self.emote = None;
            }
        }
        self.gun_reload = (self.gun_reload - dt).max(0.0);
        self.jump_time = (self.jump_time - dt).max(0.0);

        if !self.is_alive() {
            self.respawn_time = (self.respawn_time - dt).max(0.0);
            return;
        }

        self.x += self.x_vel * dt;
        self.y += self.y_vel * dt;
    }

    /// Snapshot of the full replicated state.
    pub fn update_args(&self, resync: bool) -> PlayerUpdateMsg {
        PlayerUpdateMsg {
            player_id: self.id,
            x_pos: self.x,
            y_pos: self.y,
            x_vel: self.x_vel,
            y_vel: self.y_vel,
            angle: self.angle,
            ghost_thrust: self.ghost_thrust,
            jump_time: self.jump_time,
            gun_reload: self.gun_reload,
            respawn: self.respawn_time,
            coins: self.coins,
            health: self.health,
            resync,
            keys: self.keys,
            ignore: self.ignore,
            grip_countdown: self.grip_countdown,
            grabbed_surface_angle: self.grabbed_surface_angle,
            emote_id: self.emote.as_ref().map_or(0, |e| e.id),
            emote_ticks: self.emote.as_ref().map_or(0, |e| e.ticks_remaining),
            grappling_hook_state: self.grappling_hook_state.clone(),
        }
    }

    /// Overwrites local state with an authoritative update. Applying the same update twice
    /// leaves the player exactly as applying it once.
    pub fn apply_update(&mut self, msg: &PlayerUpdateMsg) {
        self.keys = msg.keys;
        self.ignore = msg.ignore;
        self.x_vel = msg.x_vel;
        self.y_vel = msg.y_vel;
        self.angle = msg.angle;
        self.ghost_thrust = msg.ghost_thrust;
        self.set_pos(msg.x_pos, msg.y_pos);
        self.jump_time = msg.jump_time;
        self.gun_reload = msg.gun_reload;
        self.respawn_time = msg.respawn;
        self.coins = msg.coins;
        self.grip_countdown = msg.grip_countdown;
        self.grabbed_surface_angle = msg.grabbed_surface_angle;
        self.health = msg.health;
        self.grappling_hook_state = msg.grappling_hook_state.clone();
        if !self.is_alive() {
            self.clear_life_state();
        }

        self.resyncing = msg.resync;

        self.emote = (msg.emote_ticks > 0).then(|| Emote {
            id: msg.emote_id,
            ticks_remaining: msg.emote_ticks,
        });
    }

    pub fn build_resync_acknowledgement(&self, tick_id: TickId) -> ResyncAcknowledgedMsg {
        ResyncAcknowledgedMsg {
            tick_id,
            x_pos: self.x,
            y_pos: self.y,
            y_vel: self.y_vel,
            angle: self.angle,
            ghost_thrust: self.ghost_thrust,
            health: self.health,
            player_id: self.id,
        }
    }
}

fn normalise_angle(angle: f32) -> f32 {
    (angle + PI).rem_euclid(2.0 * PI) - PI
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alive_player() -> Player {
        let mut player = Player::new(b'a', "Pilot", b'A', 1);
        player.return_to_life(100);
        player.set_pos(10.0, 20.0);
        player
    }

    #[test]
    fn applying_an_update_twice_matches_applying_it_once() {
        let mut source = alive_player();
        source.x_vel = 3.0;
        source.coins = 7;
        source.grabbed_surface_angle = Some(0.5);
        source.emote = Some(Emote {
            id: 2,
            ticks_remaining: 9,
        });
        let update = source.update_args(true);

        let mut once = Player::new(b'a', "Pilot", b'A', 1);
        once.apply_update(&update);
        let mut twice = Player::new(b'a', "Pilot", b'A', 1);
        twice.apply_update(&update);
        twice.apply_update(&update);

        assert!(once.update_args(true).same_state(&twice.update_args(true)));
        assert!(twice.resyncing);
        assert_eq!(twice.coins, 7);
        assert_eq!(twice.grabbed_surface_angle, Some(0.5));
    }

    #[test]
    fn update_without_surface_releases_grab() {
        let source = alive_player();
        let update = source.update_args(false);
        assert_eq!(update.grabbed_surface_angle, None);

        let mut target = alive_player();
        target.grabbed_surface_angle = Some(1.0);
        target.apply_update(&update);
        assert_eq!(target.grabbed_surface_angle, None);
    }

    #[test]
    fn dead_update_clears_life_state() {
        let mut source = alive_player();
        source.health = 0;
        source.respawn_time = 2.0;
        let mut target = alive_player();
        target.grappling_hook_state = b"hooked".to_vec();
        target.jump_time = 0.3;

        target.apply_update(&source.update_args(false));

        assert!(!target.is_alive());
        assert!(target.grappling_hook_state.is_empty());
        assert_eq!(target.jump_time, 0.0);
        assert_eq!(target.respawn_time, 2.0);
    }

    #[test]
    fn input_is_ignored_while_resyncing() {
        let mut player = alive_player();
        player.resyncing = true;
        player.update_state(StateKey::Left, true);
        player.look_at(1.0, 1.0);
        player.x_vel = 5.0;
        player.advance(1.0);

        assert!(!player.keys.left);
        assert_eq!(player.angle, 0.0);
        assert_eq!(player.x, 10.0);
    }

    #[test]
    fn look_at_normalises_angle_and_clamps_thrust() {
        let mut player = alive_player();
        player.look_at(3.0 * PI / 2.0, 4.0);
        assert!(is_near(player.angle, -PI / 2.0, NEAR_EPSILON));
        assert_eq!(player.ghost_thrust, 1.0);
    }

    #[test]
    fn advance_moves_living_players_and_counts_down_dead_ones() {
        let mut player = alive_player();
        player.x_vel = 2.0;
        player.gun_reload = 0.25;
        player.advance(0.5);
        assert_eq!(player.x, 11.0);
        assert_eq!(player.gun_reload, 0.0);

        player.health = 0;
        player.respawn_time = 1.0;
        player.advance(0.5);
        assert_eq!(player.respawn_time, 0.5);
        assert_eq!(player.x, 11.0);
    }
}
