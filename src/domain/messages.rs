// Typed game messages. One struct per wire message, gathered in the closed `Message` enum.
// Binary layout lives in the protocol adapter; this module only knows tags and categories.

use std::fmt;

pub type PlayerId = u8;
pub type TeamId = u8;
pub type ZoneId = u8;
pub type ShotId = u32;

/// Wrapping 16-bit simulation tick id as carried on the wire.
pub type TickId = u16;

/// Fixed-width prefix identifying a message's schema.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageTag(pub [u8; 4]);

impl MessageTag {
    pub const WIDTH: usize = 4;

    pub const fn new(bytes: &[u8; 4]) -> Self {
        Self(*bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl fmt::Display for MessageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b'{}'", self.0.escape_ascii())
    }
}

impl fmt::Debug for MessageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Which side is authoritative for a message and where it may travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Predicted locally by the client, validated by the server, then rebroadcast.
    ClientCommand,
    /// Needs server authorization before any world effect.
    AgentRequest,
    /// Issued by the server and applied by every client in issue order.
    ServerCommand,
    /// Targeted at one client, never rebroadcast.
    ServerResponse,
}

impl MessageKind {
    pub fn is_client_originated(self) -> bool {
        matches!(self, MessageKind::ClientCommand | MessageKind::AgentRequest)
    }
}

/// Static identity of a message struct.
pub trait WireMessage {
    const TAG: MessageTag;
    const KIND: MessageKind;
}

/// Closed set of reasons a respawn request can be refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RespawnRefusal {
    GameNotStarted,
    AlreadyAlive,
    TooSoon,
    EnemyZone,
    FrozenZone,
}

impl RespawnRefusal {
    pub fn code(self) -> u8 {
        match self {
            RespawnRefusal::GameNotStarted => b'P',
            RespawnRefusal::AlreadyAlive => b'A',
            RespawnRefusal::TooSoon => b'T',
            RespawnRefusal::EnemyZone => b'E',
            RespawnRefusal::FrozenZone => b'F',
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            b'P' => Some(RespawnRefusal::GameNotStarted),
            b'A' => Some(RespawnRefusal::AlreadyAlive),
            b'T' => Some(RespawnRefusal::TooSoon),
            b'E' => Some(RespawnRefusal::EnemyZone),
            b'F' => Some(RespawnRefusal::FrozenZone),
            _ => None,
        }
    }

    /// Refusals that mean the client's picture of its own player is wrong.
    pub fn implies_desync(self) -> bool {
        matches!(self, RespawnRefusal::AlreadyAlive | RespawnRefusal::EnemyZone)
    }
}

/// Movement keys whose state is replicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKey {
    Left,
    Right,
    Jump,
    Down,
}

impl StateKey {
    pub fn code(self) -> u8 {
        match self {
            StateKey::Left => b'l',
            StateKey::Right => b'r',
            StateKey::Jump => b'j',
            StateKey::Down => b'd',
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            b'l' => Some(StateKey::Left),
            b'r' => Some(StateKey::Right),
            b'j' => Some(StateKey::Jump),
            b'd' => Some(StateKey::Down),
            _ => None,
        }
    }
}

/// One flag per movement key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyFlags {
    pub left: bool,
    pub right: bool,
    pub jump: bool,
    pub down: bool,
}

impl KeyFlags {
    pub fn get(&self, key: StateKey) -> bool {
        match key {
            StateKey::Left => self.left,
            StateKey::Right => self.right,
            StateKey::Jump => self.jump,
            StateKey::Down => self.down,
        }
    }

    pub fn set(&mut self, key: StateKey, value: bool) {
        match key {
            StateKey::Left => self.left = value,
            StateKey::Right => self.right = value,
            StateKey::Jump => self.jump = value,
            StateKey::Down => self.down = value,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickMsg {
    pub tick_id: TickId,
}

/// Full replicated state of one player.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerUpdateMsg {
    pub player_id: PlayerId,
    pub x_pos: f32,
    pub y_pos: f32,
    pub x_vel: f32,
    pub y_vel: f32,
    pub angle: f32,
    pub ghost_thrust: f32,
    pub jump_time: f32,
    pub gun_reload: f32,
    pub respawn: f32,
    pub coins: u32,
    pub health: u8,
    pub resync: bool,
    pub keys: KeyFlags,
    pub ignore: KeyFlags,
    pub grip_countdown: f32,
    /// `None` when no surface is grabbed; carried as NaN on the wire.
    pub grabbed_surface_angle: Option<f32>,
    pub emote_id: u32,
    pub emote_ticks: u32,
    pub grappling_hook_state: Vec<u8>,
}

impl PlayerUpdateMsg {
    /// Bit-level comparison so NaN fields compare equal to themselves.
    pub fn same_state(&self, other: &Self) -> bool {
        let floats = |m: &Self| {
            [
                m.x_pos,
                m.y_pos,
                m.x_vel,
                m.y_vel,
                m.angle,
                m.ghost_thrust,
                m.jump_time,
                m.gun_reload,
                m.respawn,
                m.grip_countdown,
                m.grabbed_surface_angle.unwrap_or(f32::NAN),
            ]
            .map(f32::to_bits)
        };

        self.player_id == other.player_id
            && floats(self) == floats(other)
            && self.coins == other.coins
            && self.health == other.health
            && self.resync == other.resync
            && self.keys == other.keys
            && self.ignore == other.ignore
            && self.emote_id == other.emote_id
            && self.emote_ticks == other.emote_ticks
            && self.grappling_hook_state == other.grappling_hook_state
    }
}

/// Authoritative correction sent to a single client.
#[derive(Debug, Clone, PartialEq)]
pub struct ResyncPlayerMsg {
    pub tick_id: TickId,
    pub update: PlayerUpdateMsg,
}

/// Periodic client report of where it believes its player is.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckSyncMsg {
    pub tick_id: TickId,
    pub x_pos: f32,
    pub y_pos: f32,
    pub y_vel: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResyncAcknowledgedMsg {
    pub tick_id: TickId,
    pub x_pos: f32,
    pub y_pos: f32,
    pub y_vel: f32,
    pub angle: f32,
    pub ghost_thrust: f32,
    pub health: u8,
    pub player_id: PlayerId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CannotRespawnMsg {
    pub reason: RespawnRefusal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdatePlayerStateMsg {
    pub tick_id: TickId,
    pub player_id: PlayerId,
    pub key: StateKey,
    pub value: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AimPlayerAtMsg {
    pub tick_id: TickId,
    pub player_id: PlayerId,
    pub angle: f32,
    pub thrust: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RespawnRequestMsg {
    pub tick_id: TickId,
    pub player_id: PlayerId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShootRequestMsg {
    pub tick_id: TickId,
    pub player_id: PlayerId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RespawnMsg {
    pub player_id: PlayerId,
    pub zone_id: ZoneId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShotFiredMsg {
    pub player_id: PlayerId,
    pub shot_id: ShotId,
    pub x_pos: f32,
    pub y_pos: f32,
    pub angle: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AddPlayerMsg {
    pub player_id: PlayerId,
    pub team_id: TeamId,
    pub zone_id: ZoneId,
    pub dead: bool,
    pub nick: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemovePlayerMsg {
    pub player_id: PlayerId,
}

/// Tells a freshly connected client which player it controls.
#[derive(Debug, Clone, PartialEq)]
pub struct AssignPlayerMsg {
    pub player_id: PlayerId,
}

/// Tells a client how many ticks of delay the server now assumes for it.
#[derive(Debug, Clone, PartialEq)]
pub struct DelayUpdatedMsg {
    pub delay: u16,
}

macro_rules! messages {
    ($($variant:ident($ty:ident) = $tag:literal, $kind:ident;)+) => {
        $(
            impl WireMessage for $ty {
                const TAG: MessageTag = MessageTag::new($tag);
                const KIND: MessageKind = MessageKind::$kind;
            }

            impl From<$ty> for Message {
                fn from(msg: $ty) -> Self {
                    Message::$variant(msg)
                }
            }
        )+

        /// Every message the protocol knows about.
        #[derive(Debug, Clone, PartialEq)]
        pub enum Message {
            $($variant($ty),)+
        }

        impl Message {
            pub fn tag(&self) -> MessageTag {
                match self {
                    $(Message::$variant(_) => $ty::TAG,)+
                }
            }

            pub fn kind(&self) -> MessageKind {
                match self {
                    $(Message::$variant(_) => $ty::KIND,)+
                }
            }
        }
    };
}

messages! {
    Tick(TickMsg) = b"tick", ServerCommand;
    PlayerUpdate(PlayerUpdateMsg) = b"PlUp", ServerCommand;
    ResyncPlayer(ResyncPlayerMsg) = b"Sync", ServerResponse;
    CheckSync(CheckSyncMsg) = b"syn?", AgentRequest;
    ResyncAcknowledged(ResyncAcknowledgedMsg) = b"Synd", AgentRequest;
    CannotRespawn(CannotRespawnMsg) = b"NoRs", ServerResponse;
    UpdatePlayerState(UpdatePlayerStateMsg) = b"Pres", ClientCommand;
    AimPlayerAt(AimPlayerAtMsg) = b"Aim@", ClientCommand;
    RespawnRequest(RespawnRequestMsg) = b"Rsp?", AgentRequest;
    ShootRequest(ShootRequestMsg) = b"Sho?", AgentRequest;
    Respawn(RespawnMsg) = b"Rspn", ServerCommand;
    ShotFired(ShotFiredMsg) = b"Shot", ServerCommand;
    AddPlayer(AddPlayerMsg) = b"AddP", ServerCommand;
    RemovePlayer(RemovePlayerMsg) = b"Gone", ServerCommand;
    AssignPlayer(AssignPlayerMsg) = b"You!", ServerResponse;
    DelayUpdated(DelayUpdatedMsg) = b"Dlay", ServerResponse;
}

impl Message {
    /// Tick id stamped by the client on messages it originates.
    pub fn client_tick(&self) -> Option<TickId> {
        match self {
            Message::CheckSync(m) => Some(m.tick_id),
            Message::ResyncAcknowledged(m) => Some(m.tick_id),
            Message::UpdatePlayerState(m) => Some(m.tick_id),
            Message::AimPlayerAt(m) => Some(m.tick_id),
            Message::RespawnRequest(m) => Some(m.tick_id),
            Message::ShootRequest(m) => Some(m.tick_id),
            _ => None,
        }
    }

    /// Player the message claims to act for, if it names one.
    pub fn player_id(&self) -> Option<PlayerId> {
        match self {
            Message::PlayerUpdate(m) => Some(m.player_id),
            Message::ResyncPlayer(m) => Some(m.update.player_id),
            Message::ResyncAcknowledged(m) => Some(m.player_id),
            Message::UpdatePlayerState(m) => Some(m.player_id),
            Message::AimPlayerAt(m) => Some(m.player_id),
            Message::RespawnRequest(m) => Some(m.player_id),
            Message::ShootRequest(m) => Some(m.player_id),
            Message::Respawn(m) => Some(m.player_id),
            Message::ShotFired(m) => Some(m.player_id),
            Message::AddPlayer(m) => Some(m.player_id),
            Message::RemovePlayer(m) => Some(m.player_id),
            Message::AssignPlayer(m) => Some(m.player_id),
            Message::Tick(_)
            | Message::CheckSync(_)
            | Message::CannotRespawn(_)
            | Message::DelayUpdated(_) => None,
        }
    }
}
