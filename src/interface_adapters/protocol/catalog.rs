// The message catalogue: one schema per tag plus typed conversions in both directions.

use super::codec::FieldValue;
use super::error::ProtocolError;
use super::schema::SchemaRegistry;
use crate::domain::messages::{
    AddPlayerMsg, AimPlayerAtMsg, AssignPlayerMsg, CannotRespawnMsg, CheckSyncMsg,
    DelayUpdatedMsg, KeyFlags, PlayerUpdateMsg, RemovePlayerMsg, RespawnMsg, RespawnRefusal,
    RespawnRequestMsg, ResyncAcknowledgedMsg, ResyncPlayerMsg, ShootRequestMsg, ShotFiredMsg,
    StateKey, TickMsg, UpdatePlayerStateMsg,
};
use crate::domain::{Message, MessageTag, WireMessage};

pub const PLAYER_UPDATE_FIELDS: [&str; 26] = [
    "playerId",
    "xPos",
    "yPos",
    "xVel",
    "yVel",
    "angle",
    "ghostThrust",
    "jumpTime",
    "gunReload",
    "respawn",
    "coins",
    "health",
    "resync",
    "leftKey",
    "rightKey",
    "jumpKey",
    "downKey",
    "ignoreLeft",
    "ignoreRight",
    "ignoreJump",
    "ignoreDown",
    "gripCountDown",
    "grabbedSurfaceAngle",
    "emoteId",
    "emoteTicks",
    "grapplingHookState",
];

pub const PLAYER_UPDATE_SPEC: &str = "cfffffffffIB?????????ffII*";

/// Builds a typed message from the decoded field values of its tag.
pub type DecodeFn = fn(&mut FieldReader) -> Result<Message, ProtocolError>;

impl SchemaRegistry {
    /// Registry holding every message in the catalogue.
    pub fn standard() -> Result<Self, ProtocolError> {
        let mut registry = SchemaRegistry::new();

        let mut resync_fields = vec!["tickId"];
        resync_fields.extend(PLAYER_UPDATE_FIELDS);

        registry.define(TickMsg::TAG, &["tickId"], "H")?;
        registry.define(PlayerUpdateMsg::TAG, &PLAYER_UPDATE_FIELDS, PLAYER_UPDATE_SPEC)?;
        registry.define(
            ResyncPlayerMsg::TAG,
            &resync_fields,
            &format!("H{PLAYER_UPDATE_SPEC}"),
        )?;
        registry.define(
            CheckSyncMsg::TAG,
            &["tickId", "xPos", "yPos", "yVel"],
            "Hfff",
        )?;
        registry.define(
            ResyncAcknowledgedMsg::TAG,
            &[
                "tickId",
                "xPos",
                "yPos",
                "yVel",
                "angle",
                "ghostThrust",
                "health",
                "playerId",
            ],
            "HfffffBc",
        )?;
        registry.define(CannotRespawnMsg::TAG, &["reasonId"], "c")?;
        registry.define(
            UpdatePlayerStateMsg::TAG,
            &["tickId", "playerId", "stateKey", "value"],
            "Hcc?",
        )?;
        registry.define(
            AimPlayerAtMsg::TAG,
            &["tickId", "playerId", "angle", "thrust"],
            "Hcff",
        )?;
        registry.define(RespawnRequestMsg::TAG, &["tickId", "playerId"], "Hc")?;
        registry.define(ShootRequestMsg::TAG, &["tickId", "playerId"], "Hc")?;
        registry.define(RespawnMsg::TAG, &["playerId", "zoneId"], "cB")?;
        registry.define(
            ShotFiredMsg::TAG,
            &["playerId", "shotId", "xPos", "yPos", "angle"],
            "cIfff",
        )?;
        registry.define(
            AddPlayerMsg::TAG,
            &["playerId", "teamId", "zoneId", "dead", "nick"],
            "ccB?*",
        )?;
        registry.define(RemovePlayerMsg::TAG, &["playerId"], "c")?;
        registry.define(AssignPlayerMsg::TAG, &["playerId"], "c")?;
        registry.define(DelayUpdatedMsg::TAG, &["delay"], "H")?;

        Ok(registry)
    }
}

/// Dispatch table from tag to typed decoder, one entry per `Message` variant.
pub fn decoders() -> [(MessageTag, DecodeFn); 16] {
    [
        (TickMsg::TAG, |r| {
            Ok(TickMsg { tick_id: r.u16()? }.into())
        }),
        (PlayerUpdateMsg::TAG, |r| Ok(read_update(r)?.into())),
        (ResyncPlayerMsg::TAG, |r| {
            let tick_id = r.u16()?;
            let update = read_update(r)?;
            Ok(ResyncPlayerMsg { tick_id, update }.into())
        }),
        (CheckSyncMsg::TAG, |r| {
            Ok(CheckSyncMsg {
                tick_id: r.u16()?,
                x_pos: r.f32()?,
                y_pos: r.f32()?,
                y_vel: r.f32()?,
            }
            .into())
        }),
        (ResyncAcknowledgedMsg::TAG, |r| {
            Ok(ResyncAcknowledgedMsg {
                tick_id: r.u16()?,
                x_pos: r.f32()?,
                y_pos: r.f32()?,
                y_vel: r.f32()?,
                angle: r.f32()?,
                ghost_thrust: r.f32()?,
                health: r.u8()?,
                player_id: r.char()?,
            }
            .into())
        }),
        (CannotRespawnMsg::TAG, |r| {
            let reason = r.coded("unknown refusal reason", RespawnRefusal::from_code)?;
            Ok(CannotRespawnMsg { reason }.into())
        }),
        (UpdatePlayerStateMsg::TAG, |r| {
            Ok(UpdatePlayerStateMsg {
                tick_id: r.u16()?,
                player_id: r.char()?,
                key: r.coded("unknown state key", StateKey::from_code)?,
                value: r.bool()?,
            }
            .into())
        }),
        (AimPlayerAtMsg::TAG, |r| {
            Ok(AimPlayerAtMsg {
                tick_id: r.u16()?,
                player_id: r.char()?,
                angle: r.f32()?,
                thrust: r.f32()?,
            }
            .into())
        }),
        (RespawnRequestMsg::TAG, |r| {
            Ok(RespawnRequestMsg {
                tick_id: r.u16()?,
                player_id: r.char()?,
            }
            .into())
        }),
        (ShootRequestMsg::TAG, |r| {
            Ok(ShootRequestMsg {
                tick_id: r.u16()?,
                player_id: r.char()?,
            }
            .into())
        }),
        (RespawnMsg::TAG, |r| {
            Ok(RespawnMsg {
                player_id: r.char()?,
                zone_id: r.u8()?,
            }
            .into())
        }),
        (ShotFiredMsg::TAG, |r| {
            Ok(ShotFiredMsg {
                player_id: r.char()?,
                shot_id: r.u32()?,
                x_pos: r.f32()?,
                y_pos: r.f32()?,
                angle: r.f32()?,
            }
            .into())
        }),
        (AddPlayerMsg::TAG, |r| {
            Ok(AddPlayerMsg {
                player_id: r.char()?,
                team_id: r.char()?,
                zone_id: r.u8()?,
                dead: r.bool()?,
                nick: r.bytes()?,
            }
            .into())
        }),
        (RemovePlayerMsg::TAG, |r| {
            Ok(RemovePlayerMsg {
                player_id: r.char()?,
            }
            .into())
        }),
        (AssignPlayerMsg::TAG, |r| {
            Ok(AssignPlayerMsg {
                player_id: r.char()?,
            }
            .into())
        }),
        (DelayUpdatedMsg::TAG, |r| {
            Ok(DelayUpdatedMsg { delay: r.u16()? }.into())
        }),
    ]
}

fn read_update(r: &mut FieldReader) -> Result<PlayerUpdateMsg, ProtocolError> {
    Ok(PlayerUpdateMsg {
        player_id: r.char()?,
        x_pos: r.f32()?,
        y_pos: r.f32()?,
        x_vel: r.f32()?,
        y_vel: r.f32()?,
        angle: r.f32()?,
        ghost_thrust: r.f32()?,
        jump_time: r.f32()?,
        gun_reload: r.f32()?,
        respawn: r.f32()?,
        coins: r.u32()?,
        health: r.u8()?,
        resync: r.bool()?,
        keys: read_flags(r)?,
        ignore: read_flags(r)?,
        grip_countdown: r.f32()?,
        grabbed_surface_angle: r.f32_or_nan()?,
        emote_id: r.u32()?,
        emote_ticks: r.u32()?,
        grappling_hook_state: r.bytes()?,
    })
}

fn read_flags(r: &mut FieldReader) -> Result<KeyFlags, ProtocolError> {
    Ok(KeyFlags {
        left: r.bool()?,
        right: r.bool()?,
        jump: r.bool()?,
        down: r.bool()?,
    })
}

/// Field values of a typed message, in schema order.
pub fn to_values(msg: &Message) -> Vec<FieldValue> {
    match msg {
        Message::Tick(m) => vec![m.tick_id.into()],
        Message::PlayerUpdate(m) => update_values(m),
        Message::ResyncPlayer(m) => {
            let mut values = vec![m.tick_id.into()];
            values.extend(update_values(&m.update));
            values
        }
        Message::CheckSync(m) => vec![
            m.tick_id.into(),
            m.x_pos.into(),
            m.y_pos.into(),
            m.y_vel.into(),
        ],
        Message::ResyncAcknowledged(m) => vec![
            m.tick_id.into(),
            m.x_pos.into(),
            m.y_pos.into(),
            m.y_vel.into(),
            m.angle.into(),
            m.ghost_thrust.into(),
            m.health.into(),
            FieldValue::Char(m.player_id),
        ],
        Message::CannotRespawn(m) => vec![FieldValue::Char(m.reason.code())],
        Message::UpdatePlayerState(m) => vec![
            m.tick_id.into(),
            FieldValue::Char(m.player_id),
            FieldValue::Char(m.key.code()),
            m.value.into(),
        ],
        Message::AimPlayerAt(m) => vec![
            m.tick_id.into(),
            FieldValue::Char(m.player_id),
            m.angle.into(),
            m.thrust.into(),
        ],
        Message::RespawnRequest(m) => vec![m.tick_id.into(), FieldValue::Char(m.player_id)],
        Message::ShootRequest(m) => vec![m.tick_id.into(), FieldValue::Char(m.player_id)],
        Message::Respawn(m) => vec![FieldValue::Char(m.player_id), m.zone_id.into()],
        Message::ShotFired(m) => vec![
            FieldValue::Char(m.player_id),
            m.shot_id.into(),
            m.x_pos.into(),
            m.y_pos.into(),
            m.angle.into(),
        ],
        Message::AddPlayer(m) => vec![
            FieldValue::Char(m.player_id),
            FieldValue::Char(m.team_id),
            m.zone_id.into(),
            m.dead.into(),
            FieldValue::Bytes(m.nick.clone()),
        ],
        Message::RemovePlayer(m) => vec![FieldValue::Char(m.player_id)],
        Message::AssignPlayer(m) => vec![FieldValue::Char(m.player_id)],
        Message::DelayUpdated(m) => vec![m.delay.into()],
    }
}

fn update_values(m: &PlayerUpdateMsg) -> Vec<FieldValue> {
    vec![
        FieldValue::Char(m.player_id),
        m.x_pos.into(),
        m.y_pos.into(),
        m.x_vel.into(),
        m.y_vel.into(),
        m.angle.into(),
        m.ghost_thrust.into(),
        m.jump_time.into(),
        m.gun_reload.into(),
        m.respawn.into(),
        m.coins.into(),
        m.health.into(),
        m.resync.into(),
        m.keys.left.into(),
        m.keys.right.into(),
        m.keys.jump.into(),
        m.keys.down.into(),
        m.ignore.left.into(),
        m.ignore.right.into(),
        m.ignore.jump.into(),
        m.ignore.down.into(),
        m.grip_countdown.into(),
        m.grabbed_surface_angle.unwrap_or(f32::NAN).into(),
        m.emote_id.into(),
        m.emote_ticks.into(),
        FieldValue::Bytes(m.grappling_hook_state.clone()),
    ]
}

/// Sequential typed access to decoded values. Every getter names the field it failed on.
pub struct FieldReader<'a> {
    tag: MessageTag,
    fields: &'a [&'static str],
    values: std::vec::IntoIter<FieldValue>,
    index: usize,
}

impl<'a> FieldReader<'a> {
    pub fn new(tag: MessageTag, fields: &'a [&'static str], values: Vec<FieldValue>) -> Self {
        Self {
            tag,
            fields,
            values: values.into_iter(),
            index: 0,
        }
    }

    fn next_value(&mut self) -> Result<(&'static str, FieldValue), ProtocolError> {
        let field = self.fields.get(self.index).copied().unwrap_or("<missing>");
        self.index += 1;
        match self.values.next() {
            Some(value) => Ok((field, value)),
            None => Err(self.error(field, "no value decoded".to_string())),
        }
    }

    fn error(&self, field: &'static str, reason: String) -> ProtocolError {
        ProtocolError::Decoding {
            tag: self.tag,
            field,
            reason,
        }
    }

    fn uint<T: TryFrom<u64>>(&mut self) -> Result<T, ProtocolError> {
        match self.next_value()? {
            (field, FieldValue::Uint(v)) => T::try_from(v)
                .map_err(|_| self.error(field, format!("{v} is out of range"))),
            (field, other) => Err(self.error(field, format!("expected integer, got {other:?}"))),
        }
    }

    pub fn u8(&mut self) -> Result<u8, ProtocolError> {
        self.uint()
    }

    pub fn u16(&mut self) -> Result<u16, ProtocolError> {
        self.uint()
    }

    pub fn u32(&mut self) -> Result<u32, ProtocolError> {
        self.uint()
    }

    pub fn f32(&mut self) -> Result<f32, ProtocolError> {
        match self.next_value()? {
            // Values decoded from an `f` code were f32 to begin with.
            (_, FieldValue::Float(v)) => Ok(v as f32),
            (field, other) => Err(self.error(field, format!("expected float, got {other:?}"))),
        }
    }

    /// Float field where NaN stands for "no value".
    pub fn f32_or_nan(&mut self) -> Result<Option<f32>, ProtocolError> {
        let v = self.f32()?;
        Ok((!v.is_nan()).then_some(v))
    }

    pub fn bool(&mut self) -> Result<bool, ProtocolError> {
        match self.next_value()? {
            (_, FieldValue::Bool(v)) => Ok(v),
            (field, other) => Err(self.error(field, format!("expected bool, got {other:?}"))),
        }
    }

    pub fn char(&mut self) -> Result<u8, ProtocolError> {
        match self.next_value()? {
            (_, FieldValue::Char(v)) => Ok(v),
            (field, other) => Err(self.error(field, format!("expected char, got {other:?}"))),
        }
    }

    pub fn bytes(&mut self) -> Result<Vec<u8>, ProtocolError> {
        match self.next_value()? {
            (_, FieldValue::Bytes(v)) => Ok(v),
            (field, other) => Err(self.error(field, format!("expected bytes, got {other:?}"))),
        }
    }

    /// Reads a char field and maps it into a closed code set.
    pub fn coded<T>(
        &mut self,
        what: &str,
        from_code: fn(u8) -> Option<T>,
    ) -> Result<T, ProtocolError> {
        let field = self.fields.get(self.index).copied().unwrap_or("<missing>");
        let code = self.char()?;
        from_code(code).ok_or_else(|| {
            self.error(field, format!("{what} {}", code.escape_ascii()))
        })
    }
}
