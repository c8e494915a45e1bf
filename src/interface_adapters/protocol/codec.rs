// Binary codec: `[tag: 4 bytes][fields packed per packspec]`, all numbers big-endian.

use super::catalog::{self, DecodeFn, FieldReader};
use super::error::ProtocolError;
use super::packspec::FieldCode;
use super::schema::{MessageSchema, SchemaRegistry};
use crate::domain::{Message, MessageTag};
use std::collections::HashMap;
use std::fmt;

/// Dynamically typed field value. Integers travel wide so that out-of-range values can be
/// rejected instead of truncated.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Uint(u64),
    Int(i64),
    Float(f64),
    Bool(bool),
    Char(u8),
    Bytes(Vec<u8>),
}

impl From<u8> for FieldValue {
    fn from(v: u8) -> Self {
        FieldValue::Uint(v.into())
    }
}

impl From<u16> for FieldValue {
    fn from(v: u16) -> Self {
        FieldValue::Uint(v.into())
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        FieldValue::Uint(v.into())
    }
}

impl From<f32> for FieldValue {
    fn from(v: f32) -> Self {
        FieldValue::Float(v.into())
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

/// Packs field values for `schema`, tag first.
pub fn pack(schema: &MessageSchema, values: &[FieldValue]) -> Result<Vec<u8>, ProtocolError> {
    let tag = schema.tag();
    let fields = schema.fields();
    if values.len() != fields.len() {
        return Err(ProtocolError::Encoding {
            tag,
            field: fields.get(values.len()).copied().unwrap_or("<extra>"),
            reason: format!("expected {} values, got {}", fields.len(), values.len()),
        });
    }

    let mut out = Vec::with_capacity(schema.min_len());
    out.extend_from_slice(tag.as_bytes());

    for ((code, value), field) in schema.packspec().codes().iter().zip(values).zip(fields) {
        let fail = |reason: String| ProtocolError::Encoding {
            tag,
            field: *field,
            reason,
        };
        pack_field(&mut out, *code, value).map_err(fail)?;
    }
    Ok(out)
}

fn pack_field(out: &mut Vec<u8>, code: FieldCode, value: &FieldValue) -> Result<(), String> {
    match code {
        FieldCode::U8 => out.push(narrow::<u8, _>(unsigned(value)?, code)?),
        FieldCode::U16 => out.extend(narrow::<u16, _>(unsigned(value)?, code)?.to_be_bytes()),
        FieldCode::U32 => out.extend(narrow::<u32, _>(unsigned(value)?, code)?.to_be_bytes()),
        FieldCode::U64 => out.extend(unsigned(value)?.to_be_bytes()),
        FieldCode::I8 => out.extend(narrow::<i8, _>(signed(value)?, code)?.to_be_bytes()),
        FieldCode::I16 => out.extend(narrow::<i16, _>(signed(value)?, code)?.to_be_bytes()),
        FieldCode::I32 => out.extend(narrow::<i32, _>(signed(value)?, code)?.to_be_bytes()),
        FieldCode::I64 => out.extend(signed(value)?.to_be_bytes()),
        FieldCode::F32 => {
            let v = float(value)?;
            let narrowed = v as f32;
            if v.is_finite() && !narrowed.is_finite() {
                return Err(format!("{v} does not fit in a 32-bit float"));
            }
            out.extend(narrowed.to_be_bytes());
        }
        FieldCode::F64 => out.extend(float(value)?.to_be_bytes()),
        FieldCode::Bool => match value {
            FieldValue::Bool(b) => out.push(u8::from(*b)),
            other => return Err(mismatch("bool", other)),
        },
        FieldCode::Char => match value {
            FieldValue::Char(c) => out.push(*c),
            other => return Err(mismatch("char", other)),
        },
        FieldCode::FixedBytes(n) => match value {
            FieldValue::Bytes(bytes) if bytes.len() == n => out.extend_from_slice(bytes),
            FieldValue::Bytes(bytes) => {
                return Err(format!("expected exactly {n} bytes, got {}", bytes.len()));
            }
            other => return Err(mismatch("bytes", other)),
        },
        FieldCode::Remainder => match value {
            FieldValue::Bytes(bytes) => out.extend_from_slice(bytes),
            other => return Err(mismatch("bytes", other)),
        },
    }
    Ok(())
}

fn unsigned(value: &FieldValue) -> Result<u64, String> {
    match value {
        FieldValue::Uint(v) => Ok(*v),
        FieldValue::Int(v) => u64::try_from(*v).map_err(|_| format!("{v} is negative")),
        other => Err(mismatch("unsigned integer", other)),
    }
}

fn signed(value: &FieldValue) -> Result<i64, String> {
    match value {
        FieldValue::Int(v) => Ok(*v),
        FieldValue::Uint(v) => i64::try_from(*v).map_err(|_| format!("{v} is too large")),
        other => Err(mismatch("signed integer", other)),
    }
}

fn float(value: &FieldValue) -> Result<f64, String> {
    match value {
        FieldValue::Float(v) => Ok(*v),
        other => Err(mismatch("float", other)),
    }
}

fn narrow<T, V>(value: V, code: FieldCode) -> Result<T, String>
where
    T: TryFrom<V>,
    V: Copy + std::fmt::Display,
{
    T::try_from(value).map_err(|_| format!("{value} does not fit in `{code}`"))
}

fn mismatch(expected: &str, got: &FieldValue) -> String {
    format!("expected {expected}, got {got:?}")
}

/// Unpacks the payload after the tag according to `schema`.
pub fn unpack(schema: &MessageSchema, payload: &[u8]) -> Result<Vec<FieldValue>, ProtocolError> {
    let tag = schema.tag();
    let packspec = schema.packspec();
    if payload.len() < packspec.fixed_len() {
        return Err(ProtocolError::Truncated {
            needed: schema.min_len(),
            actual: MessageTag::WIDTH + payload.len(),
        });
    }

    let mut cursor = payload;
    let mut values = Vec::with_capacity(packspec.len());
    for (code, field) in packspec.codes().iter().zip(schema.fields()) {
        let width = code.width().unwrap_or(cursor.len());
        let (raw, rest) = cursor.split_at(width);
        cursor = rest;
        let value = unpack_field(*code, raw).map_err(|reason| ProtocolError::Decoding {
            tag,
            field: *field,
            reason,
        })?;
        values.push(value);
    }

    if !cursor.is_empty() {
        return Err(ProtocolError::Decoding {
            tag,
            field: "<trailing>",
            reason: format!("{} unexpected trailing bytes", cursor.len()),
        });
    }
    Ok(values)
}

// `raw` is exactly `code.width()` long, so this only fails on a layout bug.
fn array<const N: usize>(raw: &[u8]) -> Result<[u8; N], String> {
    raw.try_into()
        .map_err(|_| format!("expected {N} bytes, got {}", raw.len()))
}

fn unpack_field(code: FieldCode, raw: &[u8]) -> Result<FieldValue, String> {
    Ok(match code {
        FieldCode::U8 => FieldValue::Uint(raw[0].into()),
        FieldCode::U16 => FieldValue::Uint(u16::from_be_bytes(array(raw)?).into()),
        FieldCode::U32 => FieldValue::Uint(u32::from_be_bytes(array(raw)?).into()),
        FieldCode::U64 => FieldValue::Uint(u64::from_be_bytes(array(raw)?)),
        FieldCode::I8 => FieldValue::Int(i8::from_be_bytes(array(raw)?).into()),
        FieldCode::I16 => FieldValue::Int(i16::from_be_bytes(array(raw)?).into()),
        FieldCode::I32 => FieldValue::Int(i32::from_be_bytes(array(raw)?).into()),
        FieldCode::I64 => FieldValue::Int(i64::from_be_bytes(array(raw)?)),
        FieldCode::F32 => FieldValue::Float(f32::from_be_bytes(array(raw)?).into()),
        FieldCode::F64 => FieldValue::Float(f64::from_be_bytes(array(raw)?)),
        FieldCode::Bool => match raw[0] {
            0 => FieldValue::Bool(false),
            1 => FieldValue::Bool(true),
            other => return Err(format!("boolean byte must be 0 or 1, got {other}")),
        },
        FieldCode::Char => FieldValue::Char(raw[0]),
        FieldCode::FixedBytes(_) | FieldCode::Remainder => FieldValue::Bytes(raw.to_vec()),
    })
}

/// Converts between typed messages and bytes using a schema registry and a tag dispatch table.
#[derive(Clone)]
pub struct MessageCodec {
    registry: SchemaRegistry,
    decoders: HashMap<MessageTag, DecodeFn>,
}

impl fmt::Debug for MessageCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageCodec")
            .field("registry", &self.registry)
            .field("decoders", &self.decoders.len())
            .finish()
    }
}

impl MessageCodec {
    /// Codec for the full message catalogue.
    pub fn standard() -> Self {
        let registry = SchemaRegistry::standard().expect("message catalogue should be valid");
        Self {
            registry,
            decoders: catalog::decoders().into_iter().collect(),
        }
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn encode_values(
        &self,
        tag: MessageTag,
        values: &[FieldValue],
    ) -> Result<Vec<u8>, ProtocolError> {
        pack(self.registry.schema(tag)?, values)
    }

    pub fn decode_values(&self, buf: &[u8]) -> Result<(MessageTag, Vec<FieldValue>), ProtocolError> {
        let tag = read_tag(buf)?;
        let schema = self.registry.schema(tag)?;
        let values = unpack(schema, &buf[MessageTag::WIDTH..])?;
        Ok((tag, values))
    }

    pub fn encode(&self, msg: &Message) -> Result<Vec<u8>, ProtocolError> {
        self.encode_values(msg.tag(), &catalog::to_values(msg))
    }

    pub fn decode(&self, buf: &[u8]) -> Result<Message, ProtocolError> {
        let (tag, values) = self.decode_values(buf)?;
        let decode = self
            .decoders
            .get(&tag)
            .ok_or(ProtocolError::UnknownTag(tag))?;
        let fields = self.registry.fields_of(tag)?;
        decode(&mut FieldReader::new(tag, fields, values))
    }
}

fn read_tag(buf: &[u8]) -> Result<MessageTag, ProtocolError> {
    match buf.first_chunk::<{ MessageTag::WIDTH }>() {
        Some(bytes) => Ok(MessageTag::new(bytes)),
        None => Err(ProtocolError::Truncated {
            needed: MessageTag::WIDTH,
            actual: buf.len(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Player, WireMessage};
    use crate::domain::messages::{
        AddPlayerMsg, CannotRespawnMsg, CheckSyncMsg, KeyFlags, PlayerUpdateMsg,
        ResyncAcknowledgedMsg, ResyncPlayerMsg, RespawnRefusal, StateKey, TickMsg,
        UpdatePlayerStateMsg,
    };

    fn codec() -> MessageCodec {
        MessageCodec::standard()
    }

    fn sample_update() -> PlayerUpdateMsg {
        PlayerUpdateMsg {
            player_id: b'a',
            x_pos: 100.0,
            y_pos: 50.5,
            x_vel: -3.25,
            y_vel: 9.0,
            angle: 1.5,
            ghost_thrust: 0.75,
            jump_time: 0.1,
            gun_reload: 0.2,
            respawn: 0.0,
            coins: 1_250,
            health: 3,
            resync: true,
            keys: KeyFlags {
                left: true,
                right: false,
                jump: true,
                down: false,
            },
            ignore: KeyFlags {
                left: false,
                right: true,
                jump: false,
                down: false,
            },
            grip_countdown: 0.5,
            grabbed_surface_angle: Some(0.25),
            emote_id: 4,
            emote_ticks: 30,
            grappling_hook_state: b"{'state': 'idle'}".to_vec(),
        }
    }

    #[test]
    fn tick_is_tag_then_big_endian_u16() {
        let bytes = codec()
            .encode(&TickMsg { tick_id: 0x0102 }.into())
            .expect("encode");
        assert_eq!(bytes, b"tick\x01\x02");
    }

    #[test]
    fn check_sync_matches_its_documented_layout() {
        let bytes = codec()
            .encode(
                &CheckSyncMsg {
                    tick_id: 42,
                    x_pos: 100.0,
                    y_pos: 50.0,
                    y_vel: 0.0,
                }
                .into(),
            )
            .expect("encode");

        let mut expected = b"syn?".to_vec();
        expected.extend(42u16.to_be_bytes());
        expected.extend(100.0f32.to_be_bytes());
        expected.extend(50.0f32.to_be_bytes());
        expected.extend(0.0f32.to_be_bytes());
        assert_eq!(bytes, expected);
    }

    #[test]
    fn typed_messages_survive_a_round_trip() {
        let codec = codec();
        let messages: Vec<Message> = vec![
            TickMsg { tick_id: u16::MAX }.into(),
            sample_update().into(),
            ResyncPlayerMsg {
                tick_id: 42,
                update: sample_update(),
            }
            .into(),
            ResyncAcknowledgedMsg {
                tick_id: 42,
                x_pos: 100.0,
                y_pos: 50.5,
                y_vel: 9.0,
                angle: 1.5,
                ghost_thrust: 0.75,
                health: 3,
                player_id: b'a',
            }
            .into(),
            CannotRespawnMsg {
                reason: RespawnRefusal::TooSoon,
            }
            .into(),
            UpdatePlayerStateMsg {
                tick_id: 9,
                player_id: b'a',
                key: StateKey::Jump,
                value: true,
            }
            .into(),
            AddPlayerMsg {
                player_id: b'a',
                team_id: b'B',
                zone_id: 3,
                dead: true,
                nick: "Pilot ünïcode".as_bytes().to_vec(),
            }
            .into(),
        ];

        for msg in messages {
            let bytes = codec.encode(&msg).expect("encode");
            assert_eq!(codec.decode(&bytes).expect("decode"), msg);
        }
    }

    #[test]
    fn default_player_update_round_trips_with_nothing_grabbed() {
        let codec = codec();
        let msg = Message::from(Player::new(b'a', "Pilot", b'A', 1).update_args(false));

        let bytes = codec.encode(&msg).expect("encode");
        let (_, values) = codec.decode_values(&bytes).expect("decode values");

        assert!(matches!(values[22], FieldValue::Float(v) if v.is_nan()));
        assert_eq!(codec.decode(&bytes).expect("decode"), msg);
    }

    #[test]
    fn out_of_range_tick_is_rejected_not_wrapped() {
        let err = codec()
            .encode_values(TickMsg::TAG, &[FieldValue::Uint(70_000)])
            .expect_err("70000 does not fit in 16 bits");
        assert!(matches!(
            err,
            ProtocolError::Encoding { field: "tickId", .. }
        ));

        let ok = codec().encode_values(TickMsg::TAG, &[FieldValue::Uint(65_535)]);
        assert!(ok.is_ok());
    }

    #[test]
    fn negative_values_do_not_fit_unsigned_codes() {
        let err = codec()
            .encode_values(TickMsg::TAG, &[FieldValue::Int(-1)])
            .expect_err("negative tick");
        assert!(matches!(err, ProtocolError::Encoding { .. }));
    }

    #[test]
    fn wrong_value_kind_or_count_is_an_encoding_error() {
        let codec = codec();
        let err = codec
            .encode_values(TickMsg::TAG, &[FieldValue::Float(1.0)])
            .expect_err("float into H");
        assert!(matches!(err, ProtocolError::Encoding { .. }));

        let err = codec
            .encode_values(TickMsg::TAG, &[])
            .expect_err("missing value");
        assert!(matches!(err, ProtocolError::Encoding { .. }));
    }

    #[test]
    fn oversized_float_does_not_fit_f32() {
        let err = codec()
            .encode_values(
                CheckSyncMsg::TAG,
                &[
                    FieldValue::Uint(1),
                    FieldValue::Float(1e300),
                    FieldValue::Float(0.0),
                    FieldValue::Float(0.0),
                ],
            )
            .expect_err("1e300 overflows f32");
        assert!(matches!(err, ProtocolError::Encoding { field: "xPos", .. }));
    }

    #[test]
    fn every_truncation_of_every_schema_is_detected() {
        let codec = codec();
        for tag in codec.registry().tags() {
            let schema = codec.registry().schema(tag).expect("registered");
            // Zero-filled payloads are valid for every code, so the full buffer decodes.
            let mut full = tag.as_bytes().to_vec();
            full.resize(schema.min_len(), 0);
            assert!(codec.decode_values(&full).is_ok(), "{tag} should decode");

            for len in 0..schema.min_len() {
                let err = codec
                    .decode_values(&full[..len])
                    .expect_err("truncated buffer must fail");
                assert!(
                    matches!(err, ProtocolError::Truncated { .. }),
                    "{tag} truncated to {len} gave {err:?}"
                );
            }
        }
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let err = codec().decode(b"nope\x00\x01").expect_err("unknown");
        assert_eq!(err, ProtocolError::UnknownTag(MessageTag::new(b"nope")));
    }

    #[test]
    fn boolean_bytes_other_than_zero_or_one_are_malformed() {
        let mut bytes = codec()
            .encode(
                &UpdatePlayerStateMsg {
                    tick_id: 1,
                    player_id: b'a',
                    key: StateKey::Left,
                    value: true,
                }
                .into(),
            )
            .expect("encode");
        *bytes.last_mut().expect("non-empty") = 2;

        let err = codec().decode(&bytes).expect_err("bad bool");
        assert!(matches!(err, ProtocolError::Decoding { field: "value", .. }));
    }

    #[test]
    fn unknown_refusal_code_is_malformed() {
        let err = codec().decode(b"NoRsz").expect_err("bad reason");
        assert!(matches!(
            err,
            ProtocolError::Decoding {
                field: "reasonId",
                ..
            }
        ));
    }

    #[test]
    fn trailing_bytes_after_fixed_layout_are_malformed() {
        let err = codec()
            .decode(b"tick\x00\x01\xff")
            .expect_err("trailing byte");
        assert!(matches!(err, ProtocolError::Decoding { .. }));
    }

    #[test]
    fn remainder_field_takes_everything_left() {
        let codec = codec();
        let (tag, values) = codec
            .decode_values(b"AddPaB\x03\x00hello world")
            .expect("decode");
        assert_eq!(tag, AddPlayerMsg::TAG);
        assert_eq!(
            values.last(),
            Some(&FieldValue::Bytes(b"hello world".to_vec()))
        );
    }
}
