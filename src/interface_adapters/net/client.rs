use crate::domain::Message;
use crate::domain::messages::AssignPlayerMsg;
use crate::interface_adapters::http::ErrorResponse;
use crate::interface_adapters::protocol::{MessageCodec, ProtocolError};
use crate::interface_adapters::state::AppState;
use crate::interface_adapters::utils::rng::rand_id;
use crate::use_cases::{GameEvent, LobbyHandle, MessageRouter, Seat};

use axum::{
    Json,
    body::Bytes,
    extract::{
        Query, State,
        ws::{CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade, close_code},
    },
    http::StatusCode,
    response::IntoResponse,
};
use futures::SinkExt;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::timeout;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

const LOG_THROTTLE: Duration = Duration::from_secs(2);
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);
const OUTBOX_CAPACITY: usize = 256;
const MAX_NICK_LEN: usize = 32;
const DEFAULT_NICK: &str = "anonymous";

#[derive(Debug)]
enum NetError {
    // Categorizes connection lifecycle failures so callers can decide policy.
    #[allow(dead_code)]
    Ws(axum::Error),
    #[allow(dead_code)]
    Encode(ProtocolError),
    InputClosed,
    CommandsClosed,
    JoinTimeout,
    LobbyFull,
}

impl From<axum::Error> for NetError {
    fn from(e: axum::Error) -> Self {
        NetError::Ws(e)
    }
}

#[derive(Debug, serde::Deserialize)]
pub struct LobbyQuery {
    // The lobby id the client wants to join.
    #[serde(default)]
    lobby_id: Option<String>,
    // Display name for the new player.
    #[serde(default)]
    nick: Option<String>,
}

/// Encodes each broadcast command once and shares the bytes with every connection.
pub async fn command_serializer(
    mut commands_rx: broadcast::Receiver<Message>,
    command_bytes_tx: broadcast::Sender<Bytes>,
    codec: Arc<MessageCodec>,
) {
    loop {
        match commands_rx.recv().await {
            Ok(msg) => {
                let bytes = match codec.encode(&msg) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        error!(error = %e, "failed to encode command");
                        continue;
                    }
                };
                let _ = command_bytes_tx.send(Bytes::from(bytes));
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                // Connections fed from this serializer recover through their own resync path.
                warn!(missed = n, "command serializer lagged");
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("commands channel closed; serializer exiting");
                break;
            }
        }
    }
}

pub fn spawn_lobby_serializer(lobby: &LobbyHandle, codec: Arc<MessageCodec>) {
    tokio::spawn(command_serializer(
        lobby.commands_tx.subscribe(),
        lobby.command_bytes_tx.clone(),
        codec,
    ));
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<LobbyQuery>,
) -> impl IntoResponse {
    let lobby_id = query
        .lobby_id
        .unwrap_or_else(|| state.default_lobby_id.to_string());

    let Some(lobby) = state.lobby_registry.get_lobby(&lobby_id).await else {
        // Keep not-found responses consistent with the JSON error schema.
        return (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "lobby not found".to_string(),
            }),
        )
            .into_response();
    };

    let nick = clean_nick(query.nick.as_deref());
    let codec = state.codec.clone();
    let router = state.router.clone();
    ws.on_upgrade(move |socket| {
        // Separate connection id for correlating logs before/after a player_id exists.
        let conn_id = rand_id();
        let span = info_span!("conn", conn_id, player_id = tracing::field::Empty);
        handle_socket(socket, lobby, nick, codec, router).instrument(span)
    })
}

fn clean_nick(nick: Option<&str>) -> String {
    let nick = nick.map(str::trim).unwrap_or_default();
    if nick.is_empty() {
        return DEFAULT_NICK.to_string();
    }
    // Truncate on a char boundary.
    let mut end = nick.len().min(MAX_NICK_LEN);
    while !nick.is_char_boundary(end) {
        end -= 1;
    }
    nick[..end].to_string()
}

async fn handle_socket(
    mut socket: WebSocket,
    lobby: LobbyHandle,
    nick: String,
    codec: Arc<MessageCodec>,
    router: Arc<MessageRouter>,
) {
    let mut ctx = match bootstrap_connection(&mut socket, &lobby, nick, codec, router).await {
        Ok(ctx) => ctx,
        Err(NetError::LobbyFull) => {
            info!(lobby_id = %lobby.lobby_id, "lobby full; connection refused");
            let _ = send_close_with_reason(&mut socket, close_code::POLICY, "lobby full").await;
            return;
        }
        Err(e) => {
            error!(error = ?e, "failed to bootstrap connection");
            let _ =
                send_close_with_reason(&mut socket, close_code::POLICY, "bootstrap failed").await;
            return;
        }
    };

    Span::current().record("player_id", ctx.player_id);
    info!(
        player_id = ctx.player_id,
        lobby_id = %lobby.lobby_id,
        nick = %ctx.nick,
        "client connected"
    );

    // Main Client Loop
    if let Err(e) = run_client_loop(&mut socket, &mut ctx).await {
        warn!(error = ?e, "client loop exited with error");
    }
}

struct ConnCtx {
    pub player_id: u8,
    pub seat: Seat,
    pub nick: String,
    pub codec: Arc<MessageCodec>,
    pub router: Arc<MessageRouter>,
    pub input_tx: mpsc::Sender<GameEvent>,
    pub command_bytes_rx: broadcast::Receiver<Bytes>,
    // Targeted messages from the world task (snapshots, resyncs, refusals).
    pub outbox_rx: mpsc::Receiver<Message>,
    // Count lag recoveries requested for this client.
    pub lag_recovery_count: u64,

    pub msgs_in: u64,
    pub msgs_out: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,

    pub last_input_full_log: Instant,
    pub last_command_lag_log: Instant,
    pub last_invalid_input_log: Instant,

    pub close_frame: Option<CloseFrame>,
}

async fn bootstrap_connection(
    socket: &mut WebSocket,
    lobby: &LobbyHandle,
    nick: String,
    codec: Arc<MessageCodec>,
    router: Arc<MessageRouter>,
) -> Result<ConnCtx, NetError> {
    // Subscribe before joining so the join broadcasts reach this connection.
    let command_bytes_rx = lobby.command_bytes_tx.subscribe();
    let (outbox, outbox_rx) = mpsc::channel::<Message>(OUTBOX_CAPACITY);
    let (assigned, assigned_rx) = oneshot::channel();

    lobby
        .input_tx
        .send(GameEvent::Join {
            nick: nick.clone(),
            outbox,
            assigned,
        })
        .await
        .map_err(|_| NetError::InputClosed)?;

    let seat = match timeout(JOIN_TIMEOUT, assigned_rx).await {
        Ok(Ok(Some(seat))) => seat,
        Ok(Ok(None)) => return Err(NetError::LobbyFull),
        Ok(Err(_)) => return Err(NetError::InputClosed),
        Err(_) => return Err(NetError::JoinTimeout),
    };

    let player_id = seat.player_id;

    // Tell the client "This is who you are".
    let assign: Message = AssignPlayerMsg { player_id }.into();
    let bytes_out = match send_message(socket, &codec, &assign).await {
        Ok(n) => n,
        Err(err) => {
            // Undo the join so the world does not keep a player nobody controls.
            let _ = lobby.input_tx.send(GameEvent::Leave { seat }).await;
            return Err(err);
        }
    };

    let now = Instant::now() - LOG_THROTTLE;
    Ok(ConnCtx {
        player_id,
        seat,
        nick,
        codec,
        router,
        input_tx: lobby.input_tx.clone(),
        command_bytes_rx,
        outbox_rx,
        lag_recovery_count: 0,

        msgs_in: 0,
        msgs_out: 1,
        bytes_in: 0,
        bytes_out: bytes_out as u64,

        last_input_full_log: now,
        last_command_lag_log: now,
        last_invalid_input_log: now,

        close_frame: None,
    })
}

enum LoopControl {
    Continue,
    Disconnect,
}

async fn send_close_with_reason(
    socket: &mut WebSocket,
    code: u16,
    reason: &'static str,
) -> Result<(), NetError> {
    socket
        .send(WsMessage::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await
        .map_err(NetError::Ws)?;
    socket.close().await.map_err(NetError::Ws)
}

async fn send_message(
    socket: &mut WebSocket,
    codec: &MessageCodec,
    msg: &Message,
) -> Result<usize, NetError> {
    let bytes = codec.encode(msg).map_err(NetError::Encode)?;
    let len = bytes.len();
    socket
        .send(WsMessage::Binary(Bytes::from(bytes)))
        .await
        .map_err(NetError::Ws)?;
    Ok(len)
}

fn should_log(last: &mut Instant) -> bool {
    if last.elapsed() >= LOG_THROTTLE {
        *last = Instant::now();
        true
    } else {
        false
    }
}

/// Drops client messages carrying NaN or infinite floats.
fn sanitize_message(msg: Message) -> Option<Message> {
    let finite = match &msg {
        Message::CheckSync(m) => [m.x_pos, m.y_pos, m.y_vel].iter().all(|v| v.is_finite()),
        Message::AimPlayerAt(m) => m.angle.is_finite() && m.thrust.is_finite(),
        Message::ResyncAcknowledged(m) => [m.x_pos, m.y_pos, m.y_vel, m.angle, m.ghost_thrust]
            .iter()
            .all(|v| v.is_finite()),
        _ => true,
    };
    finite.then_some(msg)
}

async fn run_client_loop(socket: &mut WebSocket, ctx: &mut ConnCtx) -> Result<(), NetError> {
    let seat = ctx.seat;
    let mut fatal: Option<NetError> = None;

    loop {
        // disconnect becomes true on error
        let disconnect: bool = tokio::select! {
            // Incoming Message from Client
            incoming = socket.recv() => {
                match handle_incoming_ws(incoming, ctx) {
                    Ok(LoopControl::Continue) => false,
                    Ok(LoopControl::Disconnect) => true,
                    Err(e) => {
                        fatal = Some(e);
                        true
                    }
                }
            }

            // Outgoing broadcast command
            command = ctx.command_bytes_rx.recv() => {
                match command {
                    Ok(bytes) => match forward_bytes(bytes, socket, ctx).await {
                        LoopControl::Continue => false,
                        LoopControl::Disconnect => true,
                    },
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        if should_log(&mut ctx.last_command_lag_log) {
                            warn!(missed = n, "commands lagged; requesting resync");
                        }
                        // Missed commands cannot be replayed; ask the world for fresh state.
                        ctx.lag_recovery_count += 1;
                        match ctx.input_tx.try_send(GameEvent::ResyncRequested { seat }) {
                            Ok(()) | Err(TrySendError::Full(_)) => false,
                            Err(TrySendError::Closed(_)) => {
                                fatal = Some(NetError::InputClosed);
                                true
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        fatal = Some(NetError::CommandsClosed);
                        true
                    }
                }
            }

            // Outgoing targeted message
            targeted = ctx.outbox_rx.recv() => {
                match targeted {
                    Some(msg) => match send_message(socket, &ctx.codec, &msg).await {
                        Ok(n) => {
                            ctx.msgs_out += 1;
                            ctx.bytes_out += n as u64;
                            false
                        }
                        Err(NetError::Encode(e)) => {
                            error!(error = %e, tag = %msg.tag(), "failed to encode message");
                            false
                        }
                        Err(err) => {
                            warn!(error = ?err, "failed to send message");
                            true
                        }
                    },
                    None => {
                        // The world released this seat, e.g. after an unanswered resync.
                        info!(player_id = seat.player_id, "player removed by the server");
                        ctx.close_frame = Some(CloseFrame {
                            code: close_code::POLICY,
                            reason: "removed from game".into(),
                        });
                        true
                    }
                }
            }
        };

        if disconnect {
            if let Some(frame) = ctx.close_frame.take() {
                let _ = socket.send(WsMessage::Close(Some(frame))).await;
            }
            if let Err(err) = socket.close().await.map_err(NetError::Ws) {
                debug!(error = ?err, "socket close error");
            }
            break;
        }
    }

    disconnect_cleanup(ctx).await;

    match fatal {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn handle_incoming_ws(
    incoming: Option<Result<WsMessage, axum::Error>>,
    ctx: &mut ConnCtx,
) -> Result<LoopControl, NetError> {
    let player_id = ctx.player_id;
    match incoming {
        Some(Ok(msg)) => match msg {
            WsMessage::Binary(bytes) => {
                ctx.msgs_in += 1;
                ctx.bytes_in += bytes.len() as u64;

                let msg = match ctx.codec.decode(&bytes) {
                    Ok(msg) => msg,
                    Err(e) => {
                        // A peer that sends undecodable bytes can no longer be trusted.
                        warn!(player_id, bytes = bytes.len(), error = %e, "malformed message");
                        ctx.close_frame = Some(CloseFrame {
                            code: close_code::POLICY,
                            reason: "malformed message".into(),
                        });
                        return Ok(LoopControl::Disconnect);
                    }
                };

                if !ctx.router.accepts_from_client(msg.tag()) {
                    warn!(player_id, tag = %msg.tag(), "server-only message from client");
                    ctx.close_frame = Some(CloseFrame {
                        code: close_code::POLICY,
                        reason: "unexpected message".into(),
                    });
                    return Ok(LoopControl::Disconnect);
                }

                let Some(message) = sanitize_message(msg) else {
                    if should_log(&mut ctx.last_invalid_input_log) {
                        warn!(player_id, "invalid float values (NaN/inf); dropping");
                    }
                    return Ok(LoopControl::Continue);
                };

                let seat = ctx.seat;
                match ctx.input_tx.try_send(GameEvent::Message { seat, message }) {
                    Ok(()) => Ok(LoopControl::Continue),
                    Err(TrySendError::Full(_evt)) => {
                        if should_log(&mut ctx.last_input_full_log) {
                            warn!(player_id, "input channel full; dropping message");
                        }
                        Ok(LoopControl::Continue)
                    }
                    Err(TrySendError::Closed(_evt)) => Err(NetError::InputClosed),
                }
            }
            WsMessage::Text(_) => {
                ctx.close_frame = Some(CloseFrame {
                    code: close_code::UNSUPPORTED,
                    reason: "text messages not supported".into(),
                });
                Ok(LoopControl::Disconnect)
            }
            WsMessage::Ping(_) | WsMessage::Pong(_) => Ok(LoopControl::Continue),
            WsMessage::Close(_) => Ok(LoopControl::Disconnect),
        },
        Some(Err(e)) => {
            warn!(player_id, error = %e, "websocket recv error");
            Ok(LoopControl::Disconnect)
        }
        None => {
            info!(player_id, "websocket closed");
            Ok(LoopControl::Disconnect)
        }
    }
}

async fn forward_bytes(bytes: Bytes, socket: &mut WebSocket, ctx: &mut ConnCtx) -> LoopControl {
    let len = bytes.len();
    match socket.send(WsMessage::Binary(bytes)).await {
        Ok(()) => {
            ctx.msgs_out += 1;
            ctx.bytes_out += len as u64;
            LoopControl::Continue
        }
        Err(err) => {
            // Log unexpected send failures; disconnect will follow immediately.
            warn!(error = ?err, "failed to send command");
            LoopControl::Disconnect
        }
    }
}

async fn disconnect_cleanup(ctx: &ConnCtx) {
    let player_id = ctx.player_id;
    if ctx
        .input_tx
        .send(GameEvent::Leave { seat: ctx.seat })
        .await
        .is_err()
    {
        debug!(player_id, "world task gone before leave");
    }

    info!(
        player_id,
        msgs_in = ctx.msgs_in,
        msgs_out = ctx.msgs_out,
        bytes_in = ctx.bytes_in,
        bytes_out = ctx.bytes_out,
        lag_recoveries = ctx.lag_recovery_count,
        "client disconnected"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::messages::{AimPlayerAtMsg, ShootRequestMsg};

    #[test]
    fn nicks_are_trimmed_and_bounded() {
        assert_eq!(clean_nick(None), DEFAULT_NICK);
        assert_eq!(clean_nick(Some("   ")), DEFAULT_NICK);
        assert_eq!(clean_nick(Some(" Ace ")), "Ace");
        let long = "é".repeat(40);
        let cleaned = clean_nick(Some(&long));
        assert!(cleaned.len() <= MAX_NICK_LEN);
        assert!(cleaned.chars().all(|c| c == 'é'));
    }

    #[test]
    fn non_finite_aims_are_dropped() {
        let aim = |angle| -> Message {
            AimPlayerAtMsg {
                tick_id: 1,
                player_id: 1,
                angle,
                thrust: 1.0,
            }
            .into()
        };
        assert!(sanitize_message(aim(f32::NAN)).is_none());
        assert!(sanitize_message(aim(f32::INFINITY)).is_none());
        assert!(sanitize_message(aim(0.5)).is_some());
        let shoot: Message = ShootRequestMsg {
            tick_id: 1,
            player_id: 1,
        }
        .into();
        assert!(sanitize_message(shoot).is_some());
    }
}
