// Use-case level inputs/outputs for the game loop.

use crate::domain::{Message, PlayerId};
use tokio::sync::{mpsc, oneshot};

/// One connection's hold on a player id. Ids are reused once a player is gone; generations
/// are not, so events from a connection whose player was removed can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Seat {
    pub player_id: PlayerId,
    pub generation: u64,
}

#[derive(Debug)]
pub enum GameEvent {
    /// A connection wants a player. The world task answers on `assigned` with the new seat, or
    /// `None` when the lobby has no free ids.
    Join {
        nick: String,
        outbox: mpsc::Sender<Message>,
        assigned: oneshot::Sender<Option<Seat>>,
    },
    Leave {
        seat: Seat,
    },
    /// A decoded client-originated message.
    Message {
        seat: Seat,
        message: Message,
    },
    /// The connection missed broadcast commands and needs its state re-sent.
    ResyncRequested {
        seat: Seat,
    },
}

/// Where a server-produced message goes.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Every client in the lobby, in issue order.
    Broadcast(Message),
    /// One client only.
    ToPlayer(PlayerId, Message),
}
