// Per-player ordering and duplicate suppression for client-originated messages.

use crate::domain::tick::is_newer;
use crate::domain::{Message, TickId};

/// Server ticks after which the last accepted tick id stops being a reference. Kept well under
/// half the 16-bit tick space so a quiet client is never judged across a wrap.
const MAX_REFERENCE_AGE: u64 = 1 << 14;

/// Distinct messages accepted under one tick id.
pub const MAX_PER_TICK: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerVerdict {
    Accept,
    /// Stamped with a tick before the newest one already accepted.
    Older,
    /// Exact retransmission of a message already accepted for this tick.
    Duplicate,
    /// More distinct messages under one tick id than a client ever sends.
    TooMany,
}

/// Discard-older policy: a message is applied if its tick id is newer than the last accepted
/// one, or equal to it and not identical to anything already accepted for that tick.
#[derive(Debug, Default)]
pub struct RequestLedger {
    last_tick: Option<TickId>,
    // Server tick of the last acceptance.
    accepted_at: u64,
    accepted_this_tick: Vec<Message>,
}

impl RequestLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_tick(&self) -> Option<TickId> {
        self.last_tick
    }

    /// Records the message when accepted. `now` is the server's monotonic tick. Messages
    /// without a client tick are always accepted.
    pub fn check(&mut self, msg: &Message, now: u64) -> LedgerVerdict {
        let Some(tick) = msg.client_tick() else {
            return LedgerVerdict::Accept;
        };

        if now.saturating_sub(self.accepted_at) > MAX_REFERENCE_AGE {
            self.last_tick = None;
            self.accepted_this_tick.clear();
        }

        match self.last_tick {
            Some(last) if tick == last => {
                if self.accepted_this_tick.contains(msg) {
                    return LedgerVerdict::Duplicate;
                }
                if self.accepted_this_tick.len() >= MAX_PER_TICK {
                    return LedgerVerdict::TooMany;
                }
            }
            Some(last) if !is_newer(tick, last) => return LedgerVerdict::Older,
            _ => {
                self.last_tick = Some(tick);
                self.accepted_this_tick.clear();
            }
        }

        self.accepted_at = now;
        self.accepted_this_tick.push(msg.clone());
        LedgerVerdict::Accept
    }
}
