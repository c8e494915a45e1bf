//! Per-player resynchronisation state machine.
//!
//! The server owns one machine per connected player. A machine is `Synced` until the server
//! decides the client's prediction has drifted, at which point it holds the correction it sent
//! (`ResyncPending`) until the client echoes that exact correction back.

use super::messages::{CheckSyncMsg, ResyncAcknowledgedMsg, ResyncPlayerMsg, TickId};
use super::player::{Player, is_near};

#[derive(Debug, Clone, Copy)]
pub struct ResyncSettings {
    /// Minimum deviation in x, y or y velocity that counts as drift.
    pub position_tolerance: f32,
    /// Tolerance when comparing acknowledged floats with the values that were sent.
    pub ack_tolerance: f32,
    /// Ticks to wait for an acknowledgement before resending the same correction.
    pub retry_after_ticks: u64,
    /// Ticks a player may stay unacknowledged before being removed.
    pub max_pending_ticks: u64,
}

impl Default for ResyncSettings {
    fn default() -> Self {
        Self {
            position_tolerance: 1.0,
            ack_tolerance: 1e-3,
            retry_after_ticks: 30,
            max_pending_ticks: 30 * 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingResync {
    /// Latest correction sent; only an echo of this one is accepted.
    pub sent: ResyncPlayerMsg,
    pub last_sent_at: u64,
    pub expires_at: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResyncState {
    Synced,
    ResyncPending(PendingResync),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    Accepted,
    /// Echo of an older correction, or values that do not match what was sent.
    Stale,
    /// Repeat of the acknowledgement that last settled the player, from a client that applied
    /// a late copy of that correction.
    Repeated,
    NotPending,
}

#[derive(Debug, Clone)]
pub struct ResyncStateMachine {
    settings: ResyncSettings,
    state: ResyncState,
    last_acknowledged_tick: Option<TickId>,
    // Correction whose acknowledgement last returned the player to `Synced`.
    settled: Option<ResyncPlayerMsg>,
}

impl ResyncStateMachine {
    pub fn new(settings: ResyncSettings) -> Self {
        Self {
            settings,
            state: ResyncState::Synced,
            last_acknowledged_tick: None,
            settled: None,
        }
    }

    pub fn state(&self) -> &ResyncState {
        &self.state
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, ResyncState::ResyncPending(_))
    }

    /// The correction currently waiting for an acknowledgement.
    pub fn outstanding(&self) -> Option<&ResyncPlayerMsg> {
        match &self.state {
            ResyncState::ResyncPending(pending) => Some(&pending.sent),
            ResyncState::Synced => None,
        }
    }

    pub fn last_acknowledged_tick(&self) -> Option<TickId> {
        self.last_acknowledged_tick
    }

    /// True when a client's report is far enough from server truth to need a correction.
    pub fn detect_drift(&self, report: &CheckSyncMsg, truth: &Player) -> bool {
        let tolerance = self.settings.position_tolerance;
        (report.x_pos - truth.x).abs() >= tolerance
            || (report.y_pos - truth.y).abs() >= tolerance
            || (report.y_vel - truth.y_vel).abs() >= tolerance
    }

    /// Records a correction about to be sent. Returns `None` when a correction with the same
    /// state is already outstanding, in which case nothing needs to go out.
    pub fn begin(&mut self, msg: ResyncPlayerMsg, now: u64) -> Option<ResyncPlayerMsg> {
        if let ResyncState::ResyncPending(pending) = &self.state {
            if pending.sent.update.same_state(&msg.update) {
                return None;
            }
        }

        self.state = ResyncState::ResyncPending(PendingResync {
            sent: msg.clone(),
            last_sent_at: now,
            expires_at: now + self.settings.max_pending_ticks,
        });
        Some(msg)
    }

    /// Checks an acknowledgement against the latest correction and clears the pending state
    /// when it matches.
    pub fn acknowledge(&mut self, ack: &ResyncAcknowledgedMsg) -> AckOutcome {
        let ResyncState::ResyncPending(pending) = &self.state else {
            let repeated = self
                .settled
                .as_ref()
                .is_some_and(|settled| self.matches_sent(settled, ack));
            return if repeated {
                AckOutcome::Repeated
            } else {
                AckOutcome::NotPending
            };
        };
        if !self.matches_sent(&pending.sent, ack) {
            return AckOutcome::Stale;
        }

        self.last_acknowledged_tick = Some(ack.tick_id);
        self.settled = Some(pending.sent.clone());
        self.state = ResyncState::Synced;
        AckOutcome::Accepted
    }

    fn matches_sent(&self, sent: &ResyncPlayerMsg, ack: &ResyncAcknowledgedMsg) -> bool {
        let eps = self.settings.ack_tolerance;
        let update = &sent.update;
        ack.tick_id == sent.tick_id
            && ack.player_id == update.player_id
            && is_near(ack.x_pos, update.x_pos, eps)
            && is_near(ack.y_pos, update.y_pos, eps)
            && is_near(ack.y_vel, update.y_vel, eps)
            && is_near(ack.angle, update.angle, eps)
            && is_near(ack.ghost_thrust, update.ghost_thrust, eps)
            && ack.health == update.health
    }

    /// The outstanding correction, if it has gone unacknowledged for the retry window.
    pub fn retry_due(&mut self, now: u64) -> Option<ResyncPlayerMsg> {
        let retry_after = self.settings.retry_after_ticks;
        match &mut self.state {
            ResyncState::ResyncPending(pending)
                if now.saturating_sub(pending.last_sent_at) >= retry_after =>
            {
                pending.last_sent_at = now;
                Some(pending.sent.clone())
            }
            _ => None,
        }
    }

    pub fn expired(&self, now: u64) -> bool {
        match &self.state {
            ResyncState::ResyncPending(pending) => now > pending.expires_at,
            ResyncState::Synced => false,
        }
    }
}
