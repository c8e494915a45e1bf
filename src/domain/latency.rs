//! Per-player latency estimate, measured in ticks.
//!
//! Every timestamped request tells the server how far behind server time the client was when
//! it acted. The tracker keeps the delay the server currently assumes for that client. A
//! request that arrives later than that assumption is a latency spike: the client predicted
//! against a world the server has already moved past. The assumption is eased back down once
//! a whole measurement window stays below it.

use super::messages::TickId;
use super::tick::{is_newer, ticks_between};

#[derive(Debug, Clone, Copy)]
pub struct LatencySettings {
    /// Delay assumed before anything has been measured.
    pub initial_delay: u16,
    /// Measured delays above this get `lag_buffer` added as headroom.
    pub lag_threshold: u16,
    pub lag_buffer: u16,
    /// Ticks per measurement window.
    pub window_ticks: u64,
}

impl Default for LatencySettings {
    fn default() -> Self {
        Self {
            initial_delay: 15,
            lag_threshold: 30,
            lag_buffer: 6,
            window_ticks: 600,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LatencyTracker {
    settings: LatencySettings,
    current: u16,
    // Worst adjusted delay seen in the running window.
    recent: Option<u16>,
    window_started: u64,
}

impl LatencyTracker {
    pub fn new(settings: LatencySettings, now: u64) -> Self {
        Self {
            settings,
            current: settings.initial_delay,
            recent: None,
            window_started: now,
        }
    }

    /// Delay currently assumed for this client.
    pub fn current(&self) -> u16 {
        self.current
    }

    /// Records a request stamped `stamped` arriving at `server_tick`. Returns the raised
    /// delay when the request came in later than the current assumption.
    pub fn observe(&mut self, stamped: TickId, server_tick: TickId) -> Option<u16> {
        // A stamp ahead of the server carries no delay information.
        let measured = if is_newer(stamped, server_tick) {
            0
        } else {
            ticks_between(stamped, server_tick)
        };
        let adjusted = if measured > self.settings.lag_threshold {
            measured.saturating_add(self.settings.lag_buffer)
        } else {
            measured
        };
        self.recent = Some(self.recent.map_or(adjusted, |r| r.max(adjusted)));

        if measured > self.current {
            self.current = adjusted;
            return Some(adjusted);
        }
        None
    }

    /// Closes the measurement window once it has run its length. Returns the lowered delay if
    /// everything seen in the window stayed below the current assumption.
    pub fn roll_window(&mut self, now: u64) -> Option<u16> {
        if now.saturating_sub(self.window_started) < self.settings.window_ticks {
            return None;
        }
        self.window_started = now;
        let recent = self.recent.take()?;
        if recent < self.current {
            self.current = recent;
            return Some(recent);
        }
        None
    }
}
