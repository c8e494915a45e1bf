use crate::domain::{LatencySettings, ResyncSettings};
use std::{env, str::FromStr, time::Duration};

// Runtime/server constants and env overrides.

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

pub fn http_port() -> u16 {
    env_or("SYNC_SERVER_PORT", 3001)
}

pub fn tick_rate_hz() -> u32 {
    env_or("TICK_RATE_HZ", 60u32).max(1)
}

pub fn tick_interval() -> Duration {
    Duration::from_secs(1) / tick_rate_hz()
}

/// Delay between lobby creation and the game starting.
pub fn start_delay() -> Duration {
    Duration::from_millis(env_or("GAME_START_DELAY_MS", 0))
}

/// Resync tuning, with timeouts converted from wall-clock time into ticks.
pub fn resync_settings() -> ResyncSettings {
    let hz = u64::from(tick_rate_hz());
    let retry_ms: u64 = env_or("RESYNC_RETRY_MS", 500);
    let max_secs: u64 = env_or("MAX_RESYNC_SECS", 30);

    ResyncSettings {
        position_tolerance: env_or("RESYNC_TOLERANCE", 1.0),
        ack_tolerance: env_or("RESYNC_ACK_TOLERANCE", 1e-3),
        retry_after_ticks: (retry_ms * hz / 1000).max(1),
        max_pending_ticks: (max_secs * hz).max(1),
    }
}

/// Client delay estimation, with wall-clock settings converted into ticks.
pub fn latency_settings() -> LatencySettings {
    let hz = u64::from(tick_rate_hz());
    let to_ticks = |ms: u64| u16::try_from(ms * hz / 1000).unwrap_or(u16::MAX);
    let window_secs: u64 = env_or("DELAY_WINDOW_SECS", 10);

    LatencySettings {
        initial_delay: to_ticks(env_or("INITIAL_LATENCY_MS", 250)),
        lag_threshold: to_ticks(env_or("LAG_THRESHOLD_MS", 500)),
        lag_buffer: to_ticks(env_or("LAG_BUFFER_MS", 100)),
        window_ticks: (window_secs * hz).max(1),
    }
}

pub const INPUT_CHANNEL_CAPACITY: usize = 1024;
pub const COMMAND_BROADCAST_CAPACITY: usize = 256;

pub const DEFAULT_LOBBY_ID: &str = "test";
