//! Presence configuration parsed from environment variables.
//!
//! Every radius and timing threshold the pipeline uses lives here so the
//! services never repeat literals.

use std::time::Duration;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_FRIEND_RADIUS_M: f64 = 15_000.0;
pub const DEFAULT_STRANGER_RADIUS_M: f64 = 5_000.0;
pub const DEFAULT_LOCATION_STALE_SECS: u64 = 600;
pub const DEFAULT_STALE_SWEEP_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Tunables for the proximity pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PresenceConfig {
    /// Maximum distance at which a friend is visible.
    pub friend_radius_m: f64,
    /// Maximum distance at which a stranger is visible.
    pub stranger_radius_m: f64,
    /// A location with no update for this long is evicted.
    pub stale_after: Duration,
    /// How often the eviction sweep runs.
    pub sweep_interval: Duration,
    /// Outbound frame buffer per websocket connection.
    pub channel_capacity: usize,
}

impl PresenceConfig {
    /// Build typed config from environment variables.
    ///
    /// Optional (defaults in parentheses):
    /// - `FRIEND_RADIUS_M` (15000)
    /// - `STRANGER_RADIUS_M` (5000)
    /// - `LOCATION_STALE_SECS` (600)
    /// - `STALE_SWEEP_INTERVAL_SECS` (60)
    /// - `CHANNEL_CAPACITY` (256)
    #[must_use]
    pub fn from_env() -> Self {
        let friend_radius_m = env_parse("FRIEND_RADIUS_M", DEFAULT_FRIEND_RADIUS_M);
        let stranger_radius_m = env_parse("STRANGER_RADIUS_M", DEFAULT_STRANGER_RADIUS_M);
        Self {
            friend_radius_m: positive_or(friend_radius_m, DEFAULT_FRIEND_RADIUS_M),
            stranger_radius_m: positive_or(stranger_radius_m, DEFAULT_STRANGER_RADIUS_M),
            stale_after: Duration::from_secs(env_parse("LOCATION_STALE_SECS", DEFAULT_LOCATION_STALE_SECS)),
            sweep_interval: Duration::from_secs(
                env_parse("STALE_SWEEP_INTERVAL_SECS", DEFAULT_STALE_SWEEP_INTERVAL_SECS).max(1),
            ),
            channel_capacity: env_parse("CHANNEL_CAPACITY", DEFAULT_CHANNEL_CAPACITY).max(1),
        }
    }

    /// Radius for the candidate query: the wider of the two categories.
    #[must_use]
    pub fn query_radius_m(&self) -> f64 {
        self.friend_radius_m.max(self.stranger_radius_m)
    }

    /// Radius that applies to a pair of the given category.
    #[must_use]
    pub fn radius_for(&self, is_friend: bool) -> f64 {
        if is_friend { self.friend_radius_m } else { self.stranger_radius_m }
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            friend_radius_m: DEFAULT_FRIEND_RADIUS_M,
            stranger_radius_m: DEFAULT_STRANGER_RADIUS_M,
            stale_after: Duration::from_secs(DEFAULT_LOCATION_STALE_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_STALE_SWEEP_INTERVAL_SECS),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn positive_or(value: f64, default: f64) -> f64 {
    if value.is_finite() && value > 0.0 { value } else { default }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
