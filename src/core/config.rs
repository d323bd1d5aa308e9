//! Game Configuration
//!
//! Product-level constants for fog, GPS and progression.
//! Every value can be overridden from the environment (`FIELDQUEST_*`).

use std::str::FromStr;

/// Tunable constants for the engine.
#[derive(Clone, Debug, PartialEq)]
pub struct GameConfig {
    /// Fog reveal radius R in meters.
    pub reveal_radius_m: f64,
    /// Worst GPS accuracy (meters) that still counts as a fix.
    pub max_accuracy_m: f64,
    /// XP span of one level (level = xp / xp_per_level + 1).
    pub xp_per_level: u32,
    /// XP granted for each solved quiz field of a main mission.
    pub field_xp_bonus: u32,
    /// Mana spent on every mission finalization.
    pub mana_cost: u32,
    /// Mana at session start.
    pub initial_mana: u32,
    /// Mana ceiling.
    pub max_mana: u32,
    /// SOS charges at session start.
    pub initial_sos: u32,
    /// Capacity of the position sample queue (oldest dropped when full).
    pub position_queue_capacity: usize,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            reveal_radius_m: 100.0,
            max_accuracy_m: 50.0,
            xp_per_level: 500,
            field_xp_bonus: 100,
            mana_cost: 15,
            initial_mana: 75,
            max_mana: 100,
            initial_sos: 1,
            position_queue_capacity: 64,
        }
    }
}

impl GameConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            reveal_radius_m: env_or("FIELDQUEST_REVEAL_RADIUS_M", defaults.reveal_radius_m),
            max_accuracy_m: env_or("FIELDQUEST_MAX_ACCURACY_M", defaults.max_accuracy_m),
            xp_per_level: env_or("FIELDQUEST_XP_PER_LEVEL", defaults.xp_per_level).max(1),
            field_xp_bonus: env_or("FIELDQUEST_FIELD_XP", defaults.field_xp_bonus),
            mana_cost: env_or("FIELDQUEST_MANA_COST", defaults.mana_cost),
            initial_mana: env_or("FIELDQUEST_INITIAL_MANA", defaults.initial_mana),
            max_mana: env_or("FIELDQUEST_MAX_MANA", defaults.max_mana),
            initial_sos: env_or("FIELDQUEST_INITIAL_SOS", defaults.initial_sos),
            position_queue_capacity: env_or(
                "FIELDQUEST_POSITION_QUEUE",
                defaults.position_queue_capacity,
            )
            .max(1),
        }
    }
}

/// Read and parse an environment variable, keeping `default` when unset or malformed.
pub(crate) fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, value = %raw, "ignoring malformed config value");
                default
            }
        },
        Err(_) => default,
    }
}
