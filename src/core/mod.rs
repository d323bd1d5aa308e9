//! Core primitives.
//!
//! Geometry, configuration and the persisted flag store.
//! Nothing in here knows about missions or players.

pub mod geo;
pub mod config;
pub mod flags;

// Re-export core types
pub use geo::{GeoPoint, haversine_meters, EARTH_RADIUS_METERS};
pub use config::GameConfig;
pub use flags::{FlagStore, FlagStoreError};
