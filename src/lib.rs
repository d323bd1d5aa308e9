//! # FieldQuest Server
//!
//! Mission progression and geofencing engine for the Yongchun Pi geology
//! field game: players walk to mission sites, answer field quizzes, attach
//! photo evidence and level up.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    FIELDQUEST SERVER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/            - Primitives                               │
//! │  ├── geo.rs       - Coordinates and haversine distance       │
//! │  ├── config.rs    - Tunable constants (env overridable)      │
//! │  └── flags.rs     - Persisted "tutorial seen" flag           │
//! │                                                              │
//! │  game/            - Engine (synchronous, no I/O)             │
//! │  ├── mission.rs   - Missions, quiz descriptors, catalog      │
//! │  ├── quiz.rs      - Answer verification                      │
//! │  ├── sampler.rs   - Position samples and queue               │
//! │  ├── fog.rs       - Proximity, reveal radius, GPS status     │
//! │  ├── progress.rs  - Mission progress and session store       │
//! │  ├── progression.rs - XP, level, rank, mana, fragments       │
//! │  ├── flow.rs      - Mission state machine                    │
//! │  ├── events.rs    - Domain events                            │
//! │  └── state.rs     - Session aggregate and UI projections     │
//! │                                                              │
//! │  network/         - Outer surface (async)                    │
//! │  ├── image_edit.rs- Generative image-edit collaborator       │
//! │  ├── protocol.rs  - JSON message types                       │
//! │  ├── session.rs   - Per-player session                       │
//! │  └── server.rs    - WebSocket server                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Single Owner
//!
//! Each connection owns exactly one [`game::GameState`]. Every event
//! (position sample, quiz submission, image-edit result) is applied to
//! completion before the next one is looked at, so the progression ledger
//! needs no locking.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use core::config::GameConfig;
pub use core::geo::GeoPoint;
pub use game::mission::{MissionCatalog, MissionId};
pub use game::state::GameState;
pub use network::session::PlayerSession;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
