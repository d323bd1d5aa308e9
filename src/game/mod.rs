//! Game Logic Module
//!
//! The field-mission engine. Synchronous and free of I/O.
//!
//! ## Module Structure
//!
//! - `mission`: Mission records, quiz descriptors, catalog
//! - `quiz`: Answer verification
//! - `sampler`: Position samples and the bounded sample queue
//! - `fog`: Distances, reveal radius, GPS status
//! - `progress`: Per-mission progress and the session store
//! - `progression`: XP, level, rank, mana, completed and fragment sets
//! - `flow`: Mission state machine
//! - `events`: Domain events for the client
//! - `state`: Session aggregate and UI projections

pub mod mission;
pub mod quiz;
pub mod sampler;
pub mod fog;
pub mod progress;
pub mod progression;
pub mod flow;
pub mod events;
pub mod state;

// Re-export key types
pub use mission::{Mission, MissionCatalog, MissionId, MissionKind, QuizDescriptor};
pub use quiz::{AnswerFields, QuizVerifier};
pub use sampler::{PositionQueue, PositionSample, SampleStatus};
pub use fog::{GpsStatus, ProximityEngine};
pub use progress::{EvidenceImage, MissionProgress, SessionStore};
pub use progression::{Finalization, PlayerStats, Progression};
pub use flow::{EditResolution, EditTicket, FlowError, ImageEditRequest, MissionFlow, MissionPhase, MissionView};
pub use events::{GameEvent, GameEventData};
pub use state::{GameState, HudView, MarkerView, TickResult};
