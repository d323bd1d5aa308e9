//! Game State
//!
//! Single-owner aggregate for one player session: fog engine, position
//! queue, mission flow and event log. Every mutation runs to completion
//! before the next one starts; there is no internal locking.
//!
//! Exposes the two read-only projections the UI renders:
//! the map markers ([`MarkerView`]) and the HUD ([`HudView`]).

use std::sync::Arc;
use serde::{Serialize, Deserialize};
use tracing::{debug, trace};

use crate::core::config::GameConfig;
use crate::core::geo::GeoPoint;
use crate::game::events::{EventLog, GameEvent, GameEventData};
use crate::game::flow::{
    EditResolution, EditTicket, FlowError, ImageEditRequest, MissionFlow, MissionView, QuizOutcome,
};
use crate::game::fog::{GpsStatus, ProximityEngine};
use crate::game::mission::{Difficulty, MissionCatalog, MissionId, MissionKind};
use crate::game::progress::EvidenceImage;
use crate::game::progression::Finalization;
use crate::game::sampler::{PositionQueue, PositionSample};

/// Team name used when the player leaves it blank.
pub const DEFAULT_TEAM_NAME: &str = "UNIT-734";

/// Per-mission map projection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarkerView {
    /// Mission
    pub mission_id: MissionId,
    /// Title
    pub title: String,
    /// Difficulty tier (marker colour)
    pub difficulty: Difficulty,
    /// Main or side
    pub kind: MissionKind,
    /// Marker location, None for location-agnostic missions
    pub target: Option<GeoPoint>,
    /// Distance from the last fix
    pub distance_m: Option<f64>,
    /// Rendered (revealed, or fog disabled)
    pub visible: bool,
    /// Cannot be entered
    pub locked: bool,
    /// In the completed set
    pub completed: bool,
}

/// Progression HUD projection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HudView {
    /// Team name shown in the header
    pub team_name: String,
    /// Current level
    pub level: u32,
    /// Total XP
    pub current_xp: u32,
    /// XP total at which the next level starts
    pub next_level_xp: u32,
    /// XP earned inside the current level
    pub xp_into_level: u32,
    /// XP still missing for the next level
    pub xp_to_next_level: u32,
    /// Rank title
    pub rank: String,
    /// Current mana
    pub mana: u32,
    /// Mana ceiling
    pub max_mana: u32,
    /// Remaining SOS charges
    pub sos_count: u32,
    /// Fragments held
    pub fragments_collected: usize,
    /// Fragments in the catalog
    pub fragment_total: usize,
    /// GPS status
    pub gps_status: GpsStatus,
    /// Fog rendering on
    pub fog_enabled: bool,
}

/// Result of draining the position queue.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TickResult {
    /// Samples consumed
    pub samples: usize,
    /// Samples ignored for poor accuracy
    pub ignored: usize,
    /// GPS status or any marker reveal changed
    pub map_changed: bool,
}

/// Everything one player session owns.
#[derive(Clone, Debug)]
pub struct GameState {
    team_name: String,
    fog: ProximityEngine,
    positions: PositionQueue,
    flow: MissionFlow,
    log: EventLog,
}

impl GameState {
    /// Fresh session state over a shared catalog.
    pub fn new(catalog: Arc<MissionCatalog>, config: &GameConfig) -> Self {
        Self {
            team_name: DEFAULT_TEAM_NAME.to_string(),
            fog: ProximityEngine::new(&catalog, config),
            positions: PositionQueue::new(config.position_queue_capacity),
            flow: MissionFlow::new(catalog, config),
            log: EventLog::new(),
        }
    }

    /// Team name shown in the HUD.
    pub fn team_name(&self) -> &str {
        &self.team_name
    }

    /// Set the team name (trimmed; blank falls back to the default).
    pub fn set_team_name(&mut self, name: &str) -> &str {
        let name = name.trim();
        self.team_name = if name.is_empty() {
            DEFAULT_TEAM_NAME.to_string()
        } else {
            name.to_string()
        };
        &self.team_name
    }

    /// Proximity engine.
    pub fn fog(&self) -> &ProximityEngine {
        &self.fog
    }

    /// Mission flow.
    pub fn flow(&self) -> &MissionFlow {
        &self.flow
    }

    /// Current GPS status.
    pub fn gps_status(&self) -> GpsStatus {
        self.fog.gps_status()
    }

    // =========================================================================
    // POSITIONS
    // =========================================================================

    /// Queue a position sample for the next tick. Returns true if an older sample was dropped.
    pub fn push_position(&mut self, sample: PositionSample) -> bool {
        let dropped = self.positions.push(sample);
        if dropped {
            trace!(total_dropped = self.positions.dropped(), "position queue full, oldest dropped");
        }
        dropped
    }

    /// Queued position samples.
    pub fn queued_positions(&self) -> usize {
        self.positions.len()
    }

    /// Consume every queued sample in arrival order.
    pub fn tick(&mut self) -> TickResult {
        let mut result = TickResult::default();
        let samples = self.positions.drain();
        if samples.is_empty() {
            return result;
        }
        self.log.advance();

        for sample in &samples {
            let outcome = self.fog.ingest(sample);
            result.samples += 1;
            if outcome.ignored {
                result.ignored += 1;
            }
            if let Some((old_status, new_status)) = outcome.status_change {
                result.map_changed = true;
                self.log.push(GameEventData::GpsStatusChanged { old_status, new_status });
            }
            for (mission_id, revealed) in outcome.reveal_changes {
                result.map_changed = true;
                self.log.push(GameEventData::MarkerRevealed { mission_id, revealed });
            }
        }
        debug!(samples = result.samples, ignored = result.ignored, changed = result.map_changed, "positions ingested");
        result
    }

    /// Toggle the fog override.
    pub fn set_fog_enabled(&mut self, enabled: bool) {
        if self.fog.fog_enabled() == enabled {
            return;
        }
        self.log.advance();
        self.fog.set_fog_enabled(enabled);
        self.log.push(GameEventData::FogToggled { enabled });
    }

    // =========================================================================
    // PROJECTIONS
    // =========================================================================

    /// Map markers in mission-id order.
    pub fn markers(&self) -> Vec<MarkerView> {
        let progression = self.flow.progression();
        self.flow
            .catalog()
            .iter()
            .map(|mission| {
                let visible = self.fog.is_visible(&mission.id);
                MarkerView {
                    mission_id: mission.id.clone(),
                    title: mission.title.clone(),
                    difficulty: mission.difficulty,
                    kind: mission.kind,
                    target: mission.target,
                    distance_m: self.fog.distance_to(&mission.id),
                    visible,
                    locked: !self.flow.is_unlocked(mission, visible),
                    completed: progression.is_completed(&mission.id),
                }
            })
            .collect()
    }

    /// HUD numbers.
    pub fn hud(&self) -> HudView {
        let progression = self.flow.progression();
        let stats = progression.stats();
        HudView {
            team_name: self.team_name.clone(),
            level: stats.level,
            current_xp: stats.current_xp,
            next_level_xp: stats.next_level_xp,
            xp_into_level: progression.xp_into_level(),
            xp_to_next_level: progression.xp_to_next_level(),
            rank: stats.rank.clone(),
            mana: stats.mana,
            max_mana: stats.max_mana,
            sos_count: stats.sos_count,
            fragments_collected: progression.fragments().len(),
            fragment_total: self.flow.catalog().fragment_total(),
            gps_status: self.fog.gps_status(),
            fog_enabled: self.fog.fog_enabled(),
        }
    }

    /// Projection of the open mission.
    pub fn active_view(&self) -> Option<MissionView> {
        self.flow.active().map(|a| a.view())
    }

    /// Take pending events in order.
    pub fn drain_events(&mut self) -> Vec<GameEvent> {
        self.log.drain()
    }

    // =========================================================================
    // MISSION FLOW
    // =========================================================================

    fn apply<T>(
        &mut self,
        op: impl FnOnce(&mut MissionFlow) -> Result<T, FlowError>,
    ) -> Result<T, FlowError> {
        self.log.advance();
        let result = op(&mut self.flow);
        self.log.extend(self.flow.take_events());
        result
    }

    /// Map event "mission selected(id)".
    pub fn select_mission(&mut self, id: &MissionId) -> Result<MissionView, FlowError> {
        let visible = self.fog.is_visible(id);
        self.apply(|flow| flow.enter(id, visible).map(|a| a.view()))
    }

    /// Store a typed answer.
    pub fn update_field(&mut self, key: &str, value: &str) -> Result<(), FlowError> {
        self.apply(|flow| flow.update_field(key, value))
    }

    /// Verify every unsolved quiz part.
    pub fn submit_quiz(&mut self) -> Result<QuizOutcome, FlowError> {
        self.apply(MissionFlow::submit_quiz)
    }

    /// Verify one quiz part.
    pub fn submit_sub_check(&mut self, part: usize) -> Result<QuizOutcome, FlowError> {
        self.apply(|flow| flow.submit_sub_check(part))
    }

    /// Attach the evidence photo.
    pub fn attach_evidence(&mut self, image: EvidenceImage) -> Result<(), FlowError> {
        self.apply(|flow| flow.attach_evidence(image))
    }

    /// Set the evidence description / edit prompt.
    pub fn set_evidence_note(&mut self, note: &str) -> Result<(), FlowError> {
        self.apply(|flow| flow.set_evidence_note(note))
    }

    /// Issue an image-edit call.
    pub fn begin_image_edit(&mut self) -> Result<ImageEditRequest, FlowError> {
        self.apply(MissionFlow::begin_image_edit)
    }

    /// Feed back an image-edit result.
    pub fn resolve_image_edit(
        &mut self,
        ticket: EditTicket,
        result: Result<EvidenceImage, String>,
    ) -> EditResolution {
        self.log.advance();
        let resolution = self.flow.resolve_image_edit(ticket, result);
        self.log.extend(self.flow.take_events());
        resolution
    }

    /// Clear the image-edit error.
    pub fn dismiss_edit_error(&mut self) -> Result<(), FlowError> {
        self.apply(MissionFlow::dismiss_edit_error)
    }

    /// Confirm completion.
    pub fn submit(&mut self) -> Result<(), FlowError> {
        self.apply(MissionFlow::submit)
    }

    /// Acknowledge and finalize.
    pub fn acknowledge(&mut self) -> Result<Finalization, FlowError> {
        self.apply(MissionFlow::acknowledge)
    }

    /// Return to the map.
    pub fn back(&mut self) -> Result<MissionId, FlowError> {
        self.apply(MissionFlow::back)
    }
}
