//! Mission State Machine
//!
//! Drives one mission at a time through
//! `Locked → Entered → (QuizPending ↔ QuizError) → QuizSolved → (EvidencePending) → PreComplete → Completed`.
//!
//! The flow owns the [`Progression`] context and the [`SessionStore`]; the
//! ledger is only mutated from two places:
//!
//! - a newly solved quiz part ([`Progression::award_field_bonus`])
//! - the finalization on acknowledgment ([`Progression::finalize`])
//!
//! Every rejected call returns a [`FlowError`] and leaves state untouched.
//! Wrong answers are not errors: they set an inline error flag.

use std::collections::BTreeSet;
use std::sync::Arc;
use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::config::GameConfig;
use crate::game::events::GameEventData;
use crate::game::mission::{Mission, MissionCatalog, MissionId, MissionKind, QuizDescriptor};
use crate::game::progress::{EvidenceImage, MissionProgress, SessionStore};
use crate::game::progression::{Finalization, Progression, XpAward};
use crate::game::quiz::{verify_part, AnswerFields};

/// Mission phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionPhase {
    /// Not entered
    Locked,
    /// Just selected from the map
    Entered,
    /// Waiting for quiz answers
    QuizPending,
    /// Last submission was wrong
    QuizError,
    /// Every quiz part solved
    QuizSolved,
    /// Evidence attached, optional image edit
    EvidencePending,
    /// Completion acknowledgment shown
    PreComplete,
    /// Finalized (or reopened for review)
    Completed,
}

/// Mission state machine errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FlowError {
    /// Mission id not in the catalog.
    #[error("Unknown mission: {0}")]
    UnknownMission(MissionId),

    /// A different mission is open.
    #[error("Mission {0} is already in progress")]
    AnotherMissionActive(MissionId),

    /// Nothing is open.
    #[error("No mission is active")]
    NoActiveMission,

    /// Action not allowed in the current phase.
    #[error("Cannot {action} while {phase:?}")]
    InvalidPhase {
        /// Current phase
        phase: MissionPhase,
        /// Rejected action
        action: &'static str,
    },

    /// Field belongs to an already solved part.
    #[error("Field {0} is already solved")]
    FieldLocked(String),

    /// Field key is not part of the mission's quiz.
    #[error("Unknown answer field: {0}")]
    UnknownField(String),

    /// Mission is fogged and was never started.
    #[error("Mission {0} is still hidden")]
    NotVisible(MissionId),

    /// Only one image edit at a time.
    #[error("An image edit is already in progress")]
    EditInFlight,

    /// Image edit needs an attached photo.
    #[error("No evidence image attached")]
    NoEvidence,

    /// Mission has no quiz.
    #[error("Mission has no quiz")]
    NoQuiz,

    /// Quiz part index out of range.
    #[error("Unknown quiz part: {0}")]
    UnknownSubCheck(usize),

    /// Completed missions reopen read-only.
    #[error("Completed mission is read-only")]
    ReviewOnly,
}

/// Identifies one image-edit call. Monotonic per flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EditTicket(pub u64);

/// Work order for the image-edit collaborator.
#[derive(Clone, Debug)]
pub struct ImageEditRequest {
    /// Ticket to hand back on resolution
    pub ticket: EditTicket,
    /// Mission the edit belongs to
    pub mission_id: MissionId,
    /// Source image
    pub image: EvidenceImage,
    /// Free-text prompt
    pub prompt: String,
}

/// What happened to an image-edit result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EditResolution {
    /// Edited image stored
    Applied,
    /// Error message stored for dismissal
    Failed(String),
    /// Ticket no longer current; result dropped
    Discarded,
}

/// Result of a quiz submission.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QuizOutcome {
    /// Every checked part passed
    pub correct: bool,
    /// Parts solved by this submission
    pub newly_solved: Vec<usize>,
    /// Whole quiz solved
    pub quiz_solved: bool,
    /// Field XP granted by this submission
    pub xp_awarded: u32,
}

/// Index of the quiz part that reads `key`.
fn part_for_field(descriptor: &QuizDescriptor, key: &str) -> Option<usize> {
    match descriptor {
        QuizDescriptor::SubChecks { checks } => {
            checks.iter().position(|c| c.field_keys().contains(&key))
        }
        other => other.field_keys().contains(&key).then_some(0),
    }
}

// =============================================================================
// ACTIVE MISSION
// =============================================================================

/// The mission currently open.
#[derive(Clone, Debug)]
pub struct ActiveMission {
    mission: Mission,
    phase: MissionPhase,
    progress: MissionProgress,
    part_errors: BTreeSet<usize>,
    pending_edit: Option<EditTicket>,
    edit_error: Option<String>,
    review: bool,
}

impl ActiveMission {
    /// Mission definition.
    pub fn mission(&self) -> &Mission {
        &self.mission
    }

    /// Current phase.
    pub fn phase(&self) -> MissionPhase {
        self.phase
    }

    /// Entered progress.
    pub fn progress(&self) -> &MissionProgress {
        &self.progress
    }

    /// Read-only review of a completed main mission?
    pub fn is_review(&self) -> bool {
        self.review
    }

    /// Inline quiz error flag.
    pub fn quiz_error(&self) -> bool {
        !self.part_errors.is_empty()
    }

    /// Quiz parts whose last submission was wrong.
    pub fn part_errors(&self) -> &BTreeSet<usize> {
        &self.part_errors
    }

    /// Ticket of the outstanding image edit.
    pub fn pending_edit(&self) -> Option<EditTicket> {
        self.pending_edit
    }

    /// Dismissible image-edit error.
    pub fn edit_error(&self) -> Option<&str> {
        self.edit_error.as_deref()
    }

    /// Answer fields that no longer accept input.
    pub fn locked_fields(&self) -> BTreeSet<String> {
        let Some(quiz) = &self.mission.quiz else {
            return BTreeSet::new();
        };
        quiz.descriptor
            .field_keys()
            .into_iter()
            .filter(|key| {
                self.progress.quiz_solved
                    || part_for_field(&quiz.descriptor, key)
                        .is_some_and(|p| self.progress.is_part_solved(p))
            })
            .map(str::to_string)
            .collect()
    }

    fn ensure_editable(&self) -> Result<(), FlowError> {
        if self.review {
            return Err(FlowError::ReviewOnly);
        }
        Ok(())
    }

    fn transition(&mut self, to: MissionPhase) {
        if self.phase != to {
            debug!(mission_id = %self.mission.id, from = ?self.phase, to = ?to, "mission phase");
            self.phase = to;
        }
    }

    /// Read-only projection for the UI.
    pub fn view(&self) -> MissionView {
        MissionView {
            mission_id: self.mission.id.clone(),
            title: self.mission.title.clone(),
            description: self.mission.description.clone(),
            kind: self.mission.kind,
            phase: self.phase,
            review: self.review,
            question: self.mission.quiz.as_ref().map(|q| q.question.clone()),
            evidence_instruction: self.mission.evidence_instruction.clone(),
            answers: self.progress.answers.clone(),
            solved_parts: self.progress.solved_parts.iter().copied().collect(),
            locked_fields: self.locked_fields().into_iter().collect(),
            quiz_solved: self.progress.quiz_solved,
            quiz_error: self.quiz_error(),
            part_errors: self.part_errors.iter().copied().collect(),
            evidence: self.progress.evidence.as_ref().map(EvidenceSummary::from),
            edited_evidence: self.progress.edited_evidence.as_ref().map(EvidenceSummary::from),
            evidence_note: self.progress.evidence_note.clone(),
            edit_in_flight: self.pending_edit.is_some(),
            edit_error: self.edit_error.clone(),
        }
    }
}

/// Image metadata shown in the mission view.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceSummary {
    /// Reference ID
    pub id: Uuid,
    /// MIME type
    pub mime_type: String,
    /// Payload size
    pub bytes: usize,
}

impl From<&EvidenceImage> for EvidenceSummary {
    fn from(image: &EvidenceImage) -> Self {
        Self {
            id: image.id,
            mime_type: image.mime_type.clone(),
            bytes: image.size(),
        }
    }
}

/// Active-mission projection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MissionView {
    /// Mission id
    pub mission_id: MissionId,
    /// Title
    pub title: String,
    /// Briefing text
    pub description: String,
    /// Main or side
    pub kind: MissionKind,
    /// Current phase
    pub phase: MissionPhase,
    /// Opened read-only
    pub review: bool,
    /// Quiz question, if any
    pub question: Option<String>,
    /// Photo instruction, if any
    pub evidence_instruction: Option<String>,
    /// Typed answer fields
    pub answers: AnswerFields,
    /// Solved quiz parts
    pub solved_parts: Vec<usize>,
    /// Read-only answer fields
    pub locked_fields: Vec<String>,
    /// Whole quiz solved
    pub quiz_solved: bool,
    /// Last submission was wrong
    pub quiz_error: bool,
    /// Parts flagged by the last submission
    pub part_errors: Vec<usize>,
    /// Attached photo
    pub evidence: Option<EvidenceSummary>,
    /// Photo returned by the image editor
    pub edited_evidence: Option<EvidenceSummary>,
    /// Prompt for the image editor
    pub evidence_note: String,
    /// An image edit is running
    pub edit_in_flight: bool,
    /// Dismissible image-edit error
    pub edit_error: Option<String>,
}

// =============================================================================
// MISSION FLOW
// =============================================================================

/// Mission state machine plus the progression context it owns.
#[derive(Clone, Debug)]
pub struct MissionFlow {
    catalog: Arc<MissionCatalog>,
    progression: Progression,
    store: SessionStore,
    active: Option<ActiveMission>,
    next_ticket: u64,
    events: Vec<GameEventData>,
}

impl MissionFlow {
    /// Create a flow over a catalog.
    pub fn new(catalog: Arc<MissionCatalog>, config: &GameConfig) -> Self {
        Self {
            catalog,
            progression: Progression::new(config),
            store: SessionStore::new(),
            active: None,
            next_ticket: 1,
            events: Vec::new(),
        }
    }

    /// Mission catalog.
    pub fn catalog(&self) -> &MissionCatalog {
        &self.catalog
    }

    /// Progression context.
    pub fn progression(&self) -> &Progression {
        &self.progression
    }

    /// Session store.
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Mission currently open.
    pub fn active(&self) -> Option<&ActiveMission> {
        self.active.as_ref()
    }

    /// Take events emitted since the last call.
    pub fn take_events(&mut self) -> Vec<GameEventData> {
        std::mem::take(&mut self.events)
    }

    /// Rank gate. Requirements are carried on each mission but never block entry.
    pub fn rank_requirement_met(&self, _mission: &Mission) -> bool {
        true
    }

    /// Can the mission be opened, given its current map visibility?
    ///
    /// Missions already in progress or completed stay reachable when fogged.
    pub fn is_unlocked(&self, mission: &Mission, visible: bool) -> bool {
        self.rank_requirement_met(mission)
            && (visible
                || self.store.contains(&mission.id)
                || self.progression.is_completed(&mission.id))
    }

    fn active_mut(&mut self) -> Result<&mut ActiveMission, FlowError> {
        self.active.as_mut().ok_or(FlowError::NoActiveMission)
    }

    fn note_award(&mut self, award: XpAward) {
        if award.leveled_up() {
            self.events.push(GameEventData::LevelUp {
                old_level: award.old_level,
                new_level: award.new_level,
                rank: self.progression.stats().rank.clone(),
            });
        }
    }

    // -------------------------------------------------------------------------
    // Entry / exit
    // -------------------------------------------------------------------------

    /// Open a mission selected on the map.
    ///
    /// Restores a stored snapshot when there is one, otherwise seeds fresh
    /// progress from the mission's prompt hint. A completed main mission
    /// reopens read-only with every part marked solved.
    pub fn enter(&mut self, id: &MissionId, visible: bool) -> Result<&ActiveMission, FlowError> {
        if self.active.as_ref().is_some_and(|a| a.mission.id == *id) {
            return self.active.as_ref().ok_or(FlowError::NoActiveMission);
        }
        if let Some(active) = &self.active {
            warn!(requested = %id, active = %active.mission.id, "mission already in progress");
            return Err(FlowError::AnotherMissionActive(active.mission.id.clone()));
        }

        let mission = self
            .catalog
            .get(id)
            .cloned()
            .ok_or_else(|| FlowError::UnknownMission(id.clone()))?;
        if !self.is_unlocked(&mission, visible) {
            warn!(mission_id = %id, "mission is not unlocked");
            return Err(FlowError::NotVisible(id.clone()));
        }

        let review = mission.is_main() && self.progression.is_completed(id);
        let stored = self.store.load(id).cloned();
        let resumed = stored.is_some();
        let mut progress =
            stored.unwrap_or_else(|| MissionProgress::seeded(mission.prompt_hint.clone()));

        let phase = if review {
            if let Some(quiz) = &mission.quiz {
                progress.solved_parts = (0..quiz.descriptor.part_count()).collect();
            }
            progress.quiz_solved = true;
            MissionPhase::Completed
        } else if mission.quiz.is_none() || progress.quiz_solved {
            progress.quiz_solved = true;
            if mission.has_evidence_step() && progress.evidence.is_some() {
                MissionPhase::EvidencePending
            } else {
                MissionPhase::QuizSolved
            }
        } else {
            MissionPhase::QuizPending
        };

        info!(mission_id = %id, resumed, review, phase = ?phase, "mission entered");
        self.events.push(GameEventData::MissionEntered {
            mission_id: id.clone(),
            resumed,
            review,
        });

        let mut active = ActiveMission {
            mission,
            phase: MissionPhase::Entered,
            progress,
            part_errors: BTreeSet::new(),
            pending_edit: None,
            edit_error: None,
            review,
        };
        active.transition(phase);
        self.active = Some(active);
        self.active.as_ref().ok_or(FlowError::NoActiveMission)
    }

    /// Return to the map, snapshotting progress so the mission resumes as left.
    ///
    /// An outstanding image edit is abandoned; its late result is discarded.
    pub fn back(&mut self) -> Result<MissionId, FlowError> {
        let active = self.active.take().ok_or(FlowError::NoActiveMission)?;
        let id = active.mission.id.clone();
        if !active.review {
            self.store.save(&id, active.progress);
        }
        info!(mission_id = %id, abandoned_edit = ?active.pending_edit, "mission left");
        self.events.push(GameEventData::MissionLeft { mission_id: id.clone() });
        Ok(id)
    }

    // -------------------------------------------------------------------------
    // Quiz
    // -------------------------------------------------------------------------

    /// Store a typed answer. Fields of solved parts are read-only.
    pub fn update_field(&mut self, key: &str, value: &str) -> Result<(), FlowError> {
        let active = self.active_mut()?;
        active.ensure_editable()?;
        let quiz = active.mission.quiz.as_ref().ok_or(FlowError::NoQuiz)?;
        let part = part_for_field(&quiz.descriptor, key)
            .ok_or_else(|| FlowError::UnknownField(key.to_string()))?;

        if active.progress.quiz_solved || active.progress.is_part_solved(part) {
            return Err(FlowError::FieldLocked(key.to_string()));
        }
        if !matches!(active.phase, MissionPhase::QuizPending | MissionPhase::QuizError) {
            return Err(FlowError::InvalidPhase { phase: active.phase, action: "update_field" });
        }

        active.progress.answers.insert(key.to_string(), value.to_string());
        active.part_errors.remove(&part);
        if active.part_errors.is_empty() {
            active.transition(MissionPhase::QuizPending);
        }
        Ok(())
    }

    /// Verify every unsolved quiz part.
    pub fn submit_quiz(&mut self) -> Result<QuizOutcome, FlowError> {
        self.check_parts(None)
    }

    /// Verify a single quiz part. Parts may be solved in any order.
    pub fn submit_sub_check(&mut self, part: usize) -> Result<QuizOutcome, FlowError> {
        self.check_parts(Some(part))
    }

    fn check_parts(&mut self, only: Option<usize>) -> Result<QuizOutcome, FlowError> {
        let active = self.active_mut()?;
        active.ensure_editable()?;
        let quiz = active.mission.quiz.clone().ok_or(FlowError::NoQuiz)?;
        if !matches!(active.phase, MissionPhase::QuizPending | MissionPhase::QuizError) {
            return Err(FlowError::InvalidPhase { phase: active.phase, action: "submit_quiz" });
        }

        let count = quiz.descriptor.part_count();
        let parts: Vec<usize> = match only {
            Some(p) if p >= count => return Err(FlowError::UnknownSubCheck(p)),
            Some(p) => vec![p],
            None => (0..count).collect(),
        };

        let mut outcome = QuizOutcome { correct: true, ..QuizOutcome::default() };
        let mut rejected = Vec::new();
        for p in parts {
            if active.progress.is_part_solved(p) {
                continue;
            }
            if verify_part(&quiz.descriptor, p, &active.progress.answers) == Some(true) {
                active.progress.solved_parts.insert(p);
                active.part_errors.remove(&p);
                outcome.newly_solved.push(p);
            } else {
                active.part_errors.insert(p);
                outcome.correct = false;
                rejected.push(p);
            }
        }

        outcome.quiz_solved = active.progress.solved_parts.len() >= count;
        active.progress.quiz_solved = outcome.quiz_solved;
        let next = if outcome.quiz_solved {
            MissionPhase::QuizSolved
        } else if active.part_errors.is_empty() {
            MissionPhase::QuizPending
        } else {
            MissionPhase::QuizError
        };
        active.transition(next);
        let mission = active.mission.clone();

        for p in &outcome.newly_solved {
            let award = self.progression.award_field_bonus(&mission);
            let xp = award.map_or(0, |a| a.amount);
            outcome.xp_awarded += xp;
            self.events.push(GameEventData::FieldSolved {
                mission_id: mission.id.clone(),
                part: *p,
                xp_awarded: xp,
            });
            if let Some(award) = award {
                self.note_award(award);
            }
        }
        for p in rejected {
            debug!(mission_id = %mission.id, part = p, "quiz part rejected");
            self.events.push(GameEventData::QuizRejected {
                mission_id: mission.id.clone(),
                part: (count > 1).then_some(p),
            });
        }
        if outcome.quiz_solved && !outcome.newly_solved.is_empty() {
            info!(mission_id = %mission.id, "quiz solved");
            self.events.push(GameEventData::QuizSolved { mission_id: mission.id.clone() });
        }
        Ok(outcome)
    }

    // -------------------------------------------------------------------------
    // Evidence
    // -------------------------------------------------------------------------

    /// Attach (or replace) the evidence photo.
    pub fn attach_evidence(&mut self, image: EvidenceImage) -> Result<(), FlowError> {
        let active = self.active_mut()?;
        active.ensure_editable()?;
        if !active.mission.has_evidence_step()
            || !matches!(active.phase, MissionPhase::QuizSolved | MissionPhase::EvidencePending)
        {
            return Err(FlowError::InvalidPhase { phase: active.phase, action: "attach_evidence" });
        }
        if active.pending_edit.is_some() {
            return Err(FlowError::EditInFlight);
        }

        let bytes = image.size();
        active.progress.evidence = Some(image);
        active.progress.edited_evidence = None;
        active.edit_error = None;
        active.transition(MissionPhase::EvidencePending);

        let mission_id = active.mission.id.clone();
        debug!(mission_id = %mission_id, bytes, "evidence attached");
        self.events.push(GameEventData::EvidenceAttached { mission_id, bytes });
        Ok(())
    }

    /// Set the evidence description, which doubles as the image-edit prompt.
    pub fn set_evidence_note(&mut self, note: &str) -> Result<(), FlowError> {
        let active = self.active_mut()?;
        active.ensure_editable()?;
        if !active.mission.has_evidence_step() || active.phase == MissionPhase::PreComplete {
            return Err(FlowError::InvalidPhase { phase: active.phase, action: "set_evidence_note" });
        }
        active.progress.evidence_note = note.to_string();
        Ok(())
    }

    /// Issue an image-edit call for the attached evidence.
    ///
    /// At most one call is outstanding per mission instance.
    pub fn begin_image_edit(&mut self) -> Result<ImageEditRequest, FlowError> {
        let ticket = EditTicket(self.next_ticket);
        let active = self.active_mut()?;
        active.ensure_editable()?;
        if active.phase != MissionPhase::EvidencePending {
            return Err(FlowError::InvalidPhase { phase: active.phase, action: "request_image_edit" });
        }
        if active.pending_edit.is_some() {
            return Err(FlowError::EditInFlight);
        }
        let image = active.progress.evidence.clone().ok_or(FlowError::NoEvidence)?;

        let note = active.progress.evidence_note.trim();
        let prompt = if note.is_empty() {
            active.mission.prompt_hint.clone()
        } else {
            note.to_string()
        };

        active.pending_edit = Some(ticket);
        active.edit_error = None;
        let mission_id = active.mission.id.clone();
        self.next_ticket += 1;

        info!(mission_id = %mission_id, ticket = ticket.0, "image edit requested");
        self.events.push(GameEventData::ImageEditRequested {
            mission_id: mission_id.clone(),
            ticket: ticket.0,
        });
        Ok(ImageEditRequest { ticket, mission_id, image, prompt })
    }

    /// Feed back the collaborator's answer. Stale tickets are discarded.
    pub fn resolve_image_edit(
        &mut self,
        ticket: EditTicket,
        result: Result<EvidenceImage, String>,
    ) -> EditResolution {
        let Some(active) = self.active.as_mut().filter(|a| a.pending_edit == Some(ticket)) else {
            debug!(ticket = ticket.0, "discarding stale image edit result");
            self.events.push(GameEventData::ImageEditDiscarded { ticket: ticket.0 });
            return EditResolution::Discarded;
        };

        active.pending_edit = None;
        let mission_id = active.mission.id.clone();
        match result {
            Ok(image) => {
                active.progress.edited_evidence = Some(image);
                info!(mission_id = %mission_id, ticket = ticket.0, "image edit applied");
                self.events.push(GameEventData::ImageEditSucceeded { mission_id, ticket: ticket.0 });
                EditResolution::Applied
            }
            Err(message) => {
                active.edit_error = Some(message.clone());
                warn!(mission_id = %mission_id, ticket = ticket.0, error = %message, "image edit failed");
                self.events.push(GameEventData::ImageEditFailed {
                    mission_id,
                    ticket: ticket.0,
                    message: message.clone(),
                });
                EditResolution::Failed(message)
            }
        }
    }

    /// Clear the image-edit error message.
    pub fn dismiss_edit_error(&mut self) -> Result<(), FlowError> {
        self.active_mut()?.edit_error = None;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Completion
    // -------------------------------------------------------------------------

    /// Confirm completion. Evidence and image editing are optional.
    ///
    /// An outstanding image edit is abandoned.
    pub fn submit(&mut self) -> Result<(), FlowError> {
        let active = self.active_mut()?;
        active.ensure_editable()?;
        if !matches!(active.phase, MissionPhase::QuizSolved | MissionPhase::EvidencePending) {
            return Err(FlowError::InvalidPhase { phase: active.phase, action: "submit" });
        }
        active.pending_edit = None;
        active.transition(MissionPhase::PreComplete);
        let mission_id = active.mission.id.clone();
        self.events.push(GameEventData::CompletionPending { mission_id });
        Ok(())
    }

    /// Acknowledge the completion message and finalize the mission.
    ///
    /// The mission closes afterwards. Acknowledging a reviewed mission is a
    /// finalization that awards nothing.
    pub fn acknowledge(&mut self) -> Result<Finalization, FlowError> {
        let active = self.active.as_ref().ok_or(FlowError::NoActiveMission)?;
        let allowed = active.phase == MissionPhase::PreComplete
            || (active.review && active.phase == MissionPhase::Completed);
        if !allowed {
            return Err(FlowError::InvalidPhase { phase: active.phase, action: "acknowledge" });
        }
        let mut active = self.active.take().ok_or(FlowError::NoActiveMission)?;
        active.transition(MissionPhase::Completed);

        let mission = active.mission;
        let finalization = self.progression.finalize(&mission);
        match finalization {
            Finalization::MainCompleted { xp, mana_spent, fragment } => {
                self.store.save(&mission.id, active.progress);
                self.events.push(GameEventData::MissionCompleted {
                    mission_id: mission.id.clone(),
                    xp_awarded: xp.amount,
                    mana_spent,
                    repeatable: false,
                });
                self.note_award(xp);
                if let Some(fragment_id) = fragment {
                    self.events.push(GameEventData::FragmentCollected {
                        fragment_id,
                        collected: self.progression.fragments().len(),
                        total: self.catalog.fragment_total(),
                    });
                }
            }
            Finalization::SideCompleted { xp, mana_spent } => {
                self.store.clear(&mission.id);
                self.events.push(GameEventData::MissionCompleted {
                    mission_id: mission.id.clone(),
                    xp_awarded: xp.amount,
                    mana_spent,
                    repeatable: true,
                });
                self.note_award(xp);
            }
            Finalization::AlreadyCompleted => {
                debug!(mission_id = %mission.id, "already completed, nothing awarded");
            }
        }
        Ok(finalization)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow() -> MissionFlow {
        MissionFlow::new(Arc::new(MissionCatalog::reference()), &GameConfig::default())
    }

    fn id(s: &str) -> MissionId {
        MissionId::from(s)
    }

    fn photo() -> EvidenceImage {
        EvidenceImage::new("image/jpeg", vec![0xff, 0xd8, 0xff])
    }

    fn solve_mission_one(flow: &mut MissionFlow) {
        for (k, v) in [("tiger", "138"), ("leopard", "141"), ("lion", "150"), ("elephant", "183m")] {
            flow.update_field(k, v).unwrap();
        }
        flow.update_field("reason", "四周山高，中間低窪").unwrap();
    }

    #[test]
    fn test_entry_requires_visibility() {
        let mut flow = flow();
        assert_eq!(flow.enter(&id("2"), false).unwrap_err(), FlowError::NotVisible(id("2")));
        assert_eq!(
            flow.enter(&id("nope"), true).unwrap_err(),
            FlowError::UnknownMission(id("nope"))
        );
        assert!(flow.active().is_none());
    }

    #[test]
    fn test_single_active_mission() {
        let mut flow = flow();
        flow.enter(&id("1"), true).unwrap();
        // Re-selecting the open mission is harmless
        assert!(flow.enter(&id("1"), true).is_ok());
        assert_eq!(
            flow.enter(&id("2"), true).unwrap_err(),
            FlowError::AnotherMissionActive(id("1"))
        );
    }

    #[test]
    fn test_main_mission_full_flow() {
        let mut flow = flow();
        let active = flow.enter(&id("2"), true).unwrap();
        assert_eq!(active.phase(), MissionPhase::QuizPending);
        assert_eq!(active.progress().evidence_note, "描述岩石特徵 (例如：羽毛狀節理)");

        flow.update_field("answer", "北港層").unwrap();
        let wrong = flow.submit_quiz().unwrap();
        assert!(!wrong.correct);
        assert!(flow.active().unwrap().quiz_error());
        assert_eq!(flow.active().unwrap().phase(), MissionPhase::QuizError);

        flow.update_field("answer", "我覺得是南港層").unwrap();
        let right = flow.submit_quiz().unwrap();
        assert!(right.quiz_solved);
        assert_eq!(right.xp_awarded, 100);
        assert_eq!(flow.update_field("answer", "x").unwrap_err(), FlowError::FieldLocked("answer".into()));

        flow.attach_evidence(photo()).unwrap();
        flow.set_evidence_note("羽毛狀").unwrap();
        let request = flow.begin_image_edit().unwrap();
        assert_eq!(request.prompt, "羽毛狀");
        assert_eq!(flow.begin_image_edit().unwrap_err(), FlowError::EditInFlight);
        assert_eq!(
            flow.resolve_image_edit(request.ticket, Ok(EvidenceImage::new("image/png", vec![1]))),
            EditResolution::Applied
        );

        flow.submit().unwrap();
        let fin = flow.acknowledge().unwrap();
        assert!(matches!(fin, Finalization::MainCompleted { fragment: Some(1), .. }));
        assert!(flow.active().is_none());

        let stats = flow.progression().stats();
        assert_eq!(stats.current_xp, 400);
        assert_eq!(stats.mana, 60);
        assert!(flow.store().load(&id("2")).is_some_and(|p| p.quiz_solved));
        assert_eq!(flow.acknowledge().unwrap_err(), FlowError::NoActiveMission);
    }

    #[test]
    fn test_completed_mission_reopens_for_review() {
        let mut flow = flow();
        flow.enter(&id("3"), true).unwrap();
        flow.update_field("density", "稀疏").unwrap();
        flow.update_field("feeling", "不累").unwrap();
        flow.submit_quiz().unwrap();
        flow.submit().unwrap();
        flow.acknowledge().unwrap();
        let xp = flow.progression().stats().current_xp;

        // Fogged now, but completed missions stay reachable
        let active = flow.enter(&id("3"), false).unwrap();
        assert!(active.is_review());
        assert_eq!(active.phase(), MissionPhase::Completed);
        assert_eq!(active.progress().answers.get("density").map(String::as_str), Some("稀疏"));
        assert_eq!(flow.update_field("density", "密集").unwrap_err(), FlowError::ReviewOnly);
        assert_eq!(flow.submit().unwrap_err(), FlowError::ReviewOnly);

        assert_eq!(flow.acknowledge().unwrap(), Finalization::AlreadyCompleted);
        assert_eq!(flow.progression().stats().current_xp, xp);
        assert_eq!(flow.progression().fragments().len(), 1);
    }

    #[test]
    fn test_back_restores_solved_sub_checks() {
        let mut flow = flow();
        flow.enter(&id("1"), true).unwrap();
        solve_mission_one(&mut flow);
        flow.update_field("tiger", "999").unwrap();

        // Reasoning first, heights still wrong
        let reason = flow.submit_sub_check(1).unwrap();
        assert_eq!(reason.newly_solved, vec![1]);
        assert!(!reason.quiz_solved);
        let heights = flow.submit_sub_check(0).unwrap();
        assert!(!heights.correct);
        assert_eq!(flow.active().unwrap().part_errors().iter().copied().collect::<Vec<_>>(), vec![0]);

        flow.back().unwrap();
        assert!(flow.active().is_none());

        // Fogged again, but progress keeps it reachable
        let active = flow.enter(&id("1"), false).unwrap();
        assert!(active.progress().is_part_solved(1));
        assert!(active.locked_fields().contains("reason"));
        assert!(!active.quiz_error());
        assert_eq!(active.progress().answers.get("tiger").map(String::as_str), Some("999"));
        assert_eq!(flow.update_field("reason", "改").unwrap_err(), FlowError::FieldLocked("reason".into()));

        flow.update_field("tiger", "140").unwrap();
        let outcome = flow.submit_sub_check(0).unwrap();
        assert!(outcome.quiz_solved);
        assert_eq!(flow.progression().stats().current_xp, 200);
        assert_eq!(flow.submit_sub_check(0).unwrap_err().to_string(), "Cannot submit_quiz while QuizSolved");
    }

    #[test]
    fn test_sub_checks_heights_first() {
        let mut flow = flow();
        flow.enter(&id("1"), true).unwrap();
        solve_mission_one(&mut flow);

        let heights = flow.submit_sub_check(0).unwrap();
        assert_eq!(heights.newly_solved, vec![0]);
        assert!(!heights.quiz_solved);
        assert_eq!(flow.update_field("tiger", "1").unwrap_err(), FlowError::FieldLocked("tiger".into()));

        let reason = flow.submit_sub_check(1).unwrap();
        assert_eq!(reason.newly_solved, vec![1]);
        assert!(reason.quiz_solved);
        assert_eq!(flow.active().unwrap().phase(), MissionPhase::QuizSolved);
        assert_eq!(flow.progression().stats().current_xp, 200);
    }

    #[test]
    fn test_sub_check_index_bounds() {
        let mut flow = flow();
        flow.enter(&id("1"), true).unwrap();
        assert_eq!(flow.submit_sub_check(2).unwrap_err(), FlowError::UnknownSubCheck(2));
    }

    #[test]
    fn test_unknown_field_not_stored() {
        let mut flow = flow();
        flow.enter(&id("2"), true).unwrap();
        for i in 0..100 {
            let key = format!("junk{i}");
            assert_eq!(flow.update_field(&key, "x").unwrap_err(), FlowError::UnknownField(key));
        }
        flow.update_field("answer", "南港").unwrap();
        flow.back().unwrap();

        let stored = flow.store().load(&id("2")).unwrap();
        assert_eq!(stored.answers.keys().collect::<Vec<_>>(), vec!["answer"]);
    }

    #[test]
    fn test_side_mission_is_repeatable() {
        let mut flow = flow();
        for round in 1..=2u32 {
            let active = flow.enter(&id("s1"), true).unwrap();
            assert_eq!(active.phase(), MissionPhase::QuizSolved);
            assert!(active.progress().evidence.is_none());
            assert_eq!(flow.update_field("answer", "x").unwrap_err(), FlowError::NoQuiz);

            flow.attach_evidence(photo()).unwrap();
            flow.submit().unwrap();
            assert!(matches!(flow.acknowledge().unwrap(), Finalization::SideCompleted { .. }));
            assert!(flow.store().load(&id("s1")).is_none());
            assert_eq!(flow.progression().stats().current_xp, 50 * round);
        }
        assert!(flow.progression().completed().is_empty());
    }

    #[test]
    fn test_stale_edit_result_is_discarded() {
        let mut flow = flow();
        flow.enter(&id("s1"), true).unwrap();
        flow.attach_evidence(photo()).unwrap();
        let first = flow.begin_image_edit().unwrap();
        // Empty note falls back to the prompt hint
        flow.set_evidence_note("  ").unwrap();
        flow.back().unwrap();

        let active = flow.enter(&id("s1"), true).unwrap();
        assert_eq!(active.phase(), MissionPhase::EvidencePending);
        assert!(active.pending_edit().is_none());
        let second = flow.begin_image_edit().unwrap();
        assert!(second.prompt.starts_with("Analyze retaining wall"));

        assert_eq!(flow.resolve_image_edit(first.ticket, Ok(photo())), EditResolution::Discarded);
        assert_eq!(flow.active().unwrap().pending_edit(), Some(second.ticket));
    }

    #[test]
    fn test_edit_failure_does_not_block_completion() {
        let mut flow = flow();
        flow.enter(&id("s1"), true).unwrap();
        assert_eq!(
            flow.begin_image_edit().unwrap_err(),
            FlowError::InvalidPhase { phase: MissionPhase::QuizSolved, action: "request_image_edit" }
        );
        flow.attach_evidence(photo()).unwrap();
        let request = flow.begin_image_edit().unwrap();
        let resolution = flow.resolve_image_edit(request.ticket, Err("quota exceeded".into()));
        assert_eq!(resolution, EditResolution::Failed("quota exceeded".into()));
        assert_eq!(flow.active().unwrap().edit_error(), Some("quota exceeded"));

        flow.dismiss_edit_error().unwrap();
        assert!(flow.active().unwrap().edit_error().is_none());
        flow.submit().unwrap();
        assert!(flow.acknowledge().is_ok());
    }

    #[test]
    fn test_submit_requires_solved_quiz() {
        let mut flow = flow();
        flow.enter(&id("2"), true).unwrap();
        assert_eq!(
            flow.submit().unwrap_err(),
            FlowError::InvalidPhase { phase: MissionPhase::QuizPending, action: "submit" }
        );
        assert_eq!(
            flow.acknowledge().unwrap_err(),
            FlowError::InvalidPhase { phase: MissionPhase::QuizPending, action: "acknowledge" }
        );
    }

    #[test]
    fn test_events_emitted() {
        let mut flow = flow();
        flow.enter(&id("2"), true).unwrap();
        flow.update_field("answer", "南港").unwrap();
        flow.submit_quiz().unwrap();
        flow.submit().unwrap();
        flow.acknowledge().unwrap();

        let events = flow.take_events();
        assert!(matches!(events.first(), Some(GameEventData::MissionEntered { resumed: false, .. })));
        assert!(events.iter().any(|e| matches!(e, GameEventData::FieldSolved { xp_awarded: 100, .. })));
        assert!(events.iter().any(|e| matches!(e, GameEventData::FragmentCollected { fragment_id: 1, total: 3, .. })));
        assert!(flow.take_events().is_empty());
    }
}
