//! Mission Progress & Session Store
//!
//! In-flight answers, evidence and solved flags for one mission, and the
//! per-session store that keeps them so an interrupted mission can resume
//! exactly where the player left off.
//!
//! No TTL and no persistence: the store lives as long as the session.

use std::collections::{BTreeMap, BTreeSet};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::game::mission::MissionId;
use crate::game::quiz::AnswerFields;

// =============================================================================
// EVIDENCE
// =============================================================================

/// A captured or edited evidence image (opaque bytes).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvidenceImage {
    /// Reference ID
    pub id: Uuid,
    /// MIME type, e.g. "image/jpeg"
    pub mime_type: String,
    /// Raw image bytes
    pub data: Vec<u8>,
    /// When it was attached or produced
    pub captured_at: DateTime<Utc>,
}

impl EvidenceImage {
    /// Wrap raw bytes under a fresh reference ID.
    pub fn new(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            mime_type: mime_type.into(),
            data,
            captured_at: Utc::now(),
        }
    }

    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

// =============================================================================
// MISSION PROGRESS
// =============================================================================

/// Everything the player has entered for one mission.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MissionProgress {
    /// Last typed value per answer field (reasoning text included)
    pub answers: AnswerFields,
    /// Attached photo
    pub evidence: Option<EvidenceImage>,
    /// Result of the image-edit collaborator
    pub edited_evidence: Option<EvidenceImage>,
    /// Description / image-edit prompt
    pub evidence_note: String,
    /// Indexes of solved quiz parts
    pub solved_parts: BTreeSet<usize>,
    /// Whole quiz solved
    pub quiz_solved: bool,
}

impl MissionProgress {
    /// Fresh progress seeded with the mission's default prompt.
    pub fn seeded(evidence_note: impl Into<String>) -> Self {
        Self { evidence_note: evidence_note.into(), ..Self::default() }
    }

    /// Has the given quiz part been solved?
    #[inline]
    pub fn is_part_solved(&self, part: usize) -> bool {
        self.solved_parts.contains(&part)
    }

    /// Nothing entered at all.
    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
            && self.evidence.is_none()
            && self.edited_evidence.is_none()
            && self.evidence_note.is_empty()
            && self.solved_parts.is_empty()
            && !self.quiz_solved
    }
}

// =============================================================================
// SESSION STORE
// =============================================================================

/// Mission id -> last progress snapshot.
#[derive(Clone, Debug, Default)]
pub struct SessionStore {
    snapshots: BTreeMap<MissionId, MissionProgress>,
}

impl SessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Save a snapshot, overwriting any previous one.
    pub fn save(&mut self, id: &MissionId, snapshot: MissionProgress) {
        self.snapshots.insert(id.clone(), snapshot);
    }

    /// Last snapshot for a mission.
    pub fn load(&self, id: &MissionId) -> Option<&MissionProgress> {
        self.snapshots.get(id)
    }

    /// Remove a snapshot. Returns true if one existed.
    pub fn clear(&mut self, id: &MissionId) -> bool {
        self.snapshots.remove(id).is_some()
    }

    /// Is there a snapshot for this mission?
    pub fn contains(&self, id: &MissionId) -> bool {
        self.snapshots.contains_key(id)
    }

    /// Number of stored snapshots.
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Is the store empty?
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_overwrites() {
        let mut store = SessionStore::new();
        let id = MissionId::from("2");

        let mut first = MissionProgress::default();
        first.answers.insert("answer".into(), "北".into());
        store.save(&id, first);

        let mut second = MissionProgress::default();
        second.answers.insert("answer".into(), "南港".into());
        store.save(&id, second.clone());

        assert_eq!(store.load(&id), Some(&second));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_clear() {
        let mut store = SessionStore::new();
        let id = MissionId::from("s1");
        store.save(&id, MissionProgress::seeded("prompt"));
        assert!(store.clear(&id));
        assert!(!store.clear(&id));
        assert!(store.load(&id).is_none());
    }

    #[test]
    fn test_progress_emptiness() {
        assert!(MissionProgress::default().is_empty());
        assert!(!MissionProgress::seeded("hint").is_empty());

        let mut p = MissionProgress::default();
        p.solved_parts.insert(1);
        assert!(p.is_part_solved(1));
        assert!(!p.is_part_solved(0));
        assert!(!p.is_empty());
    }

    #[test]
    fn test_evidence_ids_are_unique() {
        let a = EvidenceImage::new("image/jpeg", vec![1, 2, 3]);
        let b = EvidenceImage::new("image/jpeg", vec![1, 2, 3]);
        assert_ne!(a.id, b.id);
        assert_eq!(a.size(), 3);
    }
}
