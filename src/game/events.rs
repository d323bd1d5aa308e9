//! Game Events
//!
//! Ordered log of domain events emitted by engine transitions, drained by
//! the session layer and forwarded to the client.

use serde::{Serialize, Deserialize};

use crate::game::fog::GpsStatus;
use crate::game::mission::MissionId;

/// Priority for event ordering within one sequence number.
///
/// Lower value = processed first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventPriority {
    /// Finalization effects first
    Completion = 0,
    /// Then quiz outcomes
    Quiz = 1,
    /// Then ledger changes caused by either of the above
    Progression = 2,
    /// Then evidence and image edits
    Evidence = 3,
    /// Then map and GPS updates
    Proximity = 4,
    /// Lowest priority
    Other = 255,
}

/// Game event data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GameEventData {
    /// Player opened a mission
    MissionEntered {
        /// Mission concerned
        mission_id: MissionId,
        /// Stored progress was restored
        resumed: bool,
        /// Opened read-only
        review: bool,
    },

    /// Player returned to the map
    MissionLeft {
        /// Mission concerned
        mission_id: MissionId,
    },

    /// One quiz part passed verification
    FieldSolved {
        /// Mission concerned
        mission_id: MissionId,
        /// Quiz part index
        part: usize,
        /// XP granted
        xp_awarded: u32,
    },

    /// A quiz submission failed verification
    QuizRejected {
        /// Mission concerned
        mission_id: MissionId,
        /// Rejected part (None = whole quiz)
        part: Option<usize>,
    },

    /// All quiz parts solved
    QuizSolved {
        /// Mission concerned
        mission_id: MissionId,
    },

    /// Evidence image attached
    EvidenceAttached {
        /// Mission concerned
        mission_id: MissionId,
        /// Image size in bytes
        bytes: usize,
    },

    /// Image edit dispatched to the collaborator
    ImageEditRequested {
        /// Mission concerned
        mission_id: MissionId,
        /// Edit ticket
        ticket: u64,
    },

    /// Image edit came back with an edited image
    ImageEditSucceeded {
        /// Mission concerned
        mission_id: MissionId,
        /// Edit ticket
        ticket: u64,
    },

    /// Image edit came back with an error
    ImageEditFailed {
        /// Mission concerned
        mission_id: MissionId,
        /// Edit ticket
        ticket: u64,
        /// Human-readable error
        message: String,
    },

    /// A late image edit result was dropped
    ImageEditDiscarded {
        /// Edit ticket
        ticket: u64,
    },

    /// Completion acknowledgment shown
    CompletionPending {
        /// Mission concerned
        mission_id: MissionId,
    },

    /// Mission finalized
    MissionCompleted {
        /// Mission concerned
        mission_id: MissionId,
        /// XP granted
        xp_awarded: u32,
        /// Mana deducted
        mana_spent: u32,
        /// Side mission
        repeatable: bool,
    },

    /// Level threshold crossed
    LevelUp {
        /// Level before the award
        old_level: u32,
        /// Level after the award
        new_level: u32,
        /// Rank title at the new level
        rank: String,
    },

    /// Story fragment collected
    FragmentCollected {
        /// Fragment id
        fragment_id: u32,
        /// Fragments now held
        collected: usize,
        /// Fragments in the catalog
        total: usize,
    },

    /// GPS status changed
    GpsStatusChanged {
        /// Previous status
        old_status: GpsStatus,
        /// Current status
        new_status: GpsStatus,
    },

    /// Marker crossed the reveal radius
    MarkerRevealed {
        /// Mission concerned
        mission_id: MissionId,
        /// Inside the reveal radius (or fog off)
        revealed: bool,
    },

    /// Fog override toggled
    FogToggled {
        /// Fog rendering on
        enabled: bool,
    },
}

impl GameEventData {
    /// Default ordering priority for this kind of event.
    pub fn priority(&self) -> EventPriority {
        match self {
            GameEventData::MissionCompleted { .. } | GameEventData::FragmentCollected { .. } => {
                EventPriority::Completion
            }
            GameEventData::LevelUp { .. } => EventPriority::Progression,
            GameEventData::FieldSolved { .. }
            | GameEventData::QuizRejected { .. }
            | GameEventData::QuizSolved { .. } => EventPriority::Quiz,
            GameEventData::EvidenceAttached { .. }
            | GameEventData::ImageEditRequested { .. }
            | GameEventData::ImageEditSucceeded { .. }
            | GameEventData::ImageEditFailed { .. }
            | GameEventData::ImageEditDiscarded { .. } => EventPriority::Evidence,
            GameEventData::GpsStatusChanged { .. }
            | GameEventData::MarkerRevealed { .. }
            | GameEventData::FogToggled { .. } => EventPriority::Proximity,
            _ => EventPriority::Other,
        }
    }

    /// Mission this event concerns, if any.
    pub fn mission_id(&self) -> Option<&MissionId> {
        match self {
            GameEventData::MissionEntered { mission_id, .. }
            | GameEventData::MissionLeft { mission_id }
            | GameEventData::FieldSolved { mission_id, .. }
            | GameEventData::QuizRejected { mission_id, .. }
            | GameEventData::QuizSolved { mission_id }
            | GameEventData::EvidenceAttached { mission_id, .. }
            | GameEventData::ImageEditRequested { mission_id, .. }
            | GameEventData::ImageEditSucceeded { mission_id, .. }
            | GameEventData::ImageEditFailed { mission_id, .. }
            | GameEventData::CompletionPending { mission_id }
            | GameEventData::MissionCompleted { mission_id, .. }
            | GameEventData::MarkerRevealed { mission_id, .. } => Some(mission_id),
            _ => None,
        }
    }
}

/// A game event with sequence number and priority.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GameEvent {
    /// Sequence number of the input that produced the event
    pub seq: u64,

    /// Processing priority
    pub priority: EventPriority,

    /// Event data
    pub data: GameEventData,
}

impl GameEvent {
    /// Create a new event.
    pub fn new(seq: u64, data: GameEventData) -> Self {
        Self {
            seq,
            priority: data.priority(),
            data,
        }
    }
}

impl PartialEq for GameEvent {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq && self.priority == other.priority
    }
}

impl Eq for GameEvent {}

impl PartialOrd for GameEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GameEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Sort by: seq, then priority
        self.seq
            .cmp(&other.seq)
            .then(self.priority.cmp(&other.priority))
    }
}

// =============================================================================
// EVENT LOG
// =============================================================================

/// Append-only buffer of events awaiting delivery.
#[derive(Clone, Debug, Default)]
pub struct EventLog {
    seq: u64,
    pending: Vec<GameEvent>,
    total: u64,
}

impl EventLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new input; following events share its sequence number.
    pub fn advance(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    /// Record events under the current sequence number.
    pub fn extend(&mut self, events: impl IntoIterator<Item = GameEventData>) {
        for data in events {
            self.pending.push(GameEvent::new(self.seq, data));
            self.total += 1;
        }
    }

    /// Record a single event.
    pub fn push(&mut self, data: GameEventData) {
        self.extend(std::iter::once(data));
    }

    /// Take all pending events in (seq, priority) order.
    pub fn drain(&mut self) -> Vec<GameEvent> {
        let mut events = std::mem::take(&mut self.pending);
        events.sort();
        events
    }

    /// Pending event count.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Nothing pending?
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Events recorded since creation.
    pub fn total(&self) -> u64 {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_ordering() {
        let mut log = EventLog::new();
        log.advance();
        log.push(GameEventData::FogToggled { enabled: false });
        log.push(GameEventData::MissionCompleted {
            mission_id: "1".into(),
            xp_awarded: 300,
            mana_spent: 15,
            repeatable: false,
        });
        log.advance();
        log.push(GameEventData::FragmentCollected { fragment_id: 0, collected: 1, total: 3 });

        let events = log.drain();
        assert_eq!(events.len(), 3);
        // Same seq, completion before proximity
        assert!(matches!(events[0].data, GameEventData::MissionCompleted { .. }));
        assert!(matches!(events[1].data, GameEventData::FogToggled { .. }));
        assert_eq!(events[2].seq, 2);
        assert!(log.is_empty());
        assert_eq!(log.total(), 3);
    }

    #[test]
    fn test_level_up_follows_its_cause() {
        let mut log = EventLog::new();
        log.advance();
        log.push(GameEventData::FieldSolved { mission_id: "1".into(), part: 0, xp_awarded: 100 });
        log.push(GameEventData::LevelUp { old_level: 1, new_level: 2, rank: "地形線索搜查員".into() });
        log.push(GameEventData::QuizSolved { mission_id: "1".into() });
        log.advance();
        log.push(GameEventData::MissionCompleted {
            mission_id: "2".into(),
            xp_awarded: 300,
            mana_spent: 15,
            repeatable: false,
        });
        log.push(GameEventData::LevelUp { old_level: 2, new_level: 3, rank: "地質現象調查員".into() });
        log.push(GameEventData::FragmentCollected { fragment_id: 1, collected: 2, total: 3 });

        let kinds: Vec<_> = log
            .drain()
            .iter()
            .map(|e| serde_json::to_value(&e.data).unwrap()["event"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            kinds,
            vec![
                "field_solved",
                "quiz_solved",
                "level_up",
                "mission_completed",
                "fragment_collected",
                "level_up",
            ]
        );
    }

    #[test]
    fn test_event_json_tag() {
        let data = GameEventData::QuizSolved { mission_id: "2".into() };
        let json = serde_json::to_string(&data).unwrap();
        assert_eq!(json, r#"{"event":"quiz_solved","mission_id":"2"}"#);
        assert_eq!(data.mission_id(), Some(&MissionId::from("2")));
    }
}
