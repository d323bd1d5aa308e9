//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! All messages are JSON, internally tagged by `type`.

use serde::{Serialize, Deserialize};

use crate::core::geo::GeoPoint;
use crate::game::events::GameEvent;
use crate::game::flow::{FlowError, MissionView, QuizOutcome};
use crate::game::mission::MissionId;
use crate::game::sampler::{PositionSample, SampleStatus};
use crate::game::state::{HudView, MarkerView};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// First message of a connection (HOME entry).
    Hello {
        /// Team name; blank uses the default.
        #[serde(default)]
        team_name: Option<String>,
    },

    /// One sample from the device position stream.
    Position(PositionReport),

    /// Map event "mission selected".
    SelectMission {
        /// Tapped mission
        mission_id: MissionId,
    },

    /// Typed answer.
    UpdateField {
        /// Answer field key
        key: String,
        /// Raw typed value
        value: String,
    },

    /// Verify every unsolved quiz part.
    SubmitQuiz,

    /// Verify one quiz part.
    SubmitSubCheck {
        /// Quiz part index
        part: usize,
    },

    /// Attach the evidence photo.
    AttachEvidence {
        /// MIME type, e.g. "image/jpeg".
        mime_type: String,
        /// Base64 image bytes (a `data:` URL prefix is tolerated).
        data_base64: String,
    },

    /// Evidence description, also used as the edit prompt.
    SetEvidenceNote {
        /// Free text
        note: String,
    },

    /// Run the image-edit collaborator on the attached photo.
    RequestImageEdit,

    /// Dismiss the image-edit error message.
    DismissEditError,

    /// Confirm completion.
    Submit,

    /// Acknowledge the completion message.
    Acknowledge,

    /// Return to the map.
    Back,

    /// Fog override.
    SetFog {
        /// Fog rendering on
        enabled: bool,
    },

    /// Tutorial closed.
    DismissTutorial,

    /// Ping for latency measurement.
    Ping {
        /// Client timestamp (ms)
        timestamp: u64,
    },
}

/// Position sample as sent by the client.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PositionReport {
    /// Latitude in degrees.
    #[serde(default)]
    pub lat: f64,
    /// Longitude in degrees.
    #[serde(default)]
    pub lng: f64,
    /// Accuracy radius in meters.
    #[serde(default = "PositionReport::unknown_accuracy")]
    pub accuracy_m: f64,
    /// Source status.
    #[serde(default = "PositionReport::ok")]
    pub status: SampleStatus,
}

impl PositionReport {
    fn unknown_accuracy() -> f64 {
        f64::INFINITY
    }

    fn ok() -> SampleStatus {
        SampleStatus::Ok
    }

    /// Convert to an engine sample.
    pub fn to_sample(&self) -> PositionSample {
        match self.status {
            SampleStatus::Ok => PositionSample::fix(GeoPoint::new(self.lat, self.lng), self.accuracy_m),
            failure => PositionSample::failure(failure),
        }
    }
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Reply to Hello.
    Welcome(WelcomeInfo),

    /// Map markers.
    Markers {
        /// One entry per mission
        markers: Vec<MarkerView>,
    },

    /// Progression HUD.
    Hud(HudView),

    /// Open mission.
    Mission(MissionView),

    /// Mission closed (back or finalized).
    MissionClosed {
        /// Closed mission
        mission_id: MissionId,
    },

    /// Quiz submission result.
    QuizResult(QuizResultInfo),

    /// Edited evidence image.
    EditedImage {
        /// Mission the photo belongs to
        mission_id: MissionId,
        /// MIME type of the edited image
        mime_type: String,
        /// Base64 image bytes
        data_base64: String,
    },

    /// Mission finalized.
    Completed(CompletionInfo),

    /// Domain events since the last batch.
    Events {
        /// Events in (seq, priority) order
        events: Vec<GameEvent>,
    },

    /// Request rejected.
    Error(ServerError),

    /// Pong response.
    Pong {
        /// Echoed client timestamp
        timestamp: u64,
        /// Server time (ms since epoch)
        server_time: u64,
    },

    /// Server shutting down.
    Shutdown {
        /// Human-readable reason
        reason: String,
    },
}

/// Session start info.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WelcomeInfo {
    /// Server version.
    pub server_version: String,
    /// Show the tutorial on this HOME entry.
    pub show_tutorial: bool,
    /// HUD numbers.
    pub hud: HudView,
    /// Map markers.
    pub markers: Vec<MarkerView>,
}

/// Quiz submission result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizResultInfo {
    /// Mission id
    pub mission_id: MissionId,
    /// Every checked part passed
    pub correct: bool,
    /// Parts solved by this submission
    pub newly_solved: Vec<usize>,
    /// Whole quiz solved
    pub quiz_solved: bool,
    /// Field XP granted
    pub xp_awarded: u32,
}

impl QuizResultInfo {
    /// Build from a flow outcome.
    pub fn new(mission_id: MissionId, outcome: QuizOutcome) -> Self {
        Self {
            mission_id,
            correct: outcome.correct,
            newly_solved: outcome.newly_solved,
            quiz_solved: outcome.quiz_solved,
            xp_awarded: outcome.xp_awarded,
        }
    }
}

/// Finalization summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionInfo {
    /// Mission id
    pub mission_id: MissionId,
    /// XP granted (0 on review)
    pub xp_awarded: u32,
    /// Mana deducted
    pub mana_spent: u32,
    /// Fragment collected by this completion
    pub fragment: Option<u32>,
    /// A level threshold was crossed
    pub leveled_up: bool,
    /// Side mission
    pub repeatable: bool,
    /// Review of a finished main mission
    pub already_completed: bool,
}

/// Server error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

impl ServerError {
    /// Create an error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Malformed message.
    InvalidInput,
    /// No such mission.
    UnknownMission,
    /// Another mission is open.
    MissionBusy,
    /// No mission is open.
    NoActiveMission,
    /// Action not allowed in the current phase.
    InvalidAction,
    /// Field of a solved part.
    FieldLocked,
    /// Mission still fogged.
    MissionHidden,
    /// An image edit is outstanding.
    EditInFlight,
    /// No evidence attached.
    NoEvidence,
    /// Completed mission is read-only.
    ReviewOnly,
    /// Internal error.
    InternalError,
}

impl From<&FlowError> for ServerError {
    fn from(err: &FlowError) -> Self {
        let code = match err {
            FlowError::UnknownMission(_) => ErrorCode::UnknownMission,
            FlowError::AnotherMissionActive(_) => ErrorCode::MissionBusy,
            FlowError::NoActiveMission => ErrorCode::NoActiveMission,
            FlowError::InvalidPhase { .. } | FlowError::NoQuiz | FlowError::UnknownSubCheck(_) => {
                ErrorCode::InvalidAction
            }
            FlowError::FieldLocked(_) => ErrorCode::FieldLocked,
            FlowError::UnknownField(_) => ErrorCode::InvalidInput,
            FlowError::NotVisible(_) => ErrorCode::MissionHidden,
            FlowError::EditInFlight => ErrorCode::EditInFlight,
            FlowError::NoEvidence => ErrorCode::NoEvidence,
            FlowError::ReviewOnly => ErrorCode::ReviewOnly,
        };
        Self::new(code, err.to_string())
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_json() {
        let msg = ClientMessage::from_json(r#"{"type":"select_mission","mission_id":"2"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::SelectMission { mission_id } if mission_id.as_str() == "2"));

        let msg = ClientMessage::from_json(r#"{"type":"hello"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Hello { team_name: None }));

        let json = ClientMessage::SubmitSubCheck { part: 1 }.to_json().unwrap();
        assert_eq!(json, r#"{"type":"submit_sub_check","part":1}"#);
    }

    #[test]
    fn test_position_defaults() {
        let msg = ClientMessage::from_json(r#"{"type":"position","lat":25.03,"lng":121.58,"accuracy_m":12.0}"#)
            .unwrap();
        let ClientMessage::Position(report) = msg else {
            panic!("expected position");
        };
        let sample = report.to_sample();
        assert_eq!(sample.status, SampleStatus::Ok);
        assert!(sample.is_acceptable(50.0));

        let msg = ClientMessage::from_json(r#"{"type":"position","status":"denied"}"#).unwrap();
        let ClientMessage::Position(report) = msg else {
            panic!("expected position");
        };
        assert!(report.to_sample().status.is_failure());
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(ClientMessage::from_json(r#"{"type":"teleport"}"#).is_err());
        assert!(ClientMessage::from_json("not json").is_err());
    }

    #[test]
    fn test_flow_error_mapping() {
        let err = ServerError::from(&FlowError::NotVisible("3".into()));
        assert_eq!(err.code, ErrorCode::MissionHidden);
        assert!(err.message.contains('3'));

        let err = ServerError::from(&FlowError::UnknownField("junk".into()));
        assert_eq!(err.code, ErrorCode::InvalidInput);

        let json = ServerMessage::Error(ServerError::from(&FlowError::ReviewOnly)).to_json().unwrap();
        assert!(json.contains(r#""type":"error""#));
        assert!(json.contains(r#""code":"review_only""#));
    }

    #[test]
    fn test_server_message_tag() {
        let msg = ServerMessage::MissionClosed { mission_id: "s1".into() };
        assert_eq!(msg.to_json().unwrap(), r#"{"type":"mission_closed","mission_id":"s1"}"#);
        let back = ServerMessage::from_json(&msg.to_json().unwrap()).unwrap();
        assert!(matches!(back, ServerMessage::MissionClosed { .. }));
    }
}
