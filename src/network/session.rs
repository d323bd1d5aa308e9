//! Player Session
//!
//! One game per connected client. Routes decoded client messages into the
//! [`GameState`] and turns the results into server messages.
//!
//! The session itself never awaits the image-edit collaborator: a request
//! is handed back to the caller in [`SessionReply::edit`], run with
//! [`run_image_edit`], and fed back through [`PlayerSession::complete_edit`].

use std::sync::Arc;
use base64::Engine;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::config::GameConfig;
use crate::core::flags::{FlagStore, FlagStoreError};
use crate::game::flow::{EditResolution, EditTicket, FlowError, ImageEditRequest, QuizOutcome};
use crate::game::mission::{MissionCatalog, MissionId};
use crate::game::progress::EvidenceImage;
use crate::game::progression::Finalization;
use crate::game::state::GameState;
use crate::network::image_edit::ImageEditor;
use crate::network::protocol::{
    ClientMessage, CompletionInfo, ErrorCode, QuizResultInfo, ServerError, ServerMessage,
    WelcomeInfo,
};

/// Session errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Rejected mission transition.
    #[error(transparent)]
    Flow(#[from] FlowError),

    /// Tutorial flag could not be written.
    #[error("Tutorial flag error: {0}")]
    Flags(#[from] FlagStoreError),

    /// Evidence payload was not valid base64.
    #[error("Invalid evidence payload: {0}")]
    InvalidEvidence(String),
}

impl From<&SessionError> for ServerError {
    fn from(err: &SessionError) -> Self {
        match err {
            SessionError::Flow(flow) => ServerError::from(flow),
            SessionError::Flags(_) => ServerError::new(ErrorCode::InternalError, err.to_string()),
            SessionError::InvalidEvidence(_) => ServerError::new(ErrorCode::InvalidInput, err.to_string()),
        }
    }
}

/// What the caller should do after a message.
#[derive(Debug, Default)]
pub struct SessionReply {
    /// Messages for the client, in order.
    pub messages: Vec<ServerMessage>,
    /// Image edit to run off the session.
    pub edit: Option<ImageEditRequest>,
}

impl SessionReply {
    fn with(messages: Vec<ServerMessage>) -> Self {
        Self { messages, edit: None }
    }
}

/// Finished image-edit call.
#[derive(Debug)]
pub struct EditCompletion {
    /// Ticket from the request
    pub ticket: EditTicket,
    /// Edited image or human-readable error
    pub result: Result<EvidenceImage, String>,
}

/// Run one image-edit request against a collaborator.
pub async fn run_image_edit(editor: Arc<dyn ImageEditor>, request: ImageEditRequest) -> EditCompletion {
    let result = editor
        .edit(&request.image, &request.prompt)
        .await
        .map_err(|e| e.to_string());
    EditCompletion { ticket: request.ticket, result }
}

/// Decode base64 image bytes, tolerating a `data:<mime>;base64,` prefix.
pub fn decode_evidence(data: &str) -> Result<Vec<u8>, SessionError> {
    let payload = match data.split_once(',') {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => data,
    };
    base64::engine::general_purpose::STANDARD
        .decode(payload.trim().as_bytes())
        .map_err(|e| SessionError::InvalidEvidence(e.to_string()))
}

/// One connected player.
pub struct PlayerSession {
    id: Uuid,
    state: GameState,
    flags: Arc<RwLock<FlagStore>>,
    editor: Arc<dyn ImageEditor>,
    version: String,
}

impl PlayerSession {
    /// Create a session.
    pub fn new(
        catalog: Arc<MissionCatalog>,
        config: &GameConfig,
        flags: Arc<RwLock<FlagStore>>,
        editor: Arc<dyn ImageEditor>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: GameState::new(catalog, config),
            flags,
            editor,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Session ID.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Game state.
    pub fn state(&self) -> &GameState {
        &self.state
    }

    /// Image-edit collaborator.
    pub fn editor(&self) -> Arc<dyn ImageEditor> {
        Arc::clone(&self.editor)
    }

    /// Handle one client message. Rejections become `Error` messages.
    pub async fn handle(&mut self, msg: ClientMessage) -> SessionReply {
        let mut reply = match self.dispatch(msg).await {
            Ok(reply) => reply,
            Err(err) => {
                debug!(session = %self.id, error = %err, "request rejected");
                SessionReply::with(vec![ServerMessage::Error(ServerError::from(&err))])
            }
        };
        self.flush_events(&mut reply.messages);
        reply
    }

    /// Drain queued positions. Returns map/HUD updates when anything changed.
    pub fn tick(&mut self) -> Vec<ServerMessage> {
        let result = self.state.tick();
        let mut messages = Vec::new();
        if result.map_changed {
            messages.push(self.markers_message());
            messages.push(ServerMessage::Hud(self.state.hud()));
        }
        self.flush_events(&mut messages);
        messages
    }

    /// Feed back a finished image edit.
    pub fn complete_edit(&mut self, completion: EditCompletion) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        match self.state.resolve_image_edit(completion.ticket, completion.result) {
            EditResolution::Applied => {
                if let Some(view) = self.state.active_view() {
                    if let Some(image) = self
                        .state
                        .flow()
                        .active()
                        .and_then(|a| a.progress().edited_evidence.as_ref())
                    {
                        messages.push(ServerMessage::EditedImage {
                            mission_id: view.mission_id.clone(),
                            mime_type: image.mime_type.clone(),
                            data_base64: base64::engine::general_purpose::STANDARD.encode(&image.data),
                        });
                    }
                    messages.push(ServerMessage::Mission(view));
                }
            }
            EditResolution::Failed(_) => {
                if let Some(view) = self.state.active_view() {
                    messages.push(ServerMessage::Mission(view));
                }
            }
            EditResolution::Discarded => {}
        }
        self.flush_events(&mut messages);
        messages
    }

    fn flush_events(&mut self, messages: &mut Vec<ServerMessage>) {
        let events = self.state.drain_events();
        if !events.is_empty() {
            messages.push(ServerMessage::Events { events });
        }
    }

    fn markers_message(&self) -> ServerMessage {
        ServerMessage::Markers { markers: self.state.markers() }
    }

    fn mission_message(&self) -> Vec<ServerMessage> {
        self.state.active_view().map(ServerMessage::Mission).into_iter().collect()
    }

    fn active_id(&self) -> Option<MissionId> {
        self.state.flow().active().map(|a| a.mission().id.clone())
    }

    fn quiz_messages(&self, outcome: QuizOutcome) -> Result<Vec<ServerMessage>, SessionError> {
        let mission_id = self.active_id().ok_or(FlowError::NoActiveMission)?;
        let mut messages = vec![ServerMessage::QuizResult(QuizResultInfo::new(mission_id, outcome))];
        messages.extend(self.mission_message());
        messages.push(ServerMessage::Hud(self.state.hud()));
        Ok(messages)
    }

    async fn dispatch(&mut self, msg: ClientMessage) -> Result<SessionReply, SessionError> {
        let messages = match msg {
            ClientMessage::Hello { team_name } => {
                let team = self.state.set_team_name(team_name.as_deref().unwrap_or("")).to_string();
                let show_tutorial = !self.flags.read().await.tutorial_seen();
                info!(session = %self.id, team = %team, show_tutorial, "player joined");
                vec![ServerMessage::Welcome(WelcomeInfo {
                    server_version: self.version.clone(),
                    show_tutorial,
                    hud: self.state.hud(),
                    markers: self.state.markers(),
                })]
            }
            ClientMessage::Position(report) => {
                self.state.push_position(report.to_sample());
                Vec::new()
            }
            ClientMessage::SelectMission { mission_id } => {
                let view = self.state.select_mission(&mission_id)?;
                vec![ServerMessage::Mission(view)]
            }
            ClientMessage::UpdateField { key, value } => {
                self.state.update_field(&key, &value)?;
                self.mission_message()
            }
            ClientMessage::SubmitQuiz => {
                let outcome = self.state.submit_quiz()?;
                self.quiz_messages(outcome)?
            }
            ClientMessage::SubmitSubCheck { part } => {
                let outcome = self.state.submit_sub_check(part)?;
                self.quiz_messages(outcome)?
            }
            ClientMessage::AttachEvidence { mime_type, data_base64 } => {
                let data = decode_evidence(&data_base64)?;
                self.state.attach_evidence(EvidenceImage::new(mime_type, data))?;
                self.mission_message()
            }
            ClientMessage::SetEvidenceNote { note } => {
                self.state.set_evidence_note(&note)?;
                self.mission_message()
            }
            ClientMessage::RequestImageEdit => {
                let request = self.state.begin_image_edit()?;
                return Ok(SessionReply { messages: self.mission_message(), edit: Some(request) });
            }
            ClientMessage::DismissEditError => {
                self.state.dismiss_edit_error()?;
                self.mission_message()
            }
            ClientMessage::Submit => {
                self.state.submit()?;
                self.mission_message()
            }
            ClientMessage::Acknowledge => {
                let mission_id = self.active_id().ok_or(FlowError::NoActiveMission)?;
                let finalization = self.state.acknowledge()?;
                let info = match finalization {
                    Finalization::MainCompleted { xp, mana_spent, fragment } => CompletionInfo {
                        mission_id: mission_id.clone(),
                        xp_awarded: xp.amount,
                        mana_spent,
                        fragment,
                        leveled_up: xp.leveled_up(),
                        repeatable: false,
                        already_completed: false,
                    },
                    Finalization::SideCompleted { xp, mana_spent } => CompletionInfo {
                        mission_id: mission_id.clone(),
                        xp_awarded: xp.amount,
                        mana_spent,
                        fragment: None,
                        leveled_up: xp.leveled_up(),
                        repeatable: true,
                        already_completed: false,
                    },
                    Finalization::AlreadyCompleted => CompletionInfo {
                        mission_id: mission_id.clone(),
                        xp_awarded: 0,
                        mana_spent: 0,
                        fragment: None,
                        leveled_up: false,
                        repeatable: false,
                        already_completed: true,
                    },
                };
                vec![
                    ServerMessage::Completed(info),
                    ServerMessage::MissionClosed { mission_id },
                    ServerMessage::Hud(self.state.hud()),
                    self.markers_message(),
                ]
            }
            ClientMessage::Back => {
                let mission_id = self.state.back()?;
                vec![ServerMessage::MissionClosed { mission_id }, self.markers_message()]
            }
            ClientMessage::SetFog { enabled } => {
                self.state.set_fog_enabled(enabled);
                vec![self.markers_message(), ServerMessage::Hud(self.state.hud())]
            }
            ClientMessage::DismissTutorial => {
                if let Err(err) = self.flags.write().await.mark_tutorial_seen() {
                    warn!(session = %self.id, error = %err, "failed to persist tutorial flag");
                    return Err(err.into());
                }
                Vec::new()
            }
            ClientMessage::Ping { timestamp } => {
                vec![ServerMessage::Pong {
                    timestamp,
                    server_time: chrono::Utc::now().timestamp_millis().max(0) as u64,
                }]
            }
        };
        Ok(SessionReply::with(messages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::game::fog::GpsStatus;
    use crate::network::image_edit::ImageEditError;
    use crate::network::protocol::PositionReport;
    use crate::game::sampler::SampleStatus;

    struct EchoEditor;

    #[async_trait]
    impl ImageEditor for EchoEditor {
        async fn edit(&self, image: &EvidenceImage, _prompt: &str) -> Result<EvidenceImage, ImageEditError> {
            Ok(EvidenceImage::new("image/png", image.data.iter().rev().copied().collect()))
        }
    }

    struct FailingEditor;

    #[async_trait]
    impl ImageEditor for FailingEditor {
        async fn edit(&self, _image: &EvidenceImage, _prompt: &str) -> Result<EvidenceImage, ImageEditError> {
            Err(ImageEditError::NoImageInResponse)
        }
    }

    fn session(editor: Arc<dyn ImageEditor>) -> PlayerSession {
        PlayerSession::new(
            Arc::new(MissionCatalog::reference()),
            &GameConfig::default(),
            Arc::new(RwLock::new(FlagStore::in_memory())),
            editor,
        )
    }

    fn errors(reply: &SessionReply) -> Vec<ErrorCode> {
        reply
            .messages
            .iter()
            .filter_map(|m| match m {
                ServerMessage::Error(e) => Some(e.code),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_decode_evidence_prefix() {
        assert_eq!(decode_evidence("AQID").unwrap(), vec![1, 2, 3]);
        assert_eq!(decode_evidence("data:image/jpeg;base64,AQID").unwrap(), vec![1, 2, 3]);
        assert!(matches!(decode_evidence("***"), Err(SessionError::InvalidEvidence(_))));
    }

    #[tokio::test]
    async fn test_hello_and_tutorial_flag() {
        let mut session = session(Arc::new(EchoEditor));
        let reply = session.handle(ClientMessage::Hello { team_name: Some("  ".into()) }).await;
        let Some(ServerMessage::Welcome(info)) = reply.messages.first() else {
            panic!("expected welcome");
        };
        assert!(info.show_tutorial);
        assert_eq!(info.hud.team_name, "UNIT-734");
        assert_eq!(info.markers.len(), 4);

        session.handle(ClientMessage::DismissTutorial).await;
        let reply = session.handle(ClientMessage::Hello { team_name: None }).await;
        assert!(matches!(reply.messages.first(), Some(ServerMessage::Welcome(w)) if !w.show_tutorial));
    }

    #[tokio::test]
    async fn test_positions_applied_on_tick() {
        let mut session = session(Arc::new(EchoEditor));
        let reply = session
            .handle(ClientMessage::Position(PositionReport {
                lat: 25.032647652556317,
                lng: 121.58009862209747,
                accuracy_m: 5.0,
                status: SampleStatus::Ok,
            }))
            .await;
        assert!(reply.messages.is_empty());
        assert_eq!(session.state().gps_status(), GpsStatus::Searching);

        let messages = session.tick();
        assert!(matches!(messages.first(), Some(ServerMessage::Markers { .. })));
        assert_eq!(session.state().gps_status(), GpsStatus::Locked);
        assert!(session.tick().is_empty());
    }

    #[tokio::test]
    async fn test_rejections_become_error_messages() {
        let mut session = session(Arc::new(EchoEditor));
        let reply = session.handle(ClientMessage::SelectMission { mission_id: "1".into() }).await;
        assert_eq!(errors(&reply), vec![ErrorCode::MissionHidden]);

        let reply = session.handle(ClientMessage::Submit).await;
        assert_eq!(errors(&reply), vec![ErrorCode::NoActiveMission]);
    }

    #[tokio::test]
    async fn test_image_edit_round_trip() {
        let mut session = session(Arc::new(EchoEditor));
        session.handle(ClientMessage::SelectMission { mission_id: "s1".into() }).await;
        session
            .handle(ClientMessage::AttachEvidence { mime_type: "image/jpeg".into(), data_base64: "AQID".into() })
            .await;

        let reply = session.handle(ClientMessage::RequestImageEdit).await;
        let request = reply.edit.expect("edit request");
        let completion = run_image_edit(session.editor(), request).await;
        let messages = session.complete_edit(completion);

        let edited = messages.iter().find_map(|m| match m {
            ServerMessage::EditedImage { data_base64, .. } => Some(data_base64.clone()),
            _ => None,
        });
        assert_eq!(edited.as_deref(), Some("AwIB"));
    }

    #[tokio::test]
    async fn test_failed_edit_is_dismissible() {
        let mut session = session(Arc::new(FailingEditor));
        session.handle(ClientMessage::SelectMission { mission_id: "s1".into() }).await;
        session
            .handle(ClientMessage::AttachEvidence { mime_type: "image/jpeg".into(), data_base64: "AQID".into() })
            .await;
        let request = session.handle(ClientMessage::RequestImageEdit).await.edit.expect("edit request");
        let messages = session.complete_edit(run_image_edit(session.editor(), request).await);

        let view = messages.iter().find_map(|m| match m {
            ServerMessage::Mission(v) => Some(v.clone()),
            _ => None,
        });
        assert!(view.and_then(|v| v.edit_error).is_some_and(|e| e.starts_with("No image generated")));

        session.handle(ClientMessage::DismissEditError).await;
        let reply = session.handle(ClientMessage::Submit).await;
        assert!(errors(&reply).is_empty());
        let reply = session.handle(ClientMessage::Acknowledge).await;
        assert!(reply.messages.iter().any(|m| matches!(
            m,
            ServerMessage::Completed(info) if info.repeatable && info.xp_awarded == 50
        )));
    }

    #[tokio::test]
    async fn test_late_edit_after_back_is_dropped() {
        let mut session = session(Arc::new(EchoEditor));
        session.handle(ClientMessage::SelectMission { mission_id: "s1".into() }).await;
        session
            .handle(ClientMessage::AttachEvidence { mime_type: "image/jpeg".into(), data_base64: "AQID".into() })
            .await;
        let request = session.handle(ClientMessage::RequestImageEdit).await.edit.expect("edit request");
        session.handle(ClientMessage::Back).await;

        let completion = run_image_edit(session.editor(), request).await;
        let messages = session.complete_edit(completion);
        assert!(!messages.iter().any(|m| matches!(m, ServerMessage::EditedImage { .. })));
        assert!(session.state().flow().active().is_none());
    }
}
