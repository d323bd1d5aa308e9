//! End-to-end play-through of the reference missions through `PlayerSession`.
//! Uses a stub image editor; no network access.

use std::sync::Arc;

use async_trait::async_trait;
use fieldquest::core::flags::FlagStore;
use fieldquest::game::fog::GpsStatus;
use fieldquest::game::progress::EvidenceImage;
use fieldquest::game::sampler::SampleStatus;
use fieldquest::game::state::HudView;
use fieldquest::network::image_edit::{ImageEditError, ImageEditor};
use fieldquest::network::protocol::{ClientMessage, CompletionInfo, PositionReport, ServerMessage};
use fieldquest::network::session::run_image_edit;
use fieldquest::{GameConfig, MissionCatalog, PlayerSession};
use tokio::sync::RwLock;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct WatermarkEditor;

#[async_trait]
impl ImageEditor for WatermarkEditor {
    async fn edit(&self, image: &EvidenceImage, prompt: &str) -> Result<EvidenceImage, ImageEditError> {
        let mut data = image.data.clone();
        data.extend_from_slice(prompt.as_bytes());
        Ok(EvidenceImage::new("image/png", data))
    }
}

const M1: (f64, f64) = (25.032647652556317, 121.58009862209747);
const M2: (f64, f64) = (25.028155021059753, 121.57924699325368);
const M3: (f64, f64) = (25.029229726415355, 121.57698592023897);

fn new_session(flags: FlagStore) -> PlayerSession {
    PlayerSession::new(
        Arc::new(MissionCatalog::reference()),
        &GameConfig::default(),
        Arc::new(RwLock::new(flags)),
        Arc::new(WatermarkEditor),
    )
}

/// Send a message and fail the test on any error reply.
async fn send(session: &mut PlayerSession, msg: ClientMessage) -> Vec<ServerMessage> {
    let label = format!("{msg:?}");
    let reply = session.handle(msg).await;
    for m in &reply.messages {
        if let ServerMessage::Error(e) = m {
            panic!("{label} rejected: {:?} {}", e.code, e.message);
        }
    }
    reply.messages
}

async fn walk_to(session: &mut PlayerSession, (lat, lng): (f64, f64)) {
    send(
        session,
        ClientMessage::Position(PositionReport { lat, lng, accuracy_m: 8.0, status: SampleStatus::Ok }),
    )
    .await;
    session.tick();
}

fn last_hud(messages: &[ServerMessage]) -> Option<HudView> {
    messages.iter().rev().find_map(|m| match m {
        ServerMessage::Hud(h) => Some(h.clone()),
        _ => None,
    })
}

fn completion(messages: &[ServerMessage]) -> Option<CompletionInfo> {
    messages.iter().find_map(|m| match m {
        ServerMessage::Completed(c) => Some(c.clone()),
        _ => None,
    })
}

fn select(id: &str) -> ClientMessage {
    ClientMessage::SelectMission { mission_id: id.into() }
}

fn field(key: &str, value: &str) -> ClientMessage {
    ClientMessage::UpdateField { key: key.into(), value: value.into() }
}

fn photo() -> ClientMessage {
    ClientMessage::AttachEvidence {
        mime_type: "image/jpeg".into(),
        data_base64: "data:image/jpeg;base64,/9j/4AAQ".into(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn full_play_through() {
    let mut session = new_session(FlagStore::in_memory());

    let welcome = send(&mut session, ClientMessage::Hello { team_name: Some("Rock Squad".into()) }).await;
    assert!(matches!(welcome.first(), Some(ServerMessage::Welcome(w)) if w.show_tutorial));
    send(&mut session, ClientMessage::DismissTutorial).await;

    // Mission 1: two sub-checks, solved reasoning first
    walk_to(&mut session, M1).await;
    assert_eq!(session.state().gps_status(), GpsStatus::Locked);
    send(&mut session, select("1")).await;
    for (k, v) in [("tiger", "140"), ("leopard", "141"), ("lion", "150"), ("elephant", "約183公尺")] {
        send(&mut session, field(k, v)).await;
    }
    send(&mut session, field("reason", "四周都是高山，永春陂在中間的低窪處")).await;
    send(&mut session, ClientMessage::SubmitSubCheck { part: 1 }).await;
    let solved = send(&mut session, ClientMessage::SubmitSubCheck { part: 0 }).await;
    assert_eq!(last_hud(&solved).map(|h| h.current_xp), Some(200));
    send(&mut session, ClientMessage::Submit).await;
    let done = send(&mut session, ClientMessage::Acknowledge).await;
    let info = completion(&done).unwrap();
    assert_eq!((info.xp_awarded, info.fragment, info.leveled_up), (300, Some(0), true));
    let hud = last_hud(&done).unwrap();
    assert_eq!((hud.level, hud.rank.as_str()), (2, "地形線索搜查員"));

    // Mission 2: free text, then evidence with an edit
    walk_to(&mut session, M2).await;
    send(&mut session, select("2")).await;
    send(&mut session, field("answer", "南港層")).await;
    send(&mut session, ClientMessage::SubmitQuiz).await;
    send(&mut session, photo()).await;
    send(&mut session, ClientMessage::SetEvidenceNote { note: "羽毛狀".into() }).await;
    let reply = session.handle(ClientMessage::RequestImageEdit).await;
    let request = reply.edit.expect("edit request");
    let edited = session.complete_edit(run_image_edit(session.editor(), request).await);
    assert!(edited.iter().any(|m| matches!(m, ServerMessage::EditedImage { mime_type, .. } if mime_type == "image/png")));
    send(&mut session, ClientMessage::Submit).await;
    let done = send(&mut session, ClientMessage::Acknowledge).await;
    assert_eq!(completion(&done).and_then(|c| c.fragment), Some(1));

    // Mission 3: categorical pair, evidence skipped
    walk_to(&mut session, M3).await;
    send(&mut session, select("3")).await;
    send(&mut session, field("density", "密集")).await;
    send(&mut session, field("feeling", "累")).await;
    send(&mut session, ClientMessage::SubmitQuiz).await;
    send(&mut session, ClientMessage::Submit).await;
    let done = send(&mut session, ClientMessage::Acknowledge).await;
    let hud = last_hud(&done).unwrap();
    assert_eq!(hud.current_xp, 1300);
    assert_eq!(hud.rank, "地質現象調查員");
    assert_eq!((hud.fragments_collected, hud.fragment_total), (3, 3));
    assert_eq!(hud.mana, 30);

    // Side mission twice; mana bottoms out at zero
    for _ in 0..2 {
        send(&mut session, select("s1")).await;
        send(&mut session, photo()).await;
        send(&mut session, ClientMessage::Submit).await;
        let done = send(&mut session, ClientMessage::Acknowledge).await;
        assert!(completion(&done).is_some_and(|c| c.repeatable && c.xp_awarded == 50));
    }
    assert!(session.state().flow().store().load(&"s1".into()).is_none());

    // Reviewing a finished mission awards nothing
    let review = send(&mut session, select("1")).await;
    assert!(matches!(review.first(), Some(ServerMessage::Mission(v)) if v.review && v.quiz_solved));
    let done = send(&mut session, ClientMessage::Acknowledge).await;
    assert!(completion(&done).is_some_and(|c| c.already_completed && c.xp_awarded == 0));

    let hud = session.state().hud();
    assert_eq!(hud.current_xp, 1400);
    assert_eq!(hud.xp_into_level, 400);
    assert_eq!(hud.xp_to_next_level, 100);
    assert_eq!(hud.mana, 0);
    assert_eq!(hud.team_name, "Rock Squad");
}

#[tokio::test]
async fn gps_loss_keeps_started_missions_playable() {
    let mut session = new_session(FlagStore::in_memory());
    walk_to(&mut session, M2).await;
    send(&mut session, select("2")).await;
    send(&mut session, field("answer", "不知道")).await;
    send(&mut session, ClientMessage::Back).await;

    send(
        &mut session,
        ClientMessage::Position(PositionReport {
            lat: 0.0,
            lng: 0.0,
            accuracy_m: f64::INFINITY,
            status: SampleStatus::Denied,
        }),
    )
    .await;
    session.tick();
    assert_eq!(session.state().gps_status(), GpsStatus::Error);

    // Stored progress keeps mission 2 enterable without a fix
    let view = send(&mut session, select("2")).await;
    let Some(ServerMessage::Mission(view)) = view.first() else {
        panic!("expected mission view");
    };
    assert_eq!(view.answers.get("answer").map(String::as_str), Some("不知道"));
}

#[tokio::test]
async fn tutorial_flag_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flags.json");

    let mut first = new_session(FlagStore::open(&path));
    send(&mut first, ClientMessage::DismissTutorial).await;

    let mut second = new_session(FlagStore::open(&path));
    let welcome = send(&mut second, ClientMessage::Hello { team_name: None }).await;
    assert!(matches!(welcome.first(), Some(ServerMessage::Welcome(w)) if !w.show_tutorial));
}
