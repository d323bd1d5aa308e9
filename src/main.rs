//! FieldQuest Server
//!
//! Serves the field-mission engine over WebSocket.

use std::sync::Arc;
use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fieldquest::{
    VERSION,
    core::config::GameConfig,
    game::mission::MissionCatalog,
    network::{GameServer, GeminiImageEditor, ImageEditConfig, ServerConfig},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let game_config = GameConfig::from_env();
    let server_config = ServerConfig::from_env();
    let edit_config = ImageEditConfig::from_env();

    info!("FieldQuest Server v{}", VERSION);
    info!(
        reveal_radius_m = game_config.reveal_radius_m,
        max_accuracy_m = game_config.max_accuracy_m,
        xp_per_level = game_config.xp_per_level,
        "game config"
    );

    let catalog = Arc::new(MissionCatalog::reference());
    info!(missions = catalog.len(), fragments = catalog.fragment_total(), "mission catalog loaded");

    let editor = GeminiImageEditor::new(edit_config).context("failed to build image-edit client")?;
    if !editor.is_configured() {
        warn!("no image-edit API key set, photo editing disabled");
    }

    let server = Arc::new(GameServer::new(server_config, game_config, catalog, Arc::new(editor)));

    let running = Arc::clone(&server);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received");
            running.shutdown();
        }
    });

    server.run().await.context("server terminated")?;
    info!("FieldQuest Server stopped");
    Ok(())
}
