//! WebSocket Game Server
//!
//! One task per connection, each owning its own [`PlayerSession`].
//! Messages of a connection are processed strictly one after another.
//! The image-edit call runs on a spawned task and its result re-enters the
//! connection loop as just another event; nothing is ever cancelled.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::interval;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::core::config::{env_or, GameConfig};
use crate::core::flags::FlagStore;
use crate::game::mission::MissionCatalog;
use crate::network::image_edit::ImageEditor;
use crate::network::protocol::{ClientMessage, ErrorCode, ServerError, ServerMessage};
use crate::network::session::{run_image_edit, EditCompletion, PlayerSession, SessionError};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// How often queued positions are applied.
    pub tick_interval: Duration,
    /// Tutorial flag file.
    pub flag_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            tick_interval: Duration::from_millis(250),
            flag_path: PathBuf::from("fieldquest-flags.json"),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: env_or("FIELDQUEST_BIND", defaults.bind_addr),
            max_connections: env_or("FIELDQUEST_MAX_CONNECTIONS", defaults.max_connections),
            tick_interval: Duration::from_millis(
                env_or("FIELDQUEST_TICK_MS", 250u64).max(10),
            ),
            flag_path: env_or("FIELDQUEST_FLAG_PATH", defaults.flag_path),
        }
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Connection limit reached.
    #[error("Connection limit reached")]
    ConnectionLimitReached,

    /// Session error.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

/// Connected client state.
struct ConnectedClient {
    /// Session of this connection.
    session_id: Uuid,
    /// Connection time.
    connected_at: Instant,
}

/// Shared pieces every connection needs.
#[derive(Clone)]
struct ConnectionContext {
    catalog: Arc<MissionCatalog>,
    game_config: GameConfig,
    flags: Arc<RwLock<FlagStore>>,
    editor: Arc<dyn ImageEditor>,
    tick_interval: Duration,
    clients: Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>,
}

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Per-connection context.
    context: ConnectionContext,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server. Opens the tutorial flag file.
    pub fn new(
        config: ServerConfig,
        game_config: GameConfig,
        catalog: Arc<MissionCatalog>,
        editor: Arc<dyn ImageEditor>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let flags = FlagStore::open(config.flag_path.clone());

        Self {
            context: ConnectionContext {
                catalog,
                game_config,
                flags: Arc::new(RwLock::new(flags)),
                editor,
                tick_interval: config.tick_interval,
                clients: Arc::new(RwLock::new(BTreeMap::new())),
            },
            config,
            shutdown_tx,
        }
    }

    /// Bind and run the server.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("Game server listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let clients_count = self.context.clients.read().await.len();
                            if clients_count >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let context = self.context.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            if let Err(e) = Self::run_connection(stream, addr, context.clone(), shutdown_rx).await {
                error!("Connection {} failed: {}", addr, e);
            }

            // Remove client
            if let Some(client) = context.clients.write().await.remove(&addr) {
                info!(
                    session = %client.session_id,
                    connected_secs = client.connected_at.elapsed().as_secs(),
                    "Client {} cleaned up",
                    addr
                );
            }
        });
    }

    async fn run_connection(
        stream: TcpStream,
        addr: SocketAddr,
        context: ConnectionContext,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<(), GameServerError> {
        let ws_stream = accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(64);
        let (edit_tx, mut edit_rx) = mpsc::channel::<EditCompletion>(4);

        let mut session = PlayerSession::new(
            Arc::clone(&context.catalog),
            &context.game_config,
            Arc::clone(&context.flags),
            Arc::clone(&context.editor),
        );

        // Register client
        context.clients.write().await.insert(addr, ConnectedClient {
            session_id: session.id(),
            connected_at: Instant::now(),
        });

        // Spawn message sender task
        let sender_task = tokio::spawn(async move {
            while let Some(msg) = msg_rx.recv().await {
                let text = match msg.to_json() {
                    Ok(t) => t,
                    Err(e) => {
                        error!("Failed to serialize message: {}", e);
                        continue;
                    }
                };
                if ws_sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        });

        let mut ticker = interval(context.tick_interval);

        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            let client_msg = match ClientMessage::from_json(&text) {
                                Ok(m) => m,
                                Err(e) => {
                                    debug!("Invalid message from {}: {}", addr, e);
                                    let _ = msg_tx.send(ServerMessage::Error(ServerError::new(
                                        ErrorCode::InvalidInput,
                                        "Invalid message format",
                                    ))).await;
                                    continue;
                                }
                            };

                            let reply = session.handle(client_msg).await;
                            if let Some(request) = reply.edit {
                                let editor = session.editor();
                                let edit_tx = edit_tx.clone();
                                tokio::spawn(async move {
                                    let completion = run_image_edit(editor, request).await;
                                    // Receiver gone means the connection closed; drop the result
                                    let _ = edit_tx.send(completion).await;
                                });
                            }
                            if !Self::forward(&msg_tx, reply.messages).await {
                                break;
                            }
                        }
                        Some(Ok(Message::Binary(_))) => {
                            debug!("Ignoring binary frame from {}", addr);
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            debug!("Client {} disconnected", addr);
                            break;
                        }
                        Some(Err(e)) => {
                            error!("WebSocket error for {}: {}", addr, e);
                            break;
                        }
                        _ => {}
                    }
                }
                Some(completion) = edit_rx.recv() => {
                    let messages = session.complete_edit(completion);
                    if !Self::forward(&msg_tx, messages).await {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let messages = session.tick();
                    if !Self::forward(&msg_tx, messages).await {
                        break;
                    }
                }
                _ = shutdown_rx.recv() => {
                    let _ = msg_tx.send(ServerMessage::Shutdown {
                        reason: "Server shutting down".to_string(),
                    }).await;
                    break;
                }
            }
        }

        // Let queued messages flush before closing
        drop(msg_tx);
        let _ = tokio::time::timeout(Duration::from_secs(1), sender_task).await;
        Ok(())
    }

    async fn forward(tx: &mpsc::Sender<ServerMessage>, messages: Vec<ServerMessage>) -> bool {
        for msg in messages {
            if tx.send(msg).await.is_err() {
                return false;
            }
        }
        true
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Current connection count.
    pub async fn connection_count(&self) -> usize {
        self.context.clients.read().await.len()
    }
}
