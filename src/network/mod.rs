//! Network Layer
//!
//! WebSocket server, wire protocol and the image-edit collaborator.
//! This layer is **non-deterministic** - all game rules live in `game/`.

pub mod image_edit;
pub mod protocol;
pub mod session;
pub mod server;

pub use image_edit::{GeminiImageEditor, ImageEditConfig, ImageEditError, ImageEditor};
pub use protocol::{ClientMessage, ServerMessage, ServerError, ErrorCode, PositionReport};
pub use session::{PlayerSession, SessionError, SessionReply, EditCompletion, run_image_edit};
pub use server::{GameServer, ServerConfig, GameServerError};
