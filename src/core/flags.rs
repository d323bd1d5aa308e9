//! Persisted Flags
//!
//! The only state that outlives a session: whether the tutorial was shown.
//! Stored as a tiny JSON document; an in-memory variant exists for tests.

use std::path::PathBuf;
use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::{debug, warn};

/// On-disk document.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
struct FlagDocument {
    #[serde(default)]
    tutorial_seen: bool,
}

/// Flag store errors.
#[derive(Debug, Error)]
pub enum FlagStoreError {
    /// Reading or writing the flag file failed.
    #[error("Flag file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The flag file could not be encoded.
    #[error("Flag file encoding failed: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Key-value flag store for the "tutorial already shown" bit.
#[derive(Debug)]
pub struct FlagStore {
    /// Backing file (None = memory only).
    path: Option<PathBuf>,
    /// Cached document.
    doc: FlagDocument,
}

impl FlagStore {
    /// Open a file-backed store. A missing or unreadable file reads as "not seen".
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let doc = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "flag file unreadable, starting fresh");
                FlagDocument::default()
            }),
            Err(_) => FlagDocument::default(),
        };
        debug!(path = %path.display(), tutorial_seen = doc.tutorial_seen, "flag store opened");
        Self { path: Some(path), doc }
    }

    /// Create a store that never touches the disk.
    pub fn in_memory() -> Self {
        Self { path: None, doc: FlagDocument::default() }
    }

    /// Has the tutorial already been shown?
    pub fn tutorial_seen(&self) -> bool {
        self.doc.tutorial_seen
    }

    /// Record that the tutorial was dismissed. Writes at most once.
    pub fn mark_tutorial_seen(&mut self) -> Result<(), FlagStoreError> {
        if self.doc.tutorial_seen {
            return Ok(());
        }
        self.doc.tutorial_seen = true;
        if let Some(path) = &self.path {
            let text = serde_json::to_string_pretty(&self.doc)?;
            std::fs::write(path, text)?;
        }
        Ok(())
    }
}
