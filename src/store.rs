//! Durable storage for [`ControllerState`].
//!
//! The whole document is rewritten on every successful mutation using
//! write-new-then-replace: serialize fully, write a uniquely named sibling
//! temp file, then `rename` it over the previous version. A crash mid-write
//! leaves either the old document or the new one, never a truncated mix.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::state::ControllerState;

#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted state, or start from defaults when nothing has
    /// been written yet. A present-but-corrupt document is an error; we do
    /// not silently throw away state.
    pub fn load_or_default(&self) -> Result<ControllerState> {
        match fs::read(&self.path) {
            Ok(bytes) => {
                let state = serde_json::from_slice(&bytes)?;
                info!(path = %self.path.display(), "loaded controller state");
                Ok(state)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %self.path.display(), "no persisted state found, using defaults");
                Ok(ControllerState::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, state: &ControllerState) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(state)?;

        let tmp = self
            .path
            .with_extension(format!("tmp-{}", Uuid::new_v4().simple()));
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&tmp, &bytes)?;
        if let Err(e) = fs::rename(&tmp, &self.path) {
            // Best effort cleanup; the rename error is the one that matters.
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}
