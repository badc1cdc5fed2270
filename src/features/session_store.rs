//! Session artifact persistence.
//!
//! After the identity provider confirms a login, the context's storage state
//! (cookies) is written to a fixed path, `state.json` by default. The next run
//! seeds its browser context from that file and the auth step short-circuits
//! when the LMS no longer redirects to the identity provider.
//!
//! The artifact is written once per successful login and never touched
//! mid-run, so there is no locking; writes still go through a temp file and a
//! rename so an interrupted run cannot leave half a file behind.

use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::core::error::Result;
use crate::scraping::port::StorageState;

// ─────────────────────────────────────────────────────────────────────────────
// Store
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored artifact when one exists and is still usable.
    ///
    /// An unreadable or unparsable file is treated as absent (the run simply
    /// logs in again), as is an artifact whose persistent cookies all expired.
    pub fn load_if_present(&self) -> Option<StorageState> {
        if !self.path.exists() {
            info!(
                "session_store: no stored session at {}, a fresh login will be required",
                self.path.display()
            );
            return None;
        }

        let content = match std::fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) => {
                warn!("session_store: failed to read {}: {}", self.path.display(), e);
                return None;
            }
        };

        let state: StorageState = match serde_json::from_str(&content) {
            Ok(s) => s,
            Err(e) => {
                warn!(
                    "session_store: failed to parse {}: {}; ignoring stored session",
                    self.path.display(),
                    e
                );
                return None;
            }
        };

        let now = chrono::Utc::now().timestamp() as f64;
        if state.all_persistent_expired(now) {
            warn!(
                "session_store: every persistent cookie in {} has expired; ignoring stored session",
                self.path.display()
            );
            return None;
        }

        info!(
            "session_store: loaded {} cookies from {} (earliest expiry {:?})",
            state.cookies.len(),
            self.path.display(),
            state.earliest_expiry()
        );
        Some(state)
    }

    /// Persist `state`, replacing any previous artifact.
    pub fn save(&self, state: &StorageState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string_pretty(state)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;

        info!(
            "session_store: saved {} cookies to {}",
            state.cookies.len(),
            self.path.display()
        );
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
