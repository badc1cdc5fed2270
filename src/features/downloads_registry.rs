//! Downloads registry: recording title → saved analytics file.
//!
//! Persisted as `echo/downloads.json`. It is the durable checkpoint of the
//! lecture-capture export and the source of truth for "has this recording
//! already been fetched". The file is read before a walk and rewritten, merged
//! and pretty-printed, after the walk succeeds.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::core::error::Result;
use crate::core::types::DownloadRecord;

#[derive(Debug, Clone)]
pub struct DownloadsRegistry {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl DownloadsRegistry {
    /// Open the registry at `path`, creating an empty `{}` file (and parent
    /// folder) when it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        if !path.exists() {
            std::fs::write(&path, "{}")?;
            info!("downloads_registry: created empty registry at {}", path.display());
        }

        let content = std::fs::read_to_string(&path)?;
        let entries: BTreeMap<String, String> = serde_json::from_str(&content)?;
        info!(
            "downloads_registry: {} recordings already downloaded ({})",
            entries.len(),
            path.display()
        );

        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Idempotency oracle used by the recording walker.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    /// Merge freshly downloaded records. A repeated title overwrites the
    /// previous path.
    pub fn merge(&mut self, records: &[DownloadRecord]) {
        for record in records {
            let path = record.path.to_string_lossy().to_string();
            if let Some(previous) = self.entries.insert(record.name.clone(), path) {
                warn!(
                    "downloads_registry: '{}' was already mapped to {}, replaced",
                    record.name, previous
                );
            }
        }
    }

    /// Rewrite the registry file atomically (temp file + rename).
    pub fn save(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.entries)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        info!(
            "downloads_registry: wrote {} entries to {}",
            self.entries.len(),
            self.path.display()
        );
        Ok(())
    }
}
