//! The active-project pointer file
//!
//! A single JSON record naming the active project root. It is the only
//! state shared between invocations, so reads always go to disk and writes
//! replace the whole file atomically.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// On-disk pointer record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextPointer {
    /// Absolute path to the active project root
    pub active_project_root: PathBuf,
    pub updated_at: DateTime<Utc>,
}

/// Reads and atomically replaces the pointer file
#[derive(Debug, Clone)]
pub struct PointerStore {
    path: PathBuf,
}

impl PointerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current pointer value. A missing or unreadable file reads as `None`.
    pub fn read(&self) -> Option<ContextPointer> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to read context pointer");
                return None;
            }
        };

        match serde_json::from_str(&content) {
            Ok(pointer) => Some(pointer),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Ignoring corrupt context pointer");
                None
            }
        }
    }

    /// Point at `root`, replacing the previous value.
    ///
    /// The record is written to a uniquely named sibling file, synced, then
    /// renamed over the pointer so readers see either the old or the new
    /// record and never a partial one.
    pub fn write(&self, root: &Path) -> Result<ContextPointer> {
        let pointer = ContextPointer {
            active_project_root: root.to_path_buf(),
            updated_at: Utc::now(),
        };
        let payload = serde_json::to_string_pretty(&pointer)?;

        let conflict = |source: std::io::Error| Error::ContextWriteConflict {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(conflict)?;
        }

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "pointer".to_string());
        let temp_path = self
            .path
            .with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

        let written = (|| {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(payload.as_bytes())?;
            file.sync_all()?;
            fs::rename(&temp_path, &self.path)
        })();

        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path);
            return Err(conflict(e));
        }

        tracing::info!(root = %root.display(), "Updated context pointer");
        Ok(pointer)
    }
}
