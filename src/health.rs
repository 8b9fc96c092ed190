//! Runtime health snapshot.
//!
//! Written by the worker after each job; read only by external diagnostic
//! tooling. Losing it costs nothing but visibility, so load failures fall
//! back to an empty snapshot and save failures only warn upstream.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum HealthError {
    #[error("health snapshot io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode health snapshot: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to persist health snapshot to {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: tempfile::PersistError,
    },
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSnapshot {
    pub sync_state: String,
    pub paused_reason: String,
    pub bad_lines_skipped: u64,
    pub last_push_at: String,
    pub last_push_count: u64,
    pub last_pull_at: String,
    pub last_pull_imported: u64,
    pub last_pull_received: u64,
    pub last_seen_event_id_by_source: BTreeMap<String, String>,
    pub last_seen_timestamp_by_source: BTreeMap<String, String>,
}

pub struct HealthStore {
    path: PathBuf,
}

impl HealthStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> HealthSnapshot {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(_) => return HealthSnapshot::default(),
        };
        match serde_json::from_str(&text) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(file = %self.path.display(), "health snapshot corrupt, ignoring: {e}");
                HealthSnapshot::default()
            }
        }
    }

    /// Atomic replace; the previous snapshot survives a failed save.
    pub fn save(&self, snapshot: &HealthSnapshot) -> Result<(), HealthError> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;

        let data = serde_json::to_vec_pretty(snapshot)?;
        let mut temp = tempfile::NamedTempFile::new_in(dir)?;
        temp.write_all(&data)?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|e| HealthError::Persist {
            path: self.path.clone(),
            source: e,
        })?;
        Ok(())
    }
}
