//! Durable replication cursor state.
//!
//! The sync engine is the only writer. Saves are atomic (temp file, fsync,
//! rename) so a crash can never leave a partial cursor file behind, and an
//! old flat `{filename: offset}` file is upgraded transparently on load.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

const CURSOR_FORMAT_VERSION: &str = "v2";

#[derive(Error, Debug)]
pub enum CursorError {
    #[error("cursor io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode cursor state: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to persist cursor state to {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: tempfile::PersistError,
    },
}

/// Per-peer replication progress.
///
/// `file_cursors` offsets are monotonically non-decreasing per remote file;
/// the engine enforces that when merging transport results.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CursorState {
    pub file_cursors: BTreeMap<String, u64>,
    pub last_seen_event_id_by_source: BTreeMap<String, String>,
    pub last_seen_timestamp_by_source: BTreeMap<String, String>,
}

#[derive(Serialize)]
struct CursorFile<'a> {
    version: &'static str,
    #[serde(flatten)]
    state: &'a CursorState,
}

pub struct CursorStore {
    path: PathBuf,
}

impl CursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load persisted state. Missing or corrupt files yield the default
    /// state; replication then starts over, which is safe because imports
    /// are deduplicated downstream.
    pub fn load(&self) -> CursorState {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return CursorState::default(),
            Err(e) => {
                warn!(file = %self.path.display(), "cursor state unreadable, starting fresh: {e}");
                return CursorState::default();
            }
        };
        let value: Value = match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(e) => {
                warn!(file = %self.path.display(), "cursor state corrupt, starting fresh: {e}");
                return CursorState::default();
            }
        };
        let Some(obj) = value.as_object() else {
            warn!(file = %self.path.display(), "cursor state is not an object, starting fresh");
            return CursorState::default();
        };

        // Legacy flat format: {"peer.jsonl": 12, ...}
        if !obj.contains_key("file_cursors") && !obj.contains_key("last_seen_event_id_by_source") {
            return CursorState {
                file_cursors: coerce_offsets(&value),
                ..CursorState::default()
            };
        }

        CursorState {
            file_cursors: obj.get("file_cursors").map(coerce_offsets).unwrap_or_default(),
            last_seen_event_id_by_source: obj
                .get("last_seen_event_id_by_source")
                .map(coerce_strings)
                .unwrap_or_default(),
            last_seen_timestamp_by_source: obj
                .get("last_seen_timestamp_by_source")
                .map(coerce_strings)
                .unwrap_or_default(),
        }
    }

    /// Atomically replace the cursor file. On failure the previous durable
    /// file is left intact.
    pub fn save(&self, state: &CursorState) -> Result<(), CursorError> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;

        let data = serde_json::to_vec_pretty(&CursorFile {
            version: CURSOR_FORMAT_VERSION,
            state,
        })?;

        let mut temp = tempfile::NamedTempFile::new_in(dir)?;
        temp.write_all(&data)?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|e| CursorError::Persist {
            path: self.path.clone(),
            source: e,
        })?;
        Ok(())
    }
}

fn coerce_offsets(value: &Value) -> BTreeMap<String, u64> {
    let mut out = BTreeMap::new();
    let Some(obj) = value.as_object() else {
        return out;
    };
    for (key, raw) in obj {
        let offset = match raw {
            Value::Number(n) => n.as_u64().or_else(|| n.as_i64().map(|v| v.max(0) as u64)),
            Value::String(s) => s.parse().ok(),
            _ => None,
        };
        if let Some(offset) = offset {
            out.insert(key.clone(), offset);
        }
    }
    out
}

fn coerce_strings(value: &Value) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    let Some(obj) = value.as_object() else {
        return out;
    };
    for (key, raw) in obj {
        if let Some(text) = raw.as_str() {
            let text = text.trim();
            if !text.is_empty() {
                out.insert(key.clone(), text.to_string());
            }
        }
    }
    out
}
