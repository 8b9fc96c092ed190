//! Config loading and persistence.
//!
//! One explicit `Config` value is built at startup (file + env overrides) and
//! passed into the journal/engine/transport constructors. Components never
//! read the environment themselves.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::paths;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to persist {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: tempfile::PersistError,
    },
}

/// Which replication medium to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Shared directory, one append-only file per peer.
    #[default]
    File,
    /// Remote content store over HTTP.
    Remote,
    /// Replication disabled.
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Peer identifier stamped into every locally minted event.
    pub source_id: String,
    pub transport: TransportKind,
    pub tick_seconds: u64,
    pub sync_interval_seconds: u64,
    /// Sync interval stretches up to `interval * multiplier` while idle.
    pub sync_idle_max_multiplier: u32,
    pub journal_retention_days: u32,
    /// Fsync each journal append. Slower, but an acknowledged append
    /// survives a crash.
    pub journal_fsync: bool,
    pub derived_rebuild_seconds: u64,
    /// Overrides the XDG data dir when set.
    pub data_dir: Option<PathBuf>,
    /// Shared directory for `TransportKind::File`.
    pub file_transport_dir: Option<PathBuf>,
    pub remote: RemoteConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source_id: "unknown".to_string(),
            transport: TransportKind::File,
            tick_seconds: 60,
            sync_interval_seconds: 10,
            sync_idle_max_multiplier: 6,
            journal_retention_days: 30,
            journal_fsync: false,
            derived_rebuild_seconds: 5,
            data_dir: None,
            file_transport_dir: None,
            remote: RemoteConfig::default(),
        }
    }
}

/// Remote content-store coordinates. `repo` is `owner/name`; files live
/// under `folder` on `branch`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub repo: String,
    pub token: String,
    pub branch: String,
    pub folder: String,
    pub base_url: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            repo: String::new(),
            token: String::new(),
            branch: "main".to_string(),
            folder: "driftlog_sync".to_string(),
            base_url: "https://api.github.com".to_string(),
        }
    }
}

impl Config {
    /// Resolved data directory for persisted artifacts.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(paths::data_dir)
    }

    /// Resolved shared directory for the file transport.
    pub fn file_transport_dir(&self) -> PathBuf {
        self.file_transport_dir
            .clone()
            .unwrap_or_else(|| paths::shared_dir_default(&self.data_dir()))
    }

    /// Apply `DRIFTLOG_*` environment overrides on top of file values.
    pub fn apply_env(mut self) -> Self {
        if let Some(v) = env_str("DRIFTLOG_SOURCE_ID") {
            self.source_id = v;
        }
        if let Some(v) = env_str("DRIFTLOG_TRANSPORT") {
            self.transport = match v.to_ascii_lowercase().as_str() {
                "file" => TransportKind::File,
                "remote" => TransportKind::Remote,
                _ => TransportKind::None,
            };
        }
        if let Some(v) = env_u64("DRIFTLOG_TICK_SECONDS") {
            self.tick_seconds = v.max(1);
        }
        if let Some(v) = env_u64("DRIFTLOG_SYNC_INTERVAL_SECONDS") {
            self.sync_interval_seconds = v.max(1);
        }
        if let Some(v) = env_u64("DRIFTLOG_SYNC_IDLE_MAX_MULTIPLIER") {
            self.sync_idle_max_multiplier = (v.max(1)).min(u32::MAX as u64) as u32;
        }
        if let Some(v) = env_u64("DRIFTLOG_JOURNAL_RETENTION_DAYS") {
            self.journal_retention_days = (v.max(1)).min(u32::MAX as u64) as u32;
        }
        if let Some(v) = env_str("DRIFTLOG_JOURNAL_FSYNC") {
            self.journal_fsync = matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        if let Some(v) = env_u64("DRIFTLOG_DERIVED_REBUILD_SECONDS") {
            self.derived_rebuild_seconds = v.max(1);
        }
        if let Some(v) = env_str("DRIFTLOG_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = env_str("DRIFTLOG_FILE_TRANSPORT_DIR") {
            self.file_transport_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = env_str("DRIFTLOG_REMOTE_REPO") {
            self.remote.repo = v;
        }
        if let Some(v) = env_str("DRIFTLOG_REMOTE_TOKEN") {
            self.remote.token = v;
        }
        if let Some(v) = env_str("DRIFTLOG_REMOTE_BRANCH") {
            self.remote.branch = v;
        }
        if let Some(v) = env_str("DRIFTLOG_REMOTE_FOLDER") {
            self.remote.folder = v;
        }
        self
    }
}

fn env_str(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_u64(name: &str) -> Option<u64> {
    env_str(name).and_then(|s| s.parse().ok())
}

pub fn config_path() -> PathBuf {
    paths::config_dir().join("config.toml")
}

pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_owned(),
        source: e,
    })?;
    toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_owned(),
        source: e,
    })
}

/// Load the config file, or fall back to (and write out) defaults.
/// Env overrides are applied either way.
pub fn load_or_init() -> Config {
    let path = config_path();
    if path.exists() {
        match load(&path) {
            Ok(cfg) => return cfg.apply_env(),
            Err(e) => {
                tracing::warn!("config load failed, using defaults: {e}");
                return Config::default().apply_env();
            }
        }
    }

    let cfg = Config::default();
    if let Err(e) = write_config(&path, &cfg) {
        tracing::warn!("failed to write default config: {e}");
    }
    cfg.apply_env()
}

pub fn write_config(path: &Path, cfg: &Config) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| ConfigError::Write {
            path: dir.to_owned(),
            source: e,
        })?;
    }
    let contents = toml::to_string_pretty(cfg)?;
    atomic_write(path, contents.as_bytes())
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<(), ConfigError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let temp = tempfile::NamedTempFile::new_in(dir).map_err(|e| ConfigError::Write {
        path: path.to_owned(),
        source: e,
    })?;
    fs::write(temp.path(), data).map_err(|e| ConfigError::Write {
        path: path.to_owned(),
        source: e,
    })?;
    temp.persist(path).map_err(|e| ConfigError::Persist {
        path: path.to_owned(),
        source: e,
    })?;
    Ok(())
}
