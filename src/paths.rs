//! XDG directory helpers for config/data locations.

use std::path::PathBuf;

/// Base directory for persistent data (journal, cursor, health snapshot).
///
/// Uses `DRIFTLOG_DATA_DIR` if set, otherwise `$XDG_DATA_HOME/driftlog` or
/// `~/.local/share/driftlog`.
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("DRIFTLOG_DATA_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }

    std::env::var("XDG_DATA_HOME")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".local")
                .join("share")
        })
        .join("driftlog")
}

/// Base directory for the config file.
///
/// Uses `$XDG_CONFIG_HOME/driftlog` or `~/.config/driftlog`.
pub fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".config")
        })
        .join("driftlog")
}

/// Legacy single-file journal path. `Journal::open` derives the day-shard
/// directory from this by dropping the extension.
pub fn journal_path(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("journal.jsonl")
}

/// Replication cursor state path.
pub fn cursor_path(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("sync_cursor.json")
}

/// Health/diagnostics snapshot path (read by external tooling only).
pub fn health_path(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("sync_health.json")
}

/// Default shared directory for the file transport.
pub fn shared_dir_default(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("transport_shared")
}
