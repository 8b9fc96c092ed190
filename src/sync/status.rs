//! Engine status and failure classification.
//!
//! Transport implementations return structured errors where they can; the
//! text classifier backstops boundaries that can only smuggle an HTTP
//! status through an error string. Keep the string matching here, nowhere
//! else.

use std::fmt;

use crate::transport::TransportError;

/// Externally visible sync state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncStatus {
    Idle,
    Ok,
    Disabled,
    AuthMissing,
    AuthFail,
    Paused,
    RateLimited,
    Offline,
    /// Backing off after `n` consecutive transient failures.
    Retrying(u32),
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Idle => write!(f, "idle"),
            SyncStatus::Ok => write!(f, "ok"),
            SyncStatus::Disabled => write!(f, "disabled"),
            SyncStatus::AuthMissing => write!(f, "auth_missing"),
            SyncStatus::AuthFail => write!(f, "auth_fail"),
            SyncStatus::Paused => write!(f, "paused"),
            SyncStatus::RateLimited => write!(f, "rate_limited"),
            SyncStatus::Offline => write!(f, "offline"),
            SyncStatus::Retrying(n) => write!(f, "retrying({n})"),
        }
    }
}

/// What a pull failure means for the engine's next move.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FailureKind {
    AuthMissing,
    AuthFail,
    RateLimited,
    Offline,
    Transient,
}

pub(crate) fn classify(err: &TransportError) -> FailureKind {
    match err {
        TransportError::MissingCredentials { .. } => FailureKind::AuthMissing,
        TransportError::Unauthorized { .. } => FailureKind::AuthFail,
        TransportError::RateLimited { .. } => FailureKind::RateLimited,
        TransportError::Offline(_) => FailureKind::Offline,
        // Everything else only carries text; fall back to inspecting it.
        other => classify_text(&other.to_string()),
    }
}

pub(crate) fn classify_text(text: &str) -> FailureKind {
    let lower = text.to_ascii_lowercase();
    if lower.contains("401")
        || lower.contains("403")
        || lower.contains("unauthorized")
        || lower.contains("forbidden")
    {
        return FailureKind::AuthFail;
    }
    if lower.contains("429") || lower.contains("rate limit") {
        return FailureKind::RateLimited;
    }
    if lower.contains("timed out")
        || lower.contains("timeout")
        || lower.contains("dns")
        || lower.contains("connection refused")
        || lower.contains("network unreachable")
        || lower.contains("offline")
    {
        return FailureKind::Offline;
    }
    FailureKind::Transient
}
