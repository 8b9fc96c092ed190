use thiserror::Error;

use crate::config::ConfigError;
use crate::journal::JournalError;
use crate::sync::{CursorError, SyncEngineError};
use crate::transport::TransportError;
use crate::worker::WorkerError;

/// Whether retrying this operation may succeed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Transience {
    /// Retry will never help without changing inputs/state.
    Permanent,
    /// Retry may help (transient contention/outage).
    Retryable,
    /// Unknown if retry will help.
    Unknown,
}

impl Transience {
    pub fn is_retryable(self) -> bool {
        matches!(self, Transience::Retryable)
    }
}

/// Crate-level convenience error.
///
/// A thin wrapper over the per-subsystem error types.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Journal(#[from] JournalError),

    #[error(transparent)]
    Cursor(#[from] CursorError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Engine(#[from] SyncEngineError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    pub fn transience(&self) -> Transience {
        match self {
            Error::Journal(_) => Transience::Unknown,
            Error::Cursor(_) => Transience::Unknown,
            Error::Transport(e) => e.transience(),
            Error::Engine(_) => Transience::Unknown,
            Error::Worker(e) => e.transience(),
            Error::Config(_) => Transience::Permanent,
        }
    }
}
