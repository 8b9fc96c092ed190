//! The push/pull boundary to the shared replication medium.
//!
//! Implementations speak newline-delimited wire envelopes: one append-only
//! channel per peer, full or cursor-resumable scans of everyone else's.
//! Errors carry enough structure for the sync engine to classify failures
//! without guessing.

pub mod dir;
pub mod remote;
pub mod wire;

use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;

use crate::config::{Config, TransportKind};
use crate::error::Transience;

pub use dir::DirTransport;
pub use remote::RemoteStoreTransport;
pub use wire::Envelope;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TransportError {
    #[error("missing credentials: {what}")]
    MissingCredentials { what: &'static str },

    #[error("unauthorized: status={status}")]
    Unauthorized { status: u16 },

    #[error("rate limited: status=429")]
    RateLimited {
        /// Epoch seconds when the limit resets, when the store says.
        reset_epoch_s: Option<u64>,
    },

    #[error("offline: {0}")]
    Offline(String),

    #[error("remote {op} failed: status={status}")]
    Status { op: &'static str, status: u16 },

    #[error("transport io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport http error: {0}")]
    Http(String),

    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

impl TransportError {
    /// Whether retrying this operation may succeed.
    pub fn transience(&self) -> Transience {
        match self {
            TransportError::MissingCredentials { .. } | TransportError::Unauthorized { .. } => {
                Transience::Permanent
            }
            TransportError::RateLimited { .. }
            | TransportError::Offline(_)
            | TransportError::Io(_)
            | TransportError::Http(_) => Transience::Retryable,
            TransportError::Status { status, .. } => {
                if *status >= 500 {
                    Transience::Retryable
                } else {
                    Transience::Permanent
                }
            }
            TransportError::Encode(_) => Transience::Permanent,
        }
    }
}

/// Remote-file-name to consumed-offset map handed to incremental scans.
pub type FileCursors = BTreeMap<String, u64>;

/// One peer's view of the shared medium.
///
/// `send` publishes to this peer's own channel and must fail loudly on any
/// non-success outcome. Receives return raw decoded JSON payloads; envelope
/// interpretation belongs to the sync engine.
pub trait Transport: Send {
    fn send(&mut self, envelope: &Envelope) -> Result<(), TransportError>;

    /// Full scan of all other peers' channels.
    fn receive(&mut self) -> Result<Vec<Value>, TransportError>;

    /// Resumable scan: only payloads beyond the recorded offsets, plus the
    /// advanced offsets. The default falls back to a full scan with an
    /// unchanged cursor for implementations without incremental support.
    fn receive_incremental(
        &mut self,
        cursors: &FileCursors,
    ) -> Result<(Vec<Value>, FileCursors), TransportError> {
        Ok((self.receive()?, cursors.clone()))
    }

    /// Best-effort liveness announcement; not required for correctness.
    fn update_presence(&mut self, _presence: &Value) -> Result<(), TransportError> {
        Ok(())
    }

    fn receive_presence(&mut self) -> Result<Vec<Value>, TransportError> {
        Ok(Vec::new())
    }
}

/// Build the configured transport, or `None` when replication is disabled.
///
/// A remote config with a repo but no token still builds; its calls fail
/// with `MissingCredentials` so the engine can report `auth_missing` instead
/// of silently running disabled.
pub fn build(config: &Config) -> Option<Box<dyn Transport>> {
    match config.transport {
        TransportKind::File => Some(Box::new(DirTransport::new(
            config.file_transport_dir(),
            &config.source_id,
        ))),
        TransportKind::Remote => {
            if config.remote.repo.trim().is_empty() {
                return None;
            }
            match RemoteStoreTransport::new(&config.remote, &config.source_id) {
                Ok(transport) => Some(Box::new(transport)),
                Err(e) => {
                    tracing::warn!("remote transport unavailable: {e}");
                    None
                }
            }
        }
        TransportKind::None => None,
    }
}
