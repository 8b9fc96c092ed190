#![forbid(unsafe_code)]

pub mod compact;
pub mod config;
pub mod core;
pub mod error;
pub mod health;
pub mod journal;
pub mod paths;
pub mod sync;
pub mod telemetry;
pub mod transport;
pub mod worker;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;

// Re-export the main types at crate root for convenience
pub use crate::compact::{compact_journal_dir, CompactionReport};
pub use crate::config::{Config, TransportKind};
pub use crate::core::{summarize, Event, Summary};
pub use crate::health::{HealthSnapshot, HealthStore};
pub use crate::journal::{Journal, ReadStats};
pub use crate::sync::{CursorState, CursorStore, SyncEngine, SyncReport, SyncStatus};
pub use crate::transport::{DirTransport, RemoteStoreTransport, Transport, TransportError};
pub use crate::worker::{Job, JobResult, WorkerHandle};
