//! Synchronization: engine, cursor persistence, status taxonomy.

pub mod cursor;
pub mod engine;
pub mod status;

pub use cursor::{CursorError, CursorState, CursorStore};
pub use engine::{EngineStats, SyncEngine, SyncEngineError, SyncReport};
pub use status::SyncStatus;
