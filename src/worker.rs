//! Background sync worker.
//!
//! A single thread owns the [`SyncEngine`] and drains a bounded job queue
//! in strict FIFO order, so journal appends and transport calls are never
//! interleaved. Sync requests coalesce: while one is queued, further
//! requests are dropped instead of piling up behind a slow transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::Event;
use crate::error::Transience;
use crate::health::HealthStore;
use crate::sync::{SyncEngine, SyncReport};

const JOB_QUEUE_CAP: usize = 256;
const RESULT_QUEUE_CAP: usize = 256;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("worker job queue is full")]
    QueueFull,

    #[error("worker thread has stopped")]
    Stopped,
}

impl WorkerError {
    pub fn transience(&self) -> Transience {
        match self {
            WorkerError::QueueFull => Transience::Retryable,
            WorkerError::Stopped => Transience::Permanent,
        }
    }
}

/// Work items, processed one at a time in submission order.
#[derive(Debug)]
pub enum Job {
    /// Record an event in the journal, then push it to the peer channel.
    Publish(Event),
    Sync { force: bool },
    Shutdown,
}

#[derive(Debug)]
pub enum JobResult {
    Published {
        event_id: String,
        /// False when the journal took the event but no push happened
        /// (sync disabled, or already published).
        sent: bool,
    },
    PublishFailed {
        event_id: String,
        error: String,
    },
    Synced(SyncReport),
    SyncFailed {
        error: String,
    },
}

pub struct WorkerHandle {
    job_tx: Sender<Job>,
    results_rx: Receiver<JobResult>,
    sync_pending: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Spawn the worker thread around an engine. When a health store is
    /// given, a fresh snapshot is written after every job.
    pub fn spawn(engine: SyncEngine, health: Option<HealthStore>) -> Self {
        let (job_tx, job_rx) = bounded(JOB_QUEUE_CAP);
        let (result_tx, results_rx) = bounded(RESULT_QUEUE_CAP);
        let sync_pending = Arc::new(AtomicBool::new(false));

        let pending = Arc::clone(&sync_pending);
        let thread = std::thread::Builder::new()
            .name("driftlog-sync".to_string())
            .spawn(move || run_worker_loop(engine, health, job_rx, result_tx, pending));
        let thread = match thread {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("failed to spawn sync worker thread: {e}");
                None
            }
        };

        Self {
            job_tx,
            results_rx,
            sync_pending,
            thread,
        }
    }

    /// Queue an event for durable recording and publication.
    pub fn publish(&self, event: Event) -> Result<(), WorkerError> {
        self.submit(Job::Publish(event))
    }

    /// Queue a sync cycle. Returns `Ok(false)` when one is already queued;
    /// the pending cycle will observe any state this call would have.
    pub fn request_sync(&self, force: bool) -> Result<bool, WorkerError> {
        if self.sync_pending.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }
        match self.submit(Job::Sync { force }) {
            Ok(()) => Ok(true),
            Err(e) => {
                self.sync_pending.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Non-blocking drain of completed job results.
    pub fn drain_results(&self) -> Vec<JobResult> {
        self.results_rx.try_iter().collect()
    }

    /// Wait up to `timeout` for the next completed job result.
    pub fn recv_result(&self, timeout: Duration) -> Option<JobResult> {
        self.results_rx.recv_timeout(timeout).ok()
    }

    /// Stop accepting work and wait for in-flight jobs to finish.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn submit(&self, job: Job) -> Result<(), WorkerError> {
        self.job_tx.try_send(job).map_err(|e| match e {
            TrySendError::Full(_) => WorkerError::QueueFull,
            TrySendError::Disconnected(_) => WorkerError::Stopped,
        })
    }

    fn stop_and_join(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.job_tx.send(Job::Shutdown);
            let _ = thread.join();
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

fn run_worker_loop(
    mut engine: SyncEngine,
    health: Option<HealthStore>,
    job_rx: Receiver<Job>,
    result_tx: Sender<JobResult>,
    sync_pending: Arc<AtomicBool>,
) {
    debug!(source = engine.source_id(), "sync worker started");
    for job in job_rx {
        let result = match job {
            Job::Shutdown => break,
            Job::Publish(event) => handle_publish(&mut engine, event),
            Job::Sync { force } => {
                sync_pending.store(false, Ordering::SeqCst);
                handle_sync(&mut engine, force)
            }
        };

        if let Some(store) = &health {
            if let Err(e) = store.save(&engine.health_snapshot()) {
                warn!("failed to write health snapshot: {e}");
            }
        }

        if result_tx.try_send(result).is_err() {
            debug!("result queue full or disconnected, dropping job result");
        }
    }
    debug!(source = engine.source_id(), "sync worker stopped");
}

fn handle_publish(engine: &mut SyncEngine, event: Event) -> JobResult {
    if let Err(e) = engine.record_local_event(&event) {
        return JobResult::PublishFailed {
            event_id: event.event_id,
            error: e.to_string(),
        };
    }
    match engine.publish_local_event(&event) {
        Ok(sent) => JobResult::Published {
            event_id: event.event_id,
            sent,
        },
        Err(e) => JobResult::PublishFailed {
            event_id: event.event_id,
            error: e.to_string(),
        },
    }
}

fn handle_sync(engine: &mut SyncEngine, force: bool) -> JobResult {
    match engine.sync_once(force) {
        Ok(report) => JobResult::Synced(report),
        Err(e) => JobResult::SyncFailed {
            error: e.to_string(),
        },
    }
}
