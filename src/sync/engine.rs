//! The synchronization engine.
//!
//! Owns the journal, the cursor state, and the transport for one peer.
//! Push is idempotent per engine instance; pull is incremental, resumable
//! across restarts, and deduplicated three ways (known ids, self-echoes,
//! rollups covering days we already hold raw data for). All retry and
//! backoff policy lives here; the journal and cursor store never retry.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::cursor::{CursorError, CursorState, CursorStore};
use super::status::{classify, FailureKind, SyncStatus};
use crate::core::{utc_now_rfc3339, Event};
use crate::health::HealthSnapshot;
use crate::journal::{Journal, JournalError};
use crate::transport::{wire, Transport, TransportError};

/// Backoff ceiling. `2^n` seconds, capped here.
const BACKOFF_CAP_SECS: u64 = 60;
const BACKOFF_EXP_MAX: u32 = 6;

/// Durability failures, as opposed to classified transport failures which
/// are folded into the [`SyncReport`].
#[derive(Error, Debug)]
pub enum SyncEngineError {
    #[error(transparent)]
    Journal(#[from] JournalError),

    #[error(transparent)]
    Cursor(#[from] CursorError),
}

/// Outcome of one `sync_once` call.
#[derive(Clone, Debug)]
pub struct SyncReport {
    pub status: SyncStatus,
    /// Events newly appended to the journal by this pull.
    pub imported_events: Vec<Event>,
    /// Raw payloads seen before filtering.
    pub received: usize,
    /// Seconds until the next unforced attempt is eligible, when backing off.
    pub retry_in_seconds: Option<u64>,
    pub error: Option<String>,
}

impl SyncReport {
    fn status_only(status: SyncStatus) -> Self {
        Self {
            status,
            imported_events: Vec::new(),
            received: 0,
            retry_in_seconds: None,
            error: None,
        }
    }

    pub fn imported(&self) -> usize {
        self.imported_events.len()
    }
}

/// Push/pull bookkeeping surfaced in the health snapshot.
#[derive(Clone, Debug, Default)]
pub struct EngineStats {
    pub last_push_at: String,
    pub last_push_count: u64,
    pub last_pull_at: String,
    pub last_pull_imported: u64,
    pub last_pull_received: u64,
}

pub struct SyncEngine {
    source_id: String,
    journal: Journal,
    transport: Option<Box<dyn Transport>>,
    cursor_store: Option<CursorStore>,
    cursor: CursorState,
    status: SyncStatus,
    retry_count: u32,
    next_retry_at: Option<Instant>,
    paused: bool,
    paused_reason: String,
    published_ids: HashSet<String>,
    stats: EngineStats,
}

impl SyncEngine {
    /// Build an engine around a journal.
    ///
    /// The journal's warm-up scan already seeded its dedup and raw-day
    /// sets; the engine queries those instead of keeping copies. Persisted
    /// cursor state is loaded so replication resumes where it left off.
    pub fn new(
        source_id: impl Into<String>,
        journal: Journal,
        transport: Option<Box<dyn Transport>>,
        cursor_store: Option<CursorStore>,
    ) -> Self {
        let cursor = cursor_store.as_ref().map(CursorStore::load).unwrap_or_default();
        let status = if transport.is_some() {
            SyncStatus::Idle
        } else {
            SyncStatus::Disabled
        };

        Self {
            source_id: source_id.into(),
            journal,
            transport,
            cursor_store,
            cursor,
            status,
            retry_count: 0,
            next_retry_at: None,
            paused: false,
            paused_reason: String::new(),
            published_ids: HashSet::new(),
            stats: EngineStats::default(),
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn status(&self) -> SyncStatus {
        self.status
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn cursor(&self) -> &CursorState {
        &self.cursor
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn journal_mut(&mut self) -> &mut Journal {
        &mut self.journal
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Durably record a locally produced event before publication.
    pub fn record_local_event(&mut self, event: &Event) -> Result<bool, JournalError> {
        self.journal.append(event)
    }

    /// Push one local event to this peer's own channel.
    ///
    /// Returns `Ok(false)` without sending when the transport is absent or
    /// the event was already published by this engine instance. A failed
    /// send is returned to the caller, who may retry with a fresh call;
    /// nothing is marked published in that case.
    pub fn publish_local_event(&mut self, event: &Event) -> Result<bool, TransportError> {
        if event.event_id.is_empty() || self.published_ids.contains(&event.event_id) {
            return Ok(false);
        }
        let Some(transport) = self.transport.as_mut() else {
            return Ok(false);
        };

        let envelope = wire::encode(&self.source_id, event);
        transport.send(&envelope)?;

        self.published_ids.insert(event.event_id.clone());
        self.status = SyncStatus::Ok;
        self.reset_backoff();
        self.stats.last_push_at = utc_now_rfc3339();
        self.stats.last_push_count += 1;
        debug!(event_id = %event.event_id, "published local event");
        Ok(true)
    }

    /// One pull cycle. `force` bypasses the pause and backoff gates (auth
    /// failures are only retried when forced).
    ///
    /// Transport failures are classified into the report; only local
    /// durability failures (journal write, cursor persist) propagate.
    pub fn sync_once(&mut self, force: bool) -> Result<SyncReport, SyncEngineError> {
        // The pause and backoff flags are only ever set by transport
        // failures, so a transport-less engine falls straight through the
        // gates to the disabled return below.
        if self.paused && !force {
            self.status = SyncStatus::Paused;
            let mut report = SyncReport::status_only(SyncStatus::Paused);
            if !self.paused_reason.is_empty() {
                report.error = Some(self.paused_reason.clone());
            }
            return Ok(report);
        }

        if !force && self.backoff_remaining().is_some() {
            // A call landing inside the window counts as one more failed
            // attempt: the retry ladder climbs and the full new delay is
            // reported, but the transport is left alone and the window's
            // end does not move, so eligibility is never pushed out by
            // polling alone.
            self.retry_count += 1;
            let status = SyncStatus::Retrying(self.retry_count);
            self.status = status;
            let mut report = SyncReport::status_only(status);
            report.retry_in_seconds = Some(backoff_secs(self.retry_count));
            return Ok(report);
        }

        let Some(transport) = self.transport.as_mut() else {
            self.status = SyncStatus::Disabled;
            return Ok(SyncReport::status_only(SyncStatus::Disabled));
        };

        let (payloads, next_cursors) = match transport.receive_incremental(&self.cursor.file_cursors)
        {
            Ok(pulled) => pulled,
            Err(e) => return Ok(self.classify_failure(e)),
        };

        let received = payloads.len();
        let mut imported_events = Vec::new();
        for payload in &payloads {
            let Some(event) = wire::decode(payload) else {
                warn!("dropping undecodable payload");
                continue;
            };
            if event.event_id.is_empty() || self.journal.contains(&event.event_id) {
                continue;
            }
            // Self-authored echoes come back through the shared medium;
            // never import them. Skipped payloads stay behind the advanced
            // cursor, so they are not reconsidered either way.
            if event.source == self.source_id {
                continue;
            }
            if event.is_rollup() && self.covers_local_raw_day(&event) {
                continue;
            }

            let appended = self.journal.append(&event)?;
            if !appended {
                continue;
            }
            self.note_last_seen(&event);
            imported_events.push(event);
        }

        // Merge offsets monotonically; a transport may not know about files
        // it saw on an earlier scan.
        for (file, offset) in next_cursors {
            let entry = self.cursor.file_cursors.entry(file).or_insert(0);
            *entry = (*entry).max(offset);
        }
        if let Some(store) = &self.cursor_store {
            store.save(&self.cursor)?;
        }

        self.status = SyncStatus::Ok;
        self.paused = false;
        self.paused_reason.clear();
        self.reset_backoff();
        self.stats.last_pull_at = utc_now_rfc3339();
        self.stats.last_pull_imported = imported_events.len() as u64;
        self.stats.last_pull_received = received as u64;

        if !imported_events.is_empty() {
            info!(imported = imported_events.len(), received, "sync imported remote events");
        }

        Ok(SyncReport {
            status: SyncStatus::Ok,
            imported_events,
            received,
            retry_in_seconds: None,
            error: None,
        })
    }

    /// Diagnostics snapshot for external tooling.
    pub fn health_snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            sync_state: self.status.to_string(),
            paused_reason: self.paused_reason.clone(),
            bad_lines_skipped: self.journal.last_read_stats().bad_lines_skipped,
            last_push_at: self.stats.last_push_at.clone(),
            last_push_count: self.stats.last_push_count,
            last_pull_at: self.stats.last_pull_at.clone(),
            last_pull_imported: self.stats.last_pull_imported,
            last_pull_received: self.stats.last_pull_received,
            last_seen_event_id_by_source: self.cursor.last_seen_event_id_by_source.clone(),
            last_seen_timestamp_by_source: self.cursor.last_seen_timestamp_by_source.clone(),
        }
    }

    /// True when a rollup's covered `(date, source)` already has raw events
    /// in this journal. Keyed on calendar date only; see the compaction
    /// docs for the known midnight-edge ambiguity.
    fn covers_local_raw_day(&self, rollup: &Event) -> bool {
        let date = rollup
            .payload_str("date")
            .map(str::to_string)
            .unwrap_or_else(|| rollup.day_string());
        let source = rollup.payload_str("rolled_up_source").unwrap_or(&rollup.source);
        self.journal.has_raw_day(&date, source)
    }

    fn note_last_seen(&mut self, event: &Event) {
        self.cursor
            .last_seen_event_id_by_source
            .insert(event.source.clone(), event.event_id.clone());
        let entry = self
            .cursor
            .last_seen_timestamp_by_source
            .entry(event.source.clone())
            .or_default();
        // RFC 3339 UTC strings sort chronologically; keep the newest.
        if event.timestamp.as_str() > entry.as_str() {
            *entry = event.timestamp.clone();
        }
    }

    fn classify_failure(&mut self, err: TransportError) -> SyncReport {
        let text = err.to_string();
        match classify(&err) {
            FailureKind::AuthMissing => self.pause_with(SyncStatus::AuthMissing, text),
            FailureKind::AuthFail => self.pause_with(SyncStatus::AuthFail, text),
            FailureKind::RateLimited => self.back_off(SyncStatus::RateLimited, text),
            FailureKind::Offline => self.back_off(SyncStatus::Offline, text),
            FailureKind::Transient => {
                let next = self.retry_count + 1;
                self.back_off(SyncStatus::Retrying(next), text)
            }
        }
    }

    /// Auth failures stop automatic retries entirely; hammering a broken
    /// credential helps nobody. A forced call re-attempts.
    fn pause_with(&mut self, status: SyncStatus, reason: String) -> SyncReport {
        warn!(%status, "sync paused: {reason}");
        self.paused = true;
        self.paused_reason = reason.clone();
        self.status = status;
        let mut report = SyncReport::status_only(status);
        report.error = Some(reason);
        report
    }

    fn back_off(&mut self, status: SyncStatus, reason: String) -> SyncReport {
        self.retry_count += 1;
        let delay = backoff_secs(self.retry_count);
        self.next_retry_at = Some(Instant::now() + Duration::from_secs(delay));
        self.status = status;
        debug!(%status, retry_in = delay, "sync failed, backing off: {reason}");
        let mut report = SyncReport::status_only(status);
        report.retry_in_seconds = Some(delay);
        report.error = Some(reason);
        report
    }

    fn reset_backoff(&mut self) {
        self.retry_count = 0;
        self.next_retry_at = None;
    }

    /// Whole seconds left in the current backoff window, if one is active.
    fn backoff_remaining(&self) -> Option<u64> {
        let at = self.next_retry_at?;
        let now = Instant::now();
        if now >= at {
            return None;
        }
        let remaining = at - now;
        Some(remaining.as_secs().max(1))
    }
}

fn backoff_secs(retry_count: u32) -> u64 {
    let exp = retry_count.min(BACKOFF_EXP_MAX);
    BACKOFF_CAP_SECS.min(1u64 << exp)
}
