//! Local durable append-only store of events, sharded by UTC day.
//!
//! One `YYYY-MM-DD.jsonl` file per calendar day, plus an optional legacy
//! single-file store kept readable for old installations. Appends are
//! idempotent: an in-memory id set, seeded by a full scan at construction,
//! rejects events the journal has already seen. The same scan seeds the
//! raw-day set the sync engine consults when deciding whether an incoming
//! rollup is already covered by local raw events. The warm-up scan is
//! O(total historical events); retention pruning keeps that bounded.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

use crate::core::event::event_from_value;
use crate::core::{format_day, parse_day, today_utc, Event};

const SHARD_EXT: &str = "jsonl";

#[derive(Error, Debug)]
pub enum JournalError {
    #[error("journal io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Counters from the most recent `load_all`, for health reporting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReadStats {
    pub bad_lines_skipped: u64,
}

pub struct Journal {
    dir: PathBuf,
    legacy_path: Option<PathBuf>,
    retention_days: u32,
    fsync: bool,
    known_ids: HashSet<String>,
    raw_days: HashSet<(String, String)>,
    last_read: ReadStats,
}

impl Journal {
    /// Open a journal rooted at `path`.
    ///
    /// A `.jsonl` path selects backward-compatible mode: that file is read
    /// as the legacy store and day shards live in a sibling directory named
    /// after its stem. Any other path is used as the shard directory itself.
    ///
    /// Construction scans every shard to seed the dedup set; unreadable
    /// files are logged and treated as empty.
    pub fn open(path: impl Into<PathBuf>, retention_days: u32, fsync: bool) -> Self {
        let raw: PathBuf = path.into();
        let (dir, legacy_path) = if raw.extension().and_then(|e| e.to_str()) == Some(SHARD_EXT) {
            let stem = raw
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("journal")
                .to_string();
            let parent = raw.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
            (parent.join(stem), Some(raw))
        } else {
            (raw, None)
        };

        let mut journal = Self {
            dir,
            legacy_path,
            retention_days: retention_days.max(1),
            fsync,
            known_ids: HashSet::new(),
            raw_days: HashSet::new(),
            last_read: ReadStats::default(),
        };
        journal.load_all();
        journal
    }

    /// Shard directory; the compactor rewrites files here.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn contains(&self, event_id: &str) -> bool {
        !event_id.is_empty() && self.known_ids.contains(event_id)
    }

    /// True when raw (non-rollup) events from `source` exist for `date`.
    pub fn has_raw_day(&self, date: &str, source: &str) -> bool {
        self.raw_days.contains(&(date.to_string(), source.to_string()))
    }

    /// Append one event to its day shard.
    ///
    /// Returns `Ok(false)` without writing when the id was already seen.
    /// Write failures propagate; retention pruning failures only warn.
    pub fn append(&mut self, event: &Event) -> Result<bool, JournalError> {
        if self.contains(&event.event_id) {
            return Ok(false);
        }

        fs::create_dir_all(&self.dir)?;
        let shard = self.dir.join(format!("{}.{SHARD_EXT}", event.day_string()));
        let line = serde_json::to_string(event)?;

        let mut file = OpenOptions::new().create(true).append(true).open(&shard)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        if self.fsync {
            file.sync_data()?;
        }

        if !event.event_id.is_empty() {
            self.known_ids.insert(event.event_id.clone());
        }
        self.note_raw_day(event);
        self.prune_old_shards();
        Ok(true)
    }

    /// Read every event, day shards first (chronological by filename) then
    /// the legacy store, deduplicated by id with first occurrence winning.
    /// Malformed lines are skipped and counted; I/O errors log and yield an
    /// empty file, never an aborted read.
    pub fn load_all(&mut self) -> Vec<Event> {
        self.last_read = ReadStats::default();

        let mut paths: Vec<PathBuf> = Vec::new();
        match fs::read_dir(&self.dir) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path.extension().and_then(|e| e.to_str()) == Some(SHARD_EXT) {
                        paths.push(path);
                    }
                }
                paths.sort();
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(dir = %self.dir.display(), "journal dir unreadable: {e}"),
        }
        if let Some(legacy) = &self.legacy_path {
            if legacy.exists() {
                paths.push(legacy.clone());
            }
        }

        let mut seen: HashSet<String> = HashSet::new();
        let mut events: Vec<Event> = Vec::new();
        for path in paths {
            for event in self.read_file(&path) {
                if !event.event_id.is_empty() {
                    if !seen.insert(event.event_id.clone()) {
                        continue;
                    }
                    self.known_ids.insert(event.event_id.clone());
                }
                self.note_raw_day(&event);
                events.push(event);
            }
        }
        events
    }

    /// Counters from the most recent `load_all`.
    pub fn last_read_stats(&self) -> ReadStats {
        self.last_read
    }

    fn note_raw_day(&mut self, event: &Event) {
        if !event.is_rollup() {
            self.raw_days.insert((event.day_string(), event.source.clone()));
        }
    }

    fn read_file(&mut self, path: &Path) -> Vec<Event> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                warn!(file = %path.display(), "journal shard unreadable, treating as empty: {e}");
                return Vec::new();
            }
        };

        let mut events = Vec::new();
        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let parsed = serde_json::from_str::<serde_json::Value>(line)
                .ok()
                .as_ref()
                .and_then(event_from_value);
            match parsed {
                Some(event) => events.push(event),
                None => {
                    self.last_read.bad_lines_skipped += 1;
                    warn!(file = %path.display(), "skipping malformed journal line");
                }
            }
        }
        events
    }

    /// Delete day shards older than `today - retention_days + 1`.
    fn prune_old_shards(&self) {
        let Some(cutoff) = today_utc().checked_sub(time::Duration::days(i64::from(self.retention_days) - 1))
        else {
            return;
        };

        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SHARD_EXT) {
                continue;
            }
            let Some(day) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(parse_day)
            else {
                continue;
            };
            if day < cutoff {
                if let Err(e) = fs::remove_file(&path) {
                    warn!(file = %path.display(), "failed to prune expired shard: {e}");
                }
            }
        }
    }
}

/// Shard filename for a given day, used by tests and the compactor.
pub fn shard_name(day: time::Date) -> String {
    format!("{}.{SHARD_EXT}", format_day(day))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use time::Duration;

    use super::*;
    use crate::core::{manual_ping_event, today_utc};

    fn journal_in(dir: &Path) -> Journal {
        Journal::open(dir.join("journal.jsonl"), 30, false)
    }

    #[test]
    fn append_is_idempotent_per_event_id() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut journal = journal_in(dir.path());

        let event = manual_ping_event("hello", "cornelius");
        assert!(journal.append(&event).expect("first append"));
        assert!(!journal.append(&event).expect("second append"));

        let events = journal.load_all();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_id, event.event_id);
    }

    #[test]
    fn warmup_scan_seeds_dedup_and_raw_day_sets() {
        let dir = tempfile::tempdir().expect("tempdir");
        let event = manual_ping_event("seeded", "cornelius");
        let shard_dir = dir.path().join("journal");
        fs::create_dir_all(&shard_dir).expect("mkdir");
        fs::write(
            shard_dir.join(shard_name(event.day())),
            format!("{}\n", serde_json::to_string(&event).unwrap()),
        )
        .expect("write shard");

        // Opening alone must seed both sets; no extra load_all needed.
        let journal = journal_in(dir.path());
        assert!(journal.contains(&event.event_id));
        assert!(journal.has_raw_day(&event.day_string(), "cornelius"));
        assert!(!journal.has_raw_day(&event.day_string(), "someone-else"));
    }

    #[test]
    fn dedup_set_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let event = manual_ping_event("hello", "cornelius");
        {
            let mut journal = journal_in(dir.path());
            journal.append(&event).expect("append");
        }
        let mut reopened = journal_in(dir.path());
        assert!(!reopened.append(&event).expect("append after reopen"));
        assert_eq!(reopened.load_all().len(), 1);
    }

    #[test]
    fn malformed_lines_are_skipped_and_counted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut journal = journal_in(dir.path());
        let event = manual_ping_event("ok", "cornelius");
        journal.append(&event).expect("append");

        let shard = dir.path().join("journal").join(shard_name(event.day()));
        let mut text = fs::read_to_string(&shard).expect("read shard");
        text.push_str("{this is not json\n");
        fs::write(&shard, text).expect("write shard");

        let events = journal.load_all();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_id, event.event_id);
        assert_eq!(journal.last_read_stats().bad_lines_skipped, 1);
    }

    #[test]
    fn legacy_single_file_is_still_read() {
        let dir = tempfile::tempdir().expect("tempdir");
        let legacy = dir.path().join("journal.jsonl");
        let event = manual_ping_event("old", "cornelius");
        fs::write(&legacy, format!("{}\n", serde_json::to_string(&event).unwrap())).expect("write legacy");

        let mut journal = journal_in(dir.path());
        let events = journal.load_all();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_id, event.event_id);

        // Already known, so a re-append of the same id is refused.
        assert!(!journal.append(&event).expect("append"));
    }

    #[test]
    fn day_shards_are_chronological_and_deduplicated_across_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut journal = journal_in(dir.path());

        let mut early = manual_ping_event("early", "cornelius");
        early.timestamp = format!("{}T08:00:00+00:00", crate::core::format_day(today_utc() - Duration::days(1)));
        let late = manual_ping_event("late", "cornelius");

        journal.append(&late).expect("append late");
        journal.append(&early).expect("append early");

        let events = journal.load_all();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_id, early.event_id);
        assert_eq!(events[1].event_id, late.event_id);
    }

    #[test]
    fn retention_prunes_only_expired_shards() {
        let dir = tempfile::tempdir().expect("tempdir");
        let retention = 5u32;
        let mut journal = Journal::open(dir.path().join("journal.jsonl"), retention, false);

        for n in (0..=retention).rev() {
            let day = today_utc() - Duration::days(i64::from(n));
            let mut event = manual_ping_event(&format!("day-{n}"), "cornelius");
            event.timestamp = format!("{}T09:00:00+00:00", crate::core::format_day(day));
            journal.append(&event).expect("append");
        }

        let shard_dir = dir.path().join("journal");
        let mut remaining: Vec<String> = fs::read_dir(&shard_dir)
            .expect("read shard dir")
            .flatten()
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        remaining.sort();

        let expected: Vec<String> = (0..retention)
            .rev()
            .map(|n| shard_name(today_utc() - Duration::days(i64::from(n))))
            .collect();
        assert_eq!(remaining, expected);
    }

    #[test]
    fn fsync_mode_appends_and_loads() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut journal = Journal::open(dir.path().join("journal.jsonl"), 30, true);
        let event = manual_ping_event("durable", "cornelius");
        assert!(journal.append(&event).expect("append"));
        assert_eq!(journal.load_all().len(), 1);
    }
}
