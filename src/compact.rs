//! Day-shard compaction.
//!
//! Shards older than the keep window are rewritten as a single rollup
//! event carrying the day's aggregate counters. Summaries computed over
//! the journal are identical before and after, and re-running compaction
//! is a no-op on already-folded days.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::core::event::event_from_value;
use crate::core::{format_day, parse_day, summarize, today_utc, DayCounters, Event, ROLLUP_EVENT_TYPE};

/// Bumped when the rollup payload shape changes; the idempotence guard
/// only trusts rollups written by the current format.
pub const COMPACTION_VERSION: &str = "v1";

/// `source` stamped on synthetic rollup events.
pub const ROLLUP_SOURCE: &str = "driftlog_rollup";

const SHARD_EXT: &str = "jsonl";

#[derive(Error, Debug)]
pub enum CompactError {
    #[error("compaction io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode rollup: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to persist compacted shard {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: tempfile::PersistError,
    },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CompactionReport {
    pub scanned_days: u64,
    pub compacted_days: u64,
    pub saved_lines: u64,
}

/// Fold every day shard older than `today - keep_days + 1` into one rollup.
///
/// `dry_run` reports what would happen without rewriting anything. Reads
/// never fail the pass (an unreadable shard is skipped); the atomic rewrite
/// of a shard propagates errors and leaves the original intact on failure.
pub fn compact_journal_dir(
    journal_dir: &Path,
    keep_days: u32,
    dry_run: bool,
) -> Result<CompactionReport, CompactError> {
    let mut report = CompactionReport::default();
    if !journal_dir.exists() {
        return Ok(report);
    }

    let Some(cutoff) = today_utc().checked_sub(time::Duration::days(i64::from(keep_days.max(1)) - 1))
    else {
        return Ok(report);
    };

    let mut shards: Vec<(time::Date, PathBuf)> = fs::read_dir(journal_dir)?
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SHARD_EXT) {
                return None;
            }
            let day = path.file_stem().and_then(|s| s.to_str()).and_then(parse_day)?;
            Some((day, path))
        })
        .collect();
    shards.sort();

    for (day, path) in shards {
        if day >= cutoff {
            continue;
        }
        report.scanned_days += 1;

        let events = read_shard(&path);
        if events.is_empty() {
            continue;
        }
        let day_str = format_day(day);
        if is_already_compacted(&day_str, &events) {
            continue;
        }

        let rollup = rollup_event_for_day(&day_str, &events);
        if !dry_run {
            write_single_event(&path, &rollup)?;
            info!(day = %day_str, folded = events.len(), "compacted day shard");
        }
        report.compacted_days += 1;
        report.saved_lines += (events.len() as u64).saturating_sub(1);
    }

    Ok(report)
}

fn read_shard(path: &Path) -> Vec<Event> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            warn!(file = %path.display(), "shard unreadable, skipping compaction: {e}");
            return Vec::new();
        }
    };
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            serde_json::from_str::<Value>(line)
                .ok()
                .as_ref()
                .and_then(event_from_value)
        })
        .collect()
}

/// Build the rollup standing in for `day`'s events.
///
/// `rolled_up_source` is the single distinct source, or `"mixed"`; the
/// receiving side's skip rule is keyed on `(date, rolled_up_source)`.
fn rollup_event_for_day(day: &str, events: &[Event]) -> Event {
    let summary = summarize(events);
    let counters = summary
        .day(day)
        .map(|d| d.counters)
        .unwrap_or_else(DayCounters::default);

    let mut sources: Vec<&str> = events
        .iter()
        .map(|e| e.source.as_str())
        .filter(|s| !s.is_empty())
        .collect();
    sources.sort_unstable();
    sources.dedup();
    let rolled_up_source = match sources.as_slice() {
        [single] => (*single).to_string(),
        _ => "mixed".to_string(),
    };

    let mut payload = Map::new();
    payload.insert("date".to_string(), Value::from(day));
    payload.insert("focus_seconds".to_string(), Value::from(counters.focus_seconds));
    payload.insert("ticks".to_string(), Value::from(counters.ticks));
    payload.insert("mode_changes".to_string(), Value::from(counters.mode_changes));
    payload.insert("clicks".to_string(), Value::from(counters.clicks));
    payload.insert("manual_pings".to_string(), Value::from(counters.manual_pings));
    payload.insert("rolled_up_event_count".to_string(), Value::from(events.len()));
    payload.insert("rolled_up_from_dates".to_string(), Value::from(vec![day]));
    payload.insert("rolled_up_source".to_string(), Value::from(rolled_up_source));
    payload.insert("rollup_version".to_string(), Value::from(COMPACTION_VERSION));
    payload.insert("compaction_version".to_string(), Value::from(COMPACTION_VERSION));

    Event {
        event_type: ROLLUP_EVENT_TYPE.to_string(),
        timestamp: format!("{day}T23:59:59+00:00"),
        // Deterministic id: compacting the same day twice, or on two peers,
        // yields the same record and dedup does the rest.
        event_id: format!("rollup-{day}"),
        source: ROLLUP_SOURCE.to_string(),
        schema_version: "v1.2".to_string(),
        payload,
    }
}

fn is_already_compacted(day: &str, events: &[Event]) -> bool {
    let [event] = events else {
        return false;
    };
    if !event.is_rollup() {
        return false;
    }
    if event.payload_str("compaction_version") != Some(COMPACTION_VERSION) {
        return false;
    }
    event
        .payload
        .get("rolled_up_from_dates")
        .and_then(Value::as_array)
        .is_some_and(|dates| dates.iter().any(|d| d.as_str() == Some(day)))
}

fn write_single_event(path: &Path, event: &Event) -> Result<(), CompactError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut line = serde_json::to_string(event)?;
    line.push('\n');

    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(line.as_bytes())?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| CompactError::Persist {
        path: path.to_owned(),
        source: e,
    })?;
    Ok(())
}
