//! Daily aggregates derived from the journal.
//!
//! Rollup events produced by compaction contribute their pre-aggregated
//! counters, so a compacted day summarizes identically to the raw day it
//! replaced. Compaction correctness is defined against this function.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::Duration;

use super::event::{parse_day, today_utc, utc_now_rfc3339, Event};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DayCounters {
    pub focus_seconds: u64,
    pub ticks: u64,
    pub mode_changes: u64,
    pub clicks: u64,
    pub manual_pings: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaySummary {
    pub date: String,
    #[serde(flatten)]
    pub counters: DayCounters,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub generated_at: String,
    pub days: Vec<DaySummary>,
    pub current_streak_days: u32,
}

impl Summary {
    pub fn day(&self, date: &str) -> Option<&DaySummary> {
        self.days.iter().find(|d| d.date == date)
    }
}

/// Fold events into per-day counters, chronologically sorted.
pub fn summarize(events: &[Event]) -> Summary {
    let mut by_day: BTreeMap<String, DayCounters> = BTreeMap::new();

    for event in events {
        if event.is_rollup() {
            // A rollup stands in for an entire day; its own timestamp is
            // synthetic, so the covered date comes from the payload.
            let date = event
                .payload_str("date")
                .map(str::to_string)
                .unwrap_or_else(|| event.day_string());
            let bucket = by_day.entry(date).or_default();
            bucket.focus_seconds += event.payload_u64("focus_seconds").unwrap_or(0);
            bucket.ticks += event.payload_u64("ticks").unwrap_or(0);
            bucket.mode_changes += event.payload_u64("mode_changes").unwrap_or(0);
            bucket.clicks += event.payload_u64("clicks").unwrap_or(0);
            bucket.manual_pings += event.payload_u64("manual_pings").unwrap_or(0);
            continue;
        }

        let bucket = by_day.entry(event.day_string()).or_default();
        match event.event_type.as_str() {
            "state_tick" => {
                bucket.ticks += 1;
                if event.payload_str("mode") == Some("study") {
                    bucket.focus_seconds += event.payload_u64("tick_seconds").unwrap_or(60);
                }
            }
            "mode_change" => bucket.mode_changes += 1,
            "click" => bucket.clicks += 1,
            "manual_ping" => bucket.manual_pings += 1,
            _ => {}
        }
    }

    let days: Vec<DaySummary> = by_day
        .into_iter()
        .map(|(date, counters)| DaySummary { date, counters })
        .collect();

    let current_streak_days = streak(&days);

    Summary {
        generated_at: utc_now_rfc3339(),
        days,
        current_streak_days,
    }
}

/// Consecutive focus-active days ending at the most recent active day.
fn streak(days: &[DaySummary]) -> u32 {
    let active: Vec<_> = days
        .iter()
        .filter(|d| d.counters.focus_seconds > 0)
        .filter_map(|d| parse_day(&d.date))
        .collect();
    let Some(mut day) = active.iter().max().copied() else {
        return 0;
    };

    let mut streak = 0u32;
    while active.contains(&day) {
        streak += 1;
        let Some(prev) = day.checked_sub(Duration::days(1)) else {
            break;
        };
        day = prev;
    }
    streak
}
