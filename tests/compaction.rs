//! Compaction working together with replication and summaries.

use std::path::Path;

use driftlog::core::{format_day, manual_ping_event, mode_change_event, today_utc};
use driftlog::{
    compact_journal_dir, summarize, CursorStore, DirTransport, Event, Journal, SyncEngine,
};
use time::Duration;

fn aged(mut event: Event, day: time::Date) -> Event {
    event.timestamp = format!("{}T09:00:00+00:00", format_day(day));
    event
}

fn peer(root: &Path, shared: &Path, id: &str) -> SyncEngine {
    let journal = Journal::open(root.join(id).join("journal.jsonl"), 30, false);
    let transport = DirTransport::new(shared, id);
    let cursor_store = CursorStore::new(root.join(id).join("sync_cursor.json"));
    SyncEngine::new(id, journal, Some(Box::new(transport)), Some(cursor_store))
}

#[test]
fn summaries_survive_a_compaction_cycle() {
    let root = tempfile::tempdir().expect("tempdir");
    let journal_dir = root.path().join("journal");
    let old_day = today_utc() - Duration::days(5);

    let mut journal = Journal::open(root.path().join("journal.jsonl"), 30, false);
    journal
        .append(&aged(mode_change_event("study", "peer-a"), old_day))
        .expect("append");
    journal
        .append(&aged(manual_ping_event("old", "peer-a"), old_day))
        .expect("append");
    journal
        .append(&manual_ping_event("fresh", "peer-a"))
        .expect("append");
    let before = summarize(&journal.load_all());

    let report = compact_journal_dir(&journal_dir, 1, false).expect("compact");
    assert_eq!(report.compacted_days, 1);
    assert_eq!(report.saved_lines, 1);

    // Reload from disk; the folded journal produces identical aggregates.
    let mut reopened = Journal::open(root.path().join("journal.jsonl"), 30, false);
    let after = summarize(&reopened.load_all());
    assert_eq!(before.days, after.days);
}

#[test]
fn replicated_rollup_carries_the_day_to_a_fresh_peer() {
    let root = tempfile::tempdir().expect("tempdir");
    let shared = root.path().join("shared");
    let old_day = today_utc() - Duration::days(4);
    let old_day_str = format_day(old_day);

    let mut a = peer(root.path(), &shared, "peer-a");
    a.record_local_event(&aged(manual_ping_event("one", "peer-a"), old_day))
        .expect("record");
    a.record_local_event(&aged(manual_ping_event("two", "peer-a"), old_day))
        .expect("record");

    let report = compact_journal_dir(&root.path().join("peer-a").join("journal"), 1, false)
        .expect("compact");
    assert_eq!(report.compacted_days, 1);

    let rollup = a
        .journal_mut()
        .load_all()
        .into_iter()
        .find(Event::is_rollup)
        .expect("rollup in journal");
    assert!(a.publish_local_event(&rollup).expect("publish rollup"));

    // b never saw the raw events, so the rollup is imported and counted.
    let mut b = peer(root.path(), &shared, "peer-b");
    let report = b.sync_once(false).expect("sync");
    assert_eq!(report.imported(), 1);

    let summary = summarize(&b.journal_mut().load_all());
    let day = summary.day(&old_day_str).expect("rolled-up day present");
    assert_eq!(day.counters.manual_pings, 2);
}

#[test]
fn second_compaction_pass_changes_nothing() {
    let root = tempfile::tempdir().expect("tempdir");
    let old_day = today_utc() - Duration::days(8);

    let mut journal = Journal::open(root.path().join("journal.jsonl"), 30, false);
    journal
        .append(&aged(manual_ping_event("a", "peer-a"), old_day))
        .expect("append");

    let journal_dir = root.path().join("journal");
    compact_journal_dir(&journal_dir, 1, false).expect("first pass");
    let shard = journal_dir.join(format!("{}.jsonl", format_day(old_day)));
    let first = std::fs::read(&shard).expect("read shard");

    let report = compact_journal_dir(&journal_dir, 1, false).expect("second pass");
    assert_eq!(report.compacted_days, 0);
    assert_eq!(report.saved_lines, 0);
    assert_eq!(std::fs::read(&shard).expect("read shard"), first);
}
