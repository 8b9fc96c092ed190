//! End-to-end replication between peers over a shared directory.

use std::path::Path;
use std::time::Duration;

use serde_json::{Map, Value};

use driftlog::core::{format_day, manual_ping_event, today_utc};
use driftlog::{
    summarize, CursorStore, DirTransport, Event, JobResult, Journal, SyncEngine, SyncStatus,
    WorkerHandle,
};

fn peer(root: &Path, shared: &Path, id: &str) -> SyncEngine {
    let journal = Journal::open(root.join(id).join("journal.jsonl"), 30, false);
    let transport = DirTransport::new(shared, id);
    let cursor_store = CursorStore::new(root.join(id).join("sync_cursor.json"));
    SyncEngine::new(id, journal, Some(Box::new(transport)), Some(cursor_store))
}

fn publish(engine: &mut SyncEngine, event: &Event) {
    engine.record_local_event(event).expect("record");
    assert!(engine.publish_local_event(event).expect("publish"));
}

#[test]
fn published_event_is_imported_exactly_once() {
    let root = tempfile::tempdir().expect("tempdir");
    let shared = root.path().join("shared");
    let mut a = peer(root.path(), &shared, "peer-a");
    let mut b = peer(root.path(), &shared, "peer-b");

    let e1 = manual_ping_event("hello", "peer-a");
    publish(&mut a, &e1);

    let report = b.sync_once(false).expect("sync");
    assert_eq!(report.status, SyncStatus::Ok);
    assert_eq!(report.imported(), 1);
    assert_eq!(report.imported_events[0].event_id, e1.event_id);

    let report = b.sync_once(false).expect("resync");
    assert_eq!(report.imported(), 0);
}

#[test]
fn restart_resumes_from_persisted_cursor() {
    let root = tempfile::tempdir().expect("tempdir");
    let shared = root.path().join("shared");
    let mut a = peer(root.path(), &shared, "peer-a");

    let e1 = manual_ping_event("one", "peer-a");
    publish(&mut a, &e1);
    {
        let mut b = peer(root.path(), &shared, "peer-b");
        assert_eq!(b.sync_once(false).expect("sync").imported(), 1);
    }

    let e2 = manual_ping_event("two", "peer-a");
    publish(&mut a, &e2);

    let mut b = peer(root.path(), &shared, "peer-b");
    assert_eq!(
        b.cursor().file_cursors.get("peer-a.jsonl"),
        Some(&1),
        "cursor should survive restart"
    );
    let report = b.sync_once(false).expect("sync after restart");
    assert_eq!(report.imported(), 1);
    assert_eq!(report.imported_events[0].event_id, e2.event_id);
    assert_eq!(b.journal_mut().load_all().len(), 2);
}

#[test]
fn relayed_self_authored_events_are_never_imported() {
    let root = tempfile::tempdir().expect("tempdir");
    let shared = root.path().join("shared");
    let mut a = peer(root.path(), &shared, "peer-a");
    let mut b = peer(root.path(), &shared, "peer-b");

    // An event authored by a comes back through b's channel.
    let echoed = manual_ping_event("echo", "peer-a");
    publish(&mut b, &echoed);

    let report = a.sync_once(false).expect("sync");
    assert_eq!(report.received, 1);
    assert_eq!(report.imported(), 0);
    assert!(a.journal_mut().load_all().is_empty());
}

fn rollup_for(date: &str, covered_source: &str, focus_seconds: u64) -> Event {
    let mut payload = Map::new();
    payload.insert("date".to_string(), Value::from(date));
    payload.insert("focus_seconds".to_string(), Value::from(focus_seconds));
    payload.insert("ticks".to_string(), Value::from(1u64));
    payload.insert("mode_changes".to_string(), Value::from(0u64));
    payload.insert("clicks".to_string(), Value::from(0u64));
    payload.insert("manual_pings".to_string(), Value::from(0u64));
    payload.insert("rolled_up_event_count".to_string(), Value::from(1u64));
    payload.insert("rolled_up_from_dates".to_string(), Value::from(vec![date]));
    payload.insert("rolled_up_source".to_string(), Value::from(covered_source));
    payload.insert("compaction_version".to_string(), Value::from("v1"));
    Event {
        event_type: "daily_rollup".to_string(),
        timestamp: format!("{date}T23:59:59+00:00"),
        event_id: format!("rollup-{date}"),
        source: "driftlog_rollup".to_string(),
        schema_version: "v1.2".to_string(),
        payload,
    }
}

#[test]
fn rollup_covering_local_raw_day_is_skipped() {
    let root = tempfile::tempdir().expect("tempdir");
    let shared = root.path().join("shared");
    let mut a = peer(root.path(), &shared, "peer-a");
    let mut b = peer(root.path(), &shared, "peer-b");

    // b already holds raw events for today; a's rollup covering the same
    // (day, source) pair must not double-count them.
    let raw = manual_ping_event("raw", "peer-b");
    b.record_local_event(&raw).expect("record raw");
    let before = summarize(&b.journal_mut().load_all());

    let today = format_day(today_utc());
    let rollup = rollup_for(&today, "peer-b", 600);
    publish(&mut a, &rollup);

    let report = b.sync_once(false).expect("sync");
    assert_eq!(report.received, 1);
    assert_eq!(report.imported(), 0);
    assert_eq!(summarize(&b.journal_mut().load_all()).days, before.days);

    // The skip is remembered; a later pass does not reconsider it.
    let report = b.sync_once(false).expect("resync");
    assert_eq!(report.imported(), 0);
}

#[test]
fn legacy_flat_cursor_file_still_resumes() {
    let root = tempfile::tempdir().expect("tempdir");
    let shared = root.path().join("shared");
    let mut a = peer(root.path(), &shared, "peer-a");

    let e1 = manual_ping_event("one", "peer-a");
    let e2 = manual_ping_event("two", "peer-a");
    publish(&mut a, &e1);
    publish(&mut a, &e2);

    // Cursor written by an older build: a flat filename-to-offset object.
    let b_dir = root.path().join("peer-b");
    std::fs::create_dir_all(&b_dir).expect("mkdir");
    std::fs::write(b_dir.join("sync_cursor.json"), r#"{"peer-a.jsonl": 1}"#).expect("write");

    let mut b = peer(root.path(), &shared, "peer-b");
    let report = b.sync_once(false).expect("sync");
    assert_eq!(report.imported(), 1);
    assert_eq!(report.imported_events[0].event_id, e2.event_id);
}

#[test]
fn worker_published_event_reaches_the_other_peer() {
    let root = tempfile::tempdir().expect("tempdir");
    let shared = root.path().join("shared");
    let a = peer(root.path(), &shared, "peer-a");
    let mut b = peer(root.path(), &shared, "peer-b");

    let handle = WorkerHandle::spawn(a, None);
    let event = manual_ping_event("via worker", "peer-a");
    handle.publish(event.clone()).expect("queue publish");

    match handle.recv_result(Duration::from_secs(5)).expect("result") {
        JobResult::Published { event_id, sent } => {
            assert_eq!(event_id, event.event_id);
            assert!(sent);
        }
        other => panic!("expected publish result, got {other:?}"),
    }
    handle.shutdown();

    let report = b.sync_once(false).expect("sync");
    assert_eq!(report.imported(), 1);
    assert_eq!(report.imported_events[0].event_id, event.event_id);
}
