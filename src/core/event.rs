//! The immutable event record shared by every component.
//!
//! Events are minted once on the producing peer and never mutated after
//! that; replication and compaction only ever copy or fold whole records.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::format_description::well_known::Rfc3339;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

/// Schema version stamped on newly minted events.
pub const SCHEMA_VERSION_DEFAULT: &str = "v1.1";

/// Newest schema version the decoder understands. Unknown versions are
/// coerced to this rather than rejected.
pub const SCHEMA_VERSION_NEWEST: &str = "v1.2";

/// All schema versions the decoder accepts as-is.
pub const SCHEMA_VERSIONS: [&str; 3] = ["v1", "v1.1", "v1.2"];

/// Event type of synthetic compaction rollups.
pub const ROLLUP_EVENT_TYPE: &str = "daily_rollup";

/// Day-shard filenames and rollup payload dates use this format.
pub const DAY_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_type: String,
    /// RFC 3339 wall-clock time. Used for day bucketing only; no total
    /// order across peers is assumed.
    pub timestamp: String,
    /// Globally unique, immutable once minted.
    pub event_id: String,
    /// Identifier of the minting peer.
    pub source: String,
    pub schema_version: String,
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl Event {
    /// Mint a new local event with a fresh id and the current UTC time.
    pub fn new(event_type: impl Into<String>, source: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: utc_now_rfc3339(),
            event_id: Uuid::new_v4().simple().to_string(),
            source: source.into(),
            schema_version: SCHEMA_VERSION_DEFAULT.to_string(),
            payload,
        }
    }

    /// UTC calendar day this event belongs to. Unparseable timestamps fall
    /// back to today so a bad clock string never loses an event.
    pub fn day(&self) -> Date {
        OffsetDateTime::parse(&self.timestamp, &Rfc3339)
            .map(|dt| dt.to_offset(time::UtcOffset::UTC).date())
            .unwrap_or_else(|_| today_utc())
    }

    /// `day()` rendered as `YYYY-MM-DD`.
    pub fn day_string(&self) -> String {
        format_day(self.day())
    }

    pub fn is_rollup(&self) -> bool {
        self.event_type == ROLLUP_EVENT_TYPE
    }

    /// String field from the payload, if present and non-empty.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
    }

    /// Integer field from the payload, tolerating numeric strings.
    pub fn payload_u64(&self, key: &str) -> Option<u64> {
        match self.payload.get(key)? {
            Value::Number(n) => n.as_u64().or_else(|| n.as_i64().filter(|v| *v >= 0).map(|v| v as u64)),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

/// `state_tick` carries a snapshot of the producing peer's state plus the
/// tick length, so focus time can be derived without replaying timers.
pub fn state_tick_event(state: Map<String, Value>, tick_seconds: u64, source: &str) -> Event {
    let mut payload = state;
    payload.insert("tick_seconds".to_string(), Value::from(tick_seconds));
    Event::new("state_tick", source, payload)
}

pub fn mode_change_event(mode: &str, source: &str) -> Event {
    let mut payload = Map::new();
    payload.insert("mode".to_string(), Value::from(mode));
    Event::new("mode_change", source, payload)
}

pub fn click_event(source: &str) -> Event {
    Event::new("click", source, Map::new())
}

pub fn manual_ping_event(message: &str, source: &str) -> Event {
    let mut payload = Map::new();
    payload.insert("message".to_string(), Value::from(message));
    Event::new("manual_ping", source, payload)
}

/// Decode an event from loose JSON, defaulting absent fields the way old
/// producers left them. Non-object values are rejected; callers count those
/// as malformed.
pub fn event_from_value(value: &Value) -> Option<Event> {
    let obj = value.as_object()?;
    let field = |key: &str| {
        obj.get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    Some(Event {
        event_type: field("event_type").unwrap_or_else(|| "unknown".to_string()),
        timestamp: field("timestamp").unwrap_or_default(),
        event_id: field("event_id").unwrap_or_default(),
        source: field("source").unwrap_or_else(|| "unknown".to_string()),
        schema_version: field("schema_version").unwrap_or_else(|| "v1".to_string()),
        payload: obj
            .get("payload")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default(),
    })
}

pub fn utc_now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| String::new())
}

pub fn today_utc() -> Date {
    OffsetDateTime::now_utc().date()
}

pub fn format_day(day: Date) -> String {
    day.format(DAY_FORMAT).unwrap_or_else(|_| day.to_string())
}

pub fn parse_day(s: &str) -> Option<Date> {
    Date::parse(s, DAY_FORMAT).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_events_have_fresh_ids() {
        let a = click_event("cornelius");
        let b = click_event("cornelius");
        assert_ne!(a.event_id, b.event_id);
        assert_eq!(a.schema_version, SCHEMA_VERSION_DEFAULT);
        assert_eq!(a.source, "cornelius");
    }

    #[test]
    fn day_bucketing_uses_utc_date() {
        let mut event = manual_ping_event("x", "cornelius");
        event.timestamp = "2026-03-01T23:30:00+00:00".to_string();
        assert_eq!(event.day_string(), "2026-03-01");

        // Offset timestamps normalize to UTC before bucketing.
        event.timestamp = "2026-03-02T01:30:00+02:00".to_string();
        assert_eq!(event.day_string(), "2026-03-01");
    }

    #[test]
    fn bad_timestamp_falls_back_to_today() {
        let mut event = click_event("cornelius");
        event.timestamp = "not a timestamp".to_string();
        assert_eq!(event.day(), today_utc());
    }

    #[test]
    fn payload_u64_tolerates_strings() {
        let mut event = click_event("cornelius");
        event.payload.insert("n".to_string(), serde_json::Value::from("42"));
        assert_eq!(event.payload_u64("n"), Some(42));
        event.payload.insert("n".to_string(), serde_json::Value::from(7));
        assert_eq!(event.payload_u64("n"), Some(7));
        assert_eq!(event.payload_u64("missing"), None);
    }

    #[test]
    fn day_format_roundtrip() {
        let day = parse_day("2026-08-27").expect("parse");
        assert_eq!(format_day(day), "2026-08-27");
        assert!(parse_day("garbage").is_none());
    }
}
