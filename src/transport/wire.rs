//! Wire envelope codec.
//!
//! Every published event travels as one JSON line. The envelope duplicates
//! `event_id`/`source`/`schema_version` at the top level so a receiver can
//! route without digging into the body, and the decoder tolerates envelopes
//! from older peers that only carried the flat form.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::event::event_from_value;
use crate::core::{Event, SCHEMA_VERSIONS, SCHEMA_VERSION_NEWEST};

/// Envelope format version stamped on outgoing payloads.
pub const WIRE_VERSION: &str = "v1.1";

/// Broadcast receiver marker; peer-addressed delivery is not used.
pub const RECEIVER_BROADCAST: &str = "*";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub version: String,
    pub sender: String,
    pub receiver: String,
    pub event: Event,
    pub event_id: String,
    pub source: String,
    pub schema_version: String,
}

/// Wrap an event for publication by `sender`.
pub fn encode(sender: &str, event: &Event) -> Envelope {
    Envelope {
        version: WIRE_VERSION.to_string(),
        sender: sender.to_string(),
        receiver: RECEIVER_BROADCAST.to_string(),
        event: event.clone(),
        event_id: event.event_id.clone(),
        source: event.source.clone(),
        schema_version: event.schema_version.clone(),
    }
}

pub fn to_line(envelope: &Envelope) -> Result<String, serde_json::Error> {
    serde_json::to_string(envelope)
}

/// Unwrap a received payload into an event.
///
/// Accepts the nested envelope form and the legacy flat form where the
/// event fields sit at the top level. Unknown schema versions are coerced
/// to the newest supported tag rather than rejected. Returns `None` only
/// for payloads that are not JSON objects at all.
pub fn decode(payload: &Value) -> Option<Event> {
    let obj = payload.as_object()?;

    let mut event = match obj.get("event").filter(|v| v.is_object()) {
        Some(inner) => event_from_value(inner)?,
        None => event_from_value(payload)?,
    };

    // Backfill identity from the envelope when the body left it out.
    let envelope_str = |key: &str| {
        obj.get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    if event.event_id.is_empty() {
        if let Some(id) = envelope_str("event_id") {
            event.event_id = id;
        }
    }
    if event.source == "unknown" {
        if let Some(source) = envelope_str("source") {
            event.source = source;
        }
    }
    if event.schema_version == "v1" && !obj.contains_key("event") {
        // Flat form: prefer an explicit envelope tag over the default.
        if let Some(version) = envelope_str("schema_version").or_else(|| envelope_str("version")) {
            event.schema_version = version;
        }
    }

    if !SCHEMA_VERSIONS.contains(&event.schema_version.as_str()) {
        event.schema_version = SCHEMA_VERSION_NEWEST.to_string();
    }
    Some(event)
}
