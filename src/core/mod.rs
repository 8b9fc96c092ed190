//! Core domain types: events and derived daily aggregates.

pub mod event;
pub mod summary;

pub use event::{
    click_event, format_day, manual_ping_event, mode_change_event, parse_day, state_tick_event,
    today_utc, utc_now_rfc3339, Event, DAY_FORMAT, ROLLUP_EVENT_TYPE, SCHEMA_VERSIONS,
    SCHEMA_VERSION_DEFAULT, SCHEMA_VERSION_NEWEST,
};
pub use summary::{summarize, DayCounters, DaySummary, Summary};
