use std::time::{Duration, SystemTime, UNIX_EPOCH};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

/// Health check payloads.
pub mod health;
/// Match requests and views.
pub mod matches;
/// Question payloads.
pub mod questions;
/// Question report payloads.
pub mod reports;
/// Server-sent event payloads.
pub mod sse;
/// Custom validators.
pub mod validation;
/// WebSocket protocol messages.
pub mod ws;

fn format_system_time(time: SystemTime) -> String {
    OffsetDateTime::from(time)
        .format(&Rfc3339)
        .unwrap_or_else(|_| "invalid-timestamp".into())
}

/// RFC 3339 rendering of a millisecond Unix timestamp.
fn format_epoch_millis(millis: u64) -> String {
    format_system_time(UNIX_EPOCH + Duration::from_millis(millis))
}
