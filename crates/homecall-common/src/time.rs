use chrono::{DateTime, Utc};

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

pub fn epoch_millis(dt: &DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

/// Epoch seconds for an optional instant, `0` when it never happened.
pub fn epoch_secs_or_zero(dt: Option<&DateTime<Utc>>) -> i64 {
    dt.map(DateTime::timestamp).unwrap_or(0)
}
