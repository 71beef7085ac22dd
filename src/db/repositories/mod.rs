//! Repositories over the project store

pub mod feature;
pub mod overrides;
pub mod schedule;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

use crate::error::StoreError;

/// Fixed-width RFC 3339 in UTC, so text order equals time order.
pub(crate) fn encode_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Accepts RFC 3339 as well as the naive `YYYY-MM-DD HH:MM:SS[.ffffff]`
/// form (implicitly UTC) that older writers of the store used.
pub(crate) fn decode_timestamp(
    table: &'static str,
    raw: &str,
) -> Result<DateTime<Utc>, StoreError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| StoreError::Decode {
            table,
            detail: format!("unparseable timestamp {:?}", raw),
        })
}
