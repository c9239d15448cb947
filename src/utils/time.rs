//! Timestamp helpers.
//!
//! Timestamps are carried as [`OffsetDateTime`] in UTC and serialized as
//! RFC 3339 strings so stored conversations stay readable.

use serde::{Deserialize, Deserializer, Serializer};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;

/// Deserialize an RFC 3339 formatted string into an OffsetDateTime
pub fn deserialize<'de, D>(deserializer: D) -> Result<OffsetDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    OffsetDateTime::parse(&s, &Rfc3339).map_err(serde::de::Error::custom)
}

/// Serialize an OffsetDateTime into an RFC 3339 formatted string
pub fn serialize<S>(datetime: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let s = datetime
        .format(&Rfc3339)
        .map_err(serde::ser::Error::custom)?;
    serializer.serialize_str(&s)
}

/// The current wall-clock time in UTC.
pub fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

/// Milliseconds since the Unix epoch, clamped at zero.
pub fn unix_millis(datetime: OffsetDateTime) -> u64 {
    let millis = datetime.unix_timestamp_nanos() / 1_000_000;
    u64::try_from(millis).unwrap_or(0)
}

/// Formats the calendar date as `YYYY-MM-DD`.
pub fn date_stamp(datetime: OffsetDateTime) -> String {
    let format = format_description!("[year]-[month]-[day]");
    datetime
        .format(&format)
        .unwrap_or_else(|_| datetime.date().to_string())
}
