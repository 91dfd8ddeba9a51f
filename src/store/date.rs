//! Canonical UTC timestamps and their cache wire format.
//!
//! Every date a record stores is normalised to UTC with second
//! precision and encoded as nine whitespace-separated integers:
//! year, month, day, hour, minute, second, weekday (Monday = 0),
//! ordinal day of year (1-based), and a DST flag (always 0 for UTC).
//! The derived fields are recomputed on encode, so
//! `decode(encode(t)) == t` holds for every value we write.

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DateError {
    #[error("expected 9 date fields, found {0}")]
    FieldCount(usize),

    #[error("invalid date field {field:?}: {value}")]
    Field { field: &'static str, value: String },

    #[error("date out of range: {0}")]
    OutOfRange(String),
}

/// A UTC timestamp with second precision.
///
/// Ordering and equality follow the underlying instant, so timestamps
/// can be compared directly for clamping and sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Current time, truncated to whole seconds so it survives a
    /// round-trip through the cache encoding.
    pub fn now() -> Self {
        Self::from_unix(Utc::now().timestamp()).expect("current time is in range")
    }

    pub fn from_unix(secs: i64) -> Option<Self> {
        DateTime::from_timestamp(secs, 0).map(Timestamp)
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self::from_unix(dt.timestamp()).unwrap_or(Timestamp(dt))
    }

    /// Seconds since the Unix epoch.
    pub fn unix(&self) -> i64 {
        self.0.timestamp()
    }

    /// Nine-integer cache encoding.
    pub fn encode(&self) -> String {
        let t = self.0;
        format!(
            "{} {} {} {} {} {} {} {} 0",
            t.year(),
            t.month(),
            t.day(),
            t.hour(),
            t.minute(),
            t.second(),
            t.weekday().num_days_from_monday(),
            t.ordinal(),
        )
    }

    /// Parse the nine-integer encoding. The weekday, year-day, and DST
    /// fields are validated for shape but recomputed from the first
    /// six, which keeps decoding exact for anything `encode` produced.
    pub fn decode(text: &str) -> Result<Self, DateError> {
        let fields: Vec<&str> = text.split_whitespace().collect();
        if fields.len() != 9 {
            return Err(DateError::FieldCount(fields.len()));
        }

        const NAMES: [&str; 9] = [
            "year", "month", "day", "hour", "minute", "second", "weekday", "yearday", "dst",
        ];
        let mut nums = [0i64; 9];
        for (i, raw) in fields.iter().enumerate() {
            nums[i] = raw.parse().map_err(|_| DateError::Field {
                field: NAMES[i],
                value: (*raw).to_string(),
            })?;
        }

        let year = i32::try_from(nums[0]).map_err(|_| DateError::OutOfRange(text.to_string()))?;
        let to_u32 = |n: i64, field: &'static str| {
            u32::try_from(n).map_err(|_| DateError::Field {
                field,
                value: n.to_string(),
            })
        };

        Utc.with_ymd_and_hms(
            year,
            to_u32(nums[1], "month")?,
            to_u32(nums[2], "day")?,
            to_u32(nums[3], "hour")?,
            to_u32(nums[4], "minute")?,
            to_u32(nums[5], "second")?,
        )
        .single()
        .map(Timestamp)
        .ok_or_else(|| DateError::OutOfRange(text.to_string()))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%dT%H:%M:%S+00:00"))
    }
}
