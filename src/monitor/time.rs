use chrono::{DateTime, Datelike, Duration, Utc};

/// Shifts timestamps by a fixed whole-hour offset and renders them.
///
/// The shifted instant is still a `DateTime<Utc>`; reading its UTC fields
/// yields the wall-clock fields of the configured zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeAdjuster {
    offset_hours: i32,
}

impl TimeAdjuster {
    pub fn new(offset_hours: i32) -> Self {
        Self { offset_hours }
    }

    pub fn offset_hours(&self) -> i32 {
        self.offset_hours
    }

    pub fn adjust(&self, time: DateTime<Utc>) -> DateTime<Utc> {
        time + Duration::hours(i64::from(self.offset_hours))
    }

    /// Adjusted instant for a block timestamp in unix seconds
    pub fn adjust_unix(&self, unix_seconds: u32) -> DateTime<Utc> {
        let time = DateTime::from_timestamp(i64::from(unix_seconds), 0).unwrap_or_default();
        self.adjust(time)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.adjust(Utc::now())
    }

    /// Zero-based month (0 = January) of the adjusted timestamp
    pub fn month_index(&self, unix_seconds: u32) -> u32 {
        self.adjust_unix(unix_seconds).month0()
    }

    /// RFC 1123 rendering of an already adjusted instant, with the offset
    /// appended when non-zero: `Thu, 01 Feb 2024 01:00:00 GMT+2`
    pub fn tz_string(&self, adjusted: DateTime<Utc>) -> String {
        let date = adjusted.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        match self.offset_hours {
            0 => date,
            offset if offset > 0 => format!("{}+{}", date, offset),
            offset => format!("{}{}", date, offset),
        }
    }

    pub fn format_unix(&self, unix_seconds: u32) -> String {
        self.tz_string(self.adjust_unix(unix_seconds))
    }
}
