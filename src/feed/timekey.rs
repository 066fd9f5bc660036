use chrono::{DateTime, Datelike, Timelike, Utc};
use std::fmt;

use super::entry::Entry;

/// Calendar time truncated to the minute. Field order gives lexicographic ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Minute {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
}

impl Minute {
    pub fn new(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> Self {
        Self {
            year,
            month,
            day,
            hour,
            minute,
        }
    }
}

impl From<DateTime<Utc>> for Minute {
    fn from(at: DateTime<Utc>) -> Self {
        Self::new(at.year(), at.month(), at.day(), at.hour(), at.minute())
    }
}

/// Ordering key of a feed entry.
///
/// `Unknown` (no usable time field) sorts strictly before every concrete minute.
/// The derive relies on variant order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimeKey {
    Unknown,
    At(Minute),
}

impl TimeKey {
    /// Published time wins over updated time; neither gives `Unknown`.
    ///
    /// BCE dates also give `Unknown`: they have no order-preserving integer
    /// encoding, and a key that cannot round-trip through the store would be
    /// re-admitted on every poll.
    pub fn of(entry: &Entry) -> Self {
        entry
            .published()
            .or_else(|| entry.updated())
            .filter(|at| at.year() >= 0)
            .map(|at| TimeKey::At(at.into()))
            .unwrap_or(TimeKey::Unknown)
    }

    pub fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> Self {
        TimeKey::At(Minute::new(year, month, day, hour, minute))
    }

    /// Integer encoding (`YYYYMMDDhhmm`, `Unknown` = 0) whose numeric order matches `Ord`.
    ///
    /// Years past 9999 just widen the leading digits. Negative years are never
    /// produced by [`TimeKey::of`] and encode as corrupt values.
    pub fn to_db(self) -> i64 {
        match self {
            TimeKey::Unknown => 0,
            TimeKey::At(m) => {
                let year = i64::from(m.year);
                year * 100_000_000
                    + i64::from(m.month) * 1_000_000
                    + i64::from(m.day) * 10_000
                    + i64::from(m.hour) * 100
                    + i64::from(m.minute)
            }
        }
    }

    pub fn from_db(value: i64) -> Option<Self> {
        if value == 0 {
            return Some(TimeKey::Unknown);
        }
        if value < 0 {
            return None;
        }
        let minute = (value % 100) as u32;
        let hour = (value / 100 % 100) as u32;
        let day = (value / 10_000 % 100) as u32;
        let month = (value / 1_000_000 % 100) as u32;
        let year = i32::try_from(value / 100_000_000).ok()?;
        if !(1..=12).contains(&month) || !(1..=31).contains(&day) || hour > 23 || minute > 59 {
            return None;
        }
        Some(TimeKey::at(year, month, day, hour, minute))
    }
}

impl fmt::Display for TimeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeKey::Unknown => f.write_str("undated"),
            TimeKey::At(m) => write!(
                f,
                "{:04}-{:02}-{:02} {:02}:{:02}",
                m.year, m.month, m.day, m.hour, m.minute
            ),
        }
    }
}

/// Position of a subscription in its feed.
///
/// `NeverSeen` admits every entry, dated or not. Once anything has been delivered
/// the cursor is `Seen`, and only strictly newer keys pass; a `Seen(Unknown)`
/// cursor keeps undated entries from being re-delivered on every poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Cursor {
    #[default]
    NeverSeen,
    Seen(TimeKey),
}

impl Cursor {
    pub fn admits(self, key: TimeKey) -> bool {
        match self {
            Cursor::NeverSeen => true,
            Cursor::Seen(last) => key > last,
        }
    }

    pub fn to_db(self) -> Option<i64> {
        match self {
            Cursor::NeverSeen => None,
            Cursor::Seen(key) => Some(key.to_db()),
        }
    }

    pub fn from_db(value: Option<i64>) -> Option<Self> {
        match value {
            None => Some(Cursor::NeverSeen),
            Some(v) => TimeKey::from_db(v).map(Cursor::Seen),
        }
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cursor::NeverSeen => f.write_str("never"),
            Cursor::Seen(key) => key.fmt(f),
        }
    }
}
