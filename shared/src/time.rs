use chrono::{Duration, NaiveDate, NaiveTime, Timelike};

use crate::error::BookingError;

/// Every reservation occupies its table for this long.
pub const DEFAULT_DURATION_MINUTES: i64 = 120;

pub const MINUTES_PER_DAY: i32 = 24 * 60;

const TIME_FORMAT: &str = "%H:%M";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Adds `duration_minutes` to `start`, wrapping past midnight.
pub fn compute_end_time(start: NaiveTime, duration_minutes: i64) -> NaiveTime {
    let (end, _) = start.overflowing_add_signed(Duration::minutes(duration_minutes));
    end
}

/// Minutes since midnight.
pub fn to_minutes(time: NaiveTime) -> i32 {
    (time.hour() * 60 + time.minute()) as i32
}

/// Half-open interval intersection: `[s1, e1)` and `[s2, e2)` overlap iff `s1 < e2 && e1 > s2`.
pub fn overlaps(s1: i32, e1: i32, s2: i32, e2: i32) -> bool {
    s1 < e2 && e1 > s2
}

pub fn parse_time(value: &str) -> Result<NaiveTime, BookingError> {
    NaiveTime::parse_from_str(value.trim(), TIME_FORMAT)
        .map_err(|_| BookingError::Validation(format!("invalid time '{value}', expected HH:MM")))
}

pub fn parse_date(value: &str) -> Result<NaiveDate, BookingError> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT)
        .map_err(|_| BookingError::Validation(format!("invalid date '{value}', expected YYYY-MM-DD")))
}

pub fn format_time(time: NaiveTime) -> String {
    time.format(TIME_FORMAT).to_string()
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// A reservation window in minutes relative to midnight of the booking date.
///
/// The end is never wrapped: a 23:00 start with the default duration yields
/// `[1380, 1500)`. Reservations themselves must fit inside their date, see
/// [`booking_window`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: i32,
    pub end: i32,
}

impl TimeRange {
    pub fn new(start: i32, end: i32) -> Self {
        Self { start, end }
    }

    pub fn starting_at(start: NaiveTime, duration_minutes: i64) -> Self {
        let start = to_minutes(start);
        Self {
            start,
            end: start + duration_minutes as i32,
        }
    }

    /// Builds a range from wall-clock times, treating `end <= start` as a midnight crossing.
    pub fn from_times(start: NaiveTime, end: NaiveTime) -> Self {
        let start = to_minutes(start);
        let mut end = to_minutes(end);
        if end <= start {
            end += MINUTES_PER_DAY;
        }
        Self { start, end }
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        overlaps(self.start, self.end, other.start, other.end)
    }

    pub fn crosses_midnight(&self) -> bool {
        self.end > MINUTES_PER_DAY
    }
}

/// The window a reservation starting at `start` occupies.
///
/// Windows must end by midnight: overlap checks only compare rows on the same
/// date, so a window spilling into the next day could not be protected.
pub fn booking_window(start: NaiveTime) -> Result<TimeRange, BookingError> {
    let range = TimeRange::starting_at(start, DEFAULT_DURATION_MINUTES);
    if range.crosses_midnight() {
        return Err(BookingError::Validation(format!(
            "a reservation starting at {} would end after midnight",
            format_time(start)
        )));
    }
    Ok(range)
}
