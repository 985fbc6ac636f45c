//! Business day counting
//!
//! A request is charged for every day in its inclusive range that the
//! calendar reports as chargeable. [`WeekendCalendar`] skips Saturdays and
//! Sundays; public holidays are not modelled yet and would plug in as another
//! [`BusinessCalendar`].
use super::error::ValidationError;
use chrono::{Datelike, Duration, NaiveDate, Weekday};

pub trait BusinessCalendar: Send + Sync {
    /// Whether a single day counts against a balance.
    fn is_chargeable(&self, date: NaiveDate) -> bool;

    /// Count chargeable days in `start..=end`.
    fn chargeable_days(&self, start: NaiveDate, end: NaiveDate) -> Result<u32, ValidationError> {
        if end < start {
            return Err(ValidationError::InvalidRange {
                start: start.into(),
                end: end.into(),
            });
        }

        let days = start
            .iter_days()
            .take_while(|day| *day <= end)
            .filter(|day| self.is_chargeable(*day))
            .count();

        Ok(days as u32)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WeekendCalendar;

impl BusinessCalendar for WeekendCalendar {
    fn is_chargeable(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
    }

    // Every full week holds five working days; only the tail is walked.
    fn chargeable_days(&self, start: NaiveDate, end: NaiveDate) -> Result<u32, ValidationError> {
        if end < start {
            return Err(ValidationError::InvalidRange {
                start: start.into(),
                end: end.into(),
            });
        }

        let total = (end - start).num_days() + 1;
        let full_weeks = total / 7;
        let tail_start = start + Duration::days(full_weeks * 7);

        let tail = tail_start
            .iter_days()
            .take((total % 7) as usize)
            .filter(|day| self.is_chargeable(*day))
            .count() as i64;

        Ok((full_weeks * 5 + tail) as u32)
    }
}

/// Chargeable days under the default weekend-only policy.
pub fn count_chargeable_days(start: NaiveDate, end: NaiveDate) -> Result<u32, ValidationError> {
    WeekendCalendar.chargeable_days(start, end)
}
