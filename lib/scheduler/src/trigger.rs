//! Trigger specifications: when a scheduled entry should next fire.
//!
//! Triggers are pure values. They compute the next fire time from a
//! reference instant and never hold any scheduling state themselves.
//! All wall-clock evaluation is done in UTC.

use crate::error::SchedulerError;
use chrono::{DateTime, Datelike, NaiveDate, TimeDelta, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

/// How far ahead a cron search looks before giving up.
const MAX_SEARCH_DAYS: u32 = 366 * 5;

/// One field of a cron-like specification.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CronField {
    /// Matches every value.
    #[default]
    Any,
    /// Matches every n-th value, counted from the field's minimum.
    Every(u32),
    /// Matches only the listed values.
    Values(BTreeSet<u32>),
}

impl CronField {
    /// Matches a single value.
    #[must_use]
    pub fn at(value: u32) -> Self {
        Self::Values(BTreeSet::from([value]))
    }

    /// Matches any of the given values.
    #[must_use]
    pub fn list(values: impl IntoIterator<Item = u32>) -> Self {
        Self::Values(values.into_iter().collect())
    }

    /// Matches every `step`-th value of the field's range.
    #[must_use]
    pub fn every(step: u32) -> Self {
        Self::Every(step)
    }

    /// Matches the inclusive range `lo..=hi`.
    #[must_use]
    pub fn range(lo: u32, hi: u32) -> Self {
        Self::Values((lo..=hi).collect())
    }

    fn matches(&self, value: u32, min: u32) -> bool {
        match self {
            Self::Any => true,
            Self::Every(step) => *step > 0 && (value - min) % step == 0,
            Self::Values(values) => values.contains(&value),
        }
    }

    fn validate(&self, name: &str, min: u32, max: u32) -> Result<(), SchedulerError> {
        match self {
            Self::Any => Ok(()),
            Self::Every(0) => Err(SchedulerError::configuration(format!(
                "{name}: step must be at least 1"
            ))),
            Self::Every(_) => Ok(()),
            Self::Values(values) if values.is_empty() => Err(SchedulerError::configuration(
                format!("{name}: at least one value is required"),
            )),
            Self::Values(values) => match values.iter().find(|v| **v < min || **v > max) {
                Some(bad) => Err(SchedulerError::configuration(format!(
                    "{name}: {bad} is outside {min}..={max}"
                ))),
                None => Ok(()),
            },
        }
    }
}

impl fmt::Display for CronField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "*"),
            Self::Every(step) => write!(f, "*/{step}"),
            Self::Values(values) => {
                let joined: Vec<String> = values.iter().map(u32::to_string).collect();
                write!(f, "{}", joined.join(","))
            }
        }
    }
}

/// A cron-like specification over UTC wall-clock fields.
///
/// Every field must match for a minute to be a fire time; day-of-month and
/// day-of-week are combined with AND. Day-of-week counts from Monday = 0.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CronSpec {
    pub minute: CronField,
    pub hour: CronField,
    pub day_of_month: CronField,
    pub month: CronField,
    pub day_of_week: CronField,
}

impl CronSpec {
    /// A spec matching every minute.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires once a day at `hour:minute` UTC.
    #[must_use]
    pub fn daily_at(hour: u32, minute: u32) -> Self {
        Self::new()
            .with_hour(CronField::at(hour))
            .with_minute(CronField::at(minute))
    }

    /// Fires once an hour at the given minute.
    #[must_use]
    pub fn hourly_at(minute: u32) -> Self {
        Self::new().with_minute(CronField::at(minute))
    }

    #[must_use]
    pub fn with_minute(mut self, field: CronField) -> Self {
        self.minute = field;
        self
    }

    #[must_use]
    pub fn with_hour(mut self, field: CronField) -> Self {
        self.hour = field;
        self
    }

    #[must_use]
    pub fn with_day_of_month(mut self, field: CronField) -> Self {
        self.day_of_month = field;
        self
    }

    #[must_use]
    pub fn with_month(mut self, field: CronField) -> Self {
        self.month = field;
        self
    }

    #[must_use]
    pub fn with_day_of_week(mut self, field: CronField) -> Self {
        self.day_of_week = field;
        self
    }

    /// Checks every field against its allowed range.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Configuration` naming the first bad field.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        self.minute.validate("minute", 0, 59)?;
        self.hour.validate("hour", 0, 23)?;
        self.day_of_month.validate("day_of_month", 1, 31)?;
        self.month.validate("month", 1, 12)?;
        self.day_of_week.validate("day_of_week", 0, 6)
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        self.day_of_month.matches(date.day(), 1)
            && self.month.matches(date.month(), 1)
            && self
                .day_of_week
                .matches(date.weekday().num_days_from_monday(), 0)
    }

    /// Returns the first matching minute strictly after `after`.
    #[must_use]
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = after.with_second(0)?.with_nanosecond(0)? + TimeDelta::minutes(1);
        let start_date = start.date_naive();
        let mut date = start_date;

        for _ in 0..MAX_SEARCH_DAYS {
            if self.day_matches(date) {
                let (first_hour, first_minute) = if date == start_date {
                    (start.hour(), start.minute())
                } else {
                    (0, 0)
                };
                for hour in first_hour..24 {
                    if !self.hour.matches(hour, 0) {
                        continue;
                    }
                    let from = if hour == first_hour { first_minute } else { 0 };
                    if let Some(minute) = (from..60).find(|m| self.minute.matches(*m, 0)) {
                        return date.and_hms_opt(hour, minute, 0).map(|t| t.and_utc());
                    }
                }
            }
            date = date.succ_opt()?;
        }
        None
    }
}

impl fmt::Display for CronSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.minute, self.hour, self.day_of_month, self.month, self.day_of_week
        )
    }
}

/// When a scheduled entry fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Fires whenever the UTC wall clock matches the spec.
    Cron(CronSpec),
    /// Fires at `anchor + k * every` for k >= 1.
    Interval {
        every: Duration,
        /// Start of the series; the registration time when unset.
        anchor: Option<DateTime<Utc>>,
    },
}

impl Trigger {
    /// Validates the trigger.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Configuration` for out-of-range cron fields
    /// or an interval shorter than one millisecond.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        match self {
            Self::Cron(spec) => spec.validate(),
            Self::Interval { every, .. } => {
                if *every < Duration::from_millis(1) {
                    return Err(SchedulerError::configuration(
                        "interval must be at least 1ms",
                    ));
                }
                TimeDelta::from_std(*every)
                    .map(|_| ())
                    .map_err(|_| SchedulerError::configuration("interval is too large"))
            }
        }
    }

    /// Pins an unanchored interval to `now`. Cron triggers are returned as is.
    #[must_use]
    pub fn anchored_at(self, now: DateTime<Utc>) -> Self {
        match self {
            Self::Interval {
                every,
                anchor: None,
            } => Self::Interval {
                every,
                anchor: Some(now),
            },
            other => other,
        }
    }

    /// Computes the next fire time strictly after `after`.
    ///
    /// Returns `None` when the trigger can never fire again.
    #[must_use]
    pub fn next_fire(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Cron(spec) => spec.next_after(after),
            Self::Interval { every, anchor } => {
                let period_ms = TimeDelta::from_std(*every).ok()?.num_milliseconds();
                if period_ms <= 0 {
                    return None;
                }
                let anchor = anchor.unwrap_or(after);
                let steps = if after < anchor {
                    1
                } else {
                    (after - anchor).num_milliseconds() / period_ms + 1
                };
                let offset = TimeDelta::try_milliseconds(period_ms.checked_mul(steps)?)?;
                anchor.checked_add_signed(offset)
            }
        }
    }

    /// Returns the latest fire time in `first..=now`, where `first` is itself
    /// a fire time of this trigger.
    ///
    /// Anchored intervals jump straight to the answer. Cron triggers walk
    /// forward one fire at a time without collecting the skipped ones.
    #[must_use]
    pub fn latest_fire_through(
        &self,
        first: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        if first > now {
            return None;
        }
        if let Self::Interval {
            every,
            anchor: Some(anchor),
        } = self
        {
            let period_ms = TimeDelta::from_std(*every).ok()?.num_milliseconds();
            if period_ms > 0 && *anchor <= now {
                let steps = (now - *anchor).num_milliseconds() / period_ms;
                let offset = TimeDelta::try_milliseconds(period_ms.checked_mul(steps)?)?;
                return Some(anchor.checked_add_signed(offset)?.max(first));
            }
        }
        let mut latest = first;
        while let Some(next) = self.next_fire(latest) {
            if next > now {
                break;
            }
            latest = next;
        }
        Some(latest)
    }

    /// Human-readable form shown in schedule listings.
    #[must_use]
    pub fn describe(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cron(spec) => write!(f, "cron[{spec}]"),
            Self::Interval { every, .. } => write!(f, "interval[every {}ms]", every.as_millis()),
        }
    }
}
