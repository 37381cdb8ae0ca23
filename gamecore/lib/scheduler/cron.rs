use std::{fmt, str::FromStr, sync::LazyLock};

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike};
use regex::Regex;

use crate::{GamecoreError, GamecoreResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// How far ahead [`CronSchedule::next_after`] looks for a matching minute.
pub const CRON_HORIZON_MINUTES: i64 = 366 * 24 * 60;

/// Matches a single field: `*`, `*/N`, `A-B` or `N`.
static FIELD_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:\*|\*/(\d+)|(\d+)-(\d+)|(\d+))$").unwrap());

/// Names and bounds of the five fields, in order.
const FIELDS: [(&str, u32, u32); 5] = [
    ("minute", 0, 59),
    ("hour", 0, 23),
    ("day of month", 1, 31),
    ("month", 1, 12),
    ("day of week", 0, 6),
];

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A five-field cron schedule: minute, hour, day of month, month and day of week.
///
/// Each field is one of `*`, `*/N`, `A-B` or a single integer. Lists and names are not
/// supported. Day of week runs from 0 (Sunday) to 6 (Saturday). A minute matches when every
/// field matches.
///
/// ## Examples
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use gamecore::scheduler::CronSchedule;
///
/// let schedule: CronSchedule = "0 2 * * *".parse().unwrap();
/// let after = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
/// assert_eq!(
///     schedule.next_after(&after),
///     Some(Utc.with_ymd_and_hms(2024, 1, 2, 2, 0, 0).unwrap())
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expression: String,
    fields: [CronField; 5],
}

/// A single field of a [`CronSchedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CronField {
    /// `*`
    Any,

    /// `*/N`, every value of the field that is a multiple of N away from its lowest value.
    Step(u32),

    /// `A-B`, both ends included.
    Range(u32, u32),

    /// `N`
    Value(u32),
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl CronSchedule {
    /// Returns the expression the schedule was parsed from.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Returns true if the minute of `time` matches the schedule.
    pub fn matches<Tz: TimeZone>(&self, time: &DateTime<Tz>) -> bool {
        let values = [
            time.minute(),
            time.hour(),
            time.day(),
            time.month(),
            time.weekday().num_days_from_sunday(),
        ];

        self.fields
            .iter()
            .zip(values)
            .zip(FIELDS)
            .all(|((field, value), (_, min, _))| field.matches(value, min))
    }

    /// Returns the first matching minute strictly after `after`, or `None` if nothing matches
    /// within [`CRON_HORIZON_MINUTES`].
    ///
    /// Seconds are ignored, so the result is always on a whole minute.
    pub fn next_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let mut candidate = after.with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);
        for _ in 0..CRON_HORIZON_MINUTES {
            if self.matches(&candidate) {
                return Some(candidate);
            }

            candidate += Duration::minutes(1);
        }

        None
    }
}

impl CronField {
    fn parse(token: &str, name: &str, min: u32, max: u32) -> Result<Self, String> {
        let captures = FIELD_REGEX
            .captures(token)
            .ok_or_else(|| format!("{} field '{}' is not *, */N, A-B or N", name, token))?;

        let number = |index: usize| -> Result<Option<u32>, String> {
            captures
                .get(index)
                .map(|m| {
                    m.as_str()
                        .parse::<u32>()
                        .map_err(|_| format!("{} field '{}' is out of range", name, token))
                })
                .transpose()
        };
        let in_bounds = |value: u32| -> Result<u32, String> {
            if (min..=max).contains(&value) {
                Ok(value)
            } else {
                Err(format!("{} value {} is outside {}-{}", name, value, min, max))
            }
        };

        if let Some(step) = number(1)? {
            if step == 0 {
                return Err(format!("{} step must be greater than zero", name));
            }
            return Ok(Self::Step(step));
        }

        if let (Some(start), Some(end)) = (number(2)?, number(3)?) {
            let (start, end) = (in_bounds(start)?, in_bounds(end)?);
            if start > end {
                return Err(format!("{} range {}-{} is reversed", name, start, end));
            }
            return Ok(Self::Range(start, end));
        }

        if let Some(value) = number(4)? {
            return Ok(Self::Value(in_bounds(value)?));
        }

        Ok(Self::Any)
    }

    fn matches(&self, value: u32, min: u32) -> bool {
        match *self {
            Self::Any => true,
            Self::Step(step) => (value - min) % step == 0,
            Self::Range(start, end) => (start..=end).contains(&value),
            Self::Value(expected) => value == expected,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Computes the next run of `expression` after `after`.
///
/// Returns `None` when the expression is invalid or has no run within the horizon.
pub fn next_run<Tz: TimeZone>(expression: &str, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
    match expression.parse::<CronSchedule>() {
        Ok(schedule) => schedule.next_after(after),
        Err(e) => {
            tracing::warn!("{}", e);
            None
        }
    }
}

/// Checks that `expression` is a valid schedule.
pub fn validate_cron(expression: &str) -> GamecoreResult<()> {
    expression.parse::<CronSchedule>().map(|_| ())
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl FromStr for CronSchedule {
    type Err = GamecoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| GamecoreError::InvalidCronSchedule(s.to_string(), reason);

        let tokens: Vec<&str> = s.split_whitespace().collect();
        if tokens.len() != FIELDS.len() {
            return Err(invalid(format!(
                "expected {} fields, found {}",
                FIELDS.len(),
                tokens.len()
            )));
        }

        let mut fields = [CronField::Any; 5];
        for (slot, (token, (name, min, max))) in fields.iter_mut().zip(tokens.iter().zip(FIELDS)) {
            *slot = CronField::parse(token, name, min, max).map_err(invalid)?;
        }

        Ok(Self {
            expression: tokens.join(" "),
            fields,
        })
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expression)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
