//! Activation evaluation for schedules
//!
//! Everything here is pure: callers load the schedule and its overrides from
//! the store on every tick and pass them in together with the current UTC
//! instant. No timezone conversion happens in this module.

use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc};
use serde::Serialize;

use super::types::{Schedule, ScheduleOverride, MINUTES_PER_DAY};

/// A natural activation window, `[start, end)` in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ScheduleEvaluator;

impl ScheduleEvaluator {
    /// Whether the schedule should be active at `now`.
    ///
    /// The newest unexpired override for this schedule decides the result
    /// outright. Without one the natural window applies.
    pub fn is_active(
        schedule: &Schedule,
        overrides: &[ScheduleOverride],
        now: DateTime<Utc>,
    ) -> bool {
        match Self::effective_override(schedule.id, overrides, now) {
            Some(active) => active.override_type.forces_active(),
            None => Self::natural_state(schedule, now),
        }
    }

    /// Activation ignoring overrides.
    pub fn natural_state(schedule: &Schedule, now: DateTime<Utc>) -> bool {
        Self::current_window(schedule, now).is_some()
    }

    /// Newest override belonging to `schedule_id` that has not expired.
    ///
    /// Precedence is last-write-wins on `created_at`, not type priority.
    /// Equal creation times fall back to the higher id.
    pub fn effective_override(
        schedule_id: i64,
        overrides: &[ScheduleOverride],
        now: DateTime<Utc>,
    ) -> Option<&ScheduleOverride> {
        overrides
            .iter()
            .filter(|o| o.schedule_id == schedule_id && o.is_effective(now))
            .max_by_key(|o| (o.created_at, o.id))
    }

    /// The natural window containing `now`, if any.
    ///
    /// The part of a window that runs past midnight is active when either the
    /// day it started on or the day it spills into has its bit set. When only
    /// the later day is set, the returned window starts at that midnight. A
    /// full 1440-minute window covers the whole UTC day on days whose own bit
    /// is set, regardless of start time.
    pub fn current_window(schedule: &Schedule, now: DateTime<Utc>) -> Option<Window> {
        if !schedule.enabled {
            return None;
        }
        let today = midnight_of(now);

        if schedule.duration_minutes >= MINUTES_PER_DAY {
            return is_day_set(schedule, today).then(|| Window {
                start: today,
                end: today + Duration::days(1),
            });
        }

        let same_day = window_starting_on(schedule, today);
        if is_day_set(schedule, today) && same_day.contains(now) {
            return Some(same_day);
        }

        let yesterday = today - Duration::days(1);
        let spill = window_starting_on(schedule, yesterday);
        if !spill.contains(now) {
            return None;
        }
        if is_day_set(schedule, yesterday) {
            Some(spill)
        } else if is_day_set(schedule, today) {
            Some(Window {
                start: today,
                end: spill.end,
            })
        } else {
            None
        }
    }

    /// Start of the next natural activation strictly after `now`.
    ///
    /// Besides each enabled day's own start, a wrapping window whose later
    /// day is set but earlier day is not becomes active at that midnight.
    pub fn next_window_start(schedule: &Schedule, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if !schedule.enabled {
            return None;
        }
        let midnight = midnight_of(now);
        (0..=7)
            .map(|offset| midnight + Duration::days(offset))
            .filter(|day| is_day_set(schedule, *day))
            .flat_map(|day| {
                if schedule.duration_minutes >= MINUTES_PER_DAY {
                    return vec![day];
                }
                let mut starts = vec![window_starting_on(schedule, day).start];
                if schedule.crosses_midnight() && !is_day_set(schedule, day - Duration::days(1)) {
                    starts.push(day);
                }
                starts
            })
            .filter(|start| *start > now)
            .min()
    }
}

fn is_day_set(schedule: &Schedule, midnight: DateTime<Utc>) -> bool {
    schedule.is_active_on_day(midnight.weekday().num_days_from_monday())
}

fn midnight_of(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant.date_naive().and_time(NaiveTime::default()).and_utc()
}

fn window_starting_on(schedule: &Schedule, midnight: DateTime<Utc>) -> Window {
    let start = midnight + Duration::minutes(schedule.start_time.minutes_from_midnight() as i64);
    Window {
        start,
        end: start + Duration::minutes(schedule.duration_minutes as i64),
    }
}
