//! Schedule and override definitions

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc, Weekday};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ValidationError;

pub const MINUTES_PER_DAY: u32 = 1440;
pub const MAX_PROJECT_NAME_LEN: usize = 50;
pub const DEFAULT_MAX_CONCURRENCY: u8 = 3;

/// Wall-clock time of day in UTC, minute precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StartTime {
    hour: u8,
    minute: u8,
}

impl StartTime {
    pub fn new(hour: u8, minute: u8) -> Result<Self, ValidationError> {
        if hour > 23 || minute > 59 {
            return Err(ValidationError::StartTime(format!("{:02}:{:02}", hour, minute)));
        }
        Ok(Self { hour, minute })
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }

    /// Minutes elapsed since 00:00.
    pub fn minutes_from_midnight(&self) -> u32 {
        self.hour as u32 * 60 + self.minute as u32
    }
}

impl FromStr for StartTime {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::StartTime(s.to_string());
        let bytes = s.as_bytes();
        if bytes.len() != 5 || bytes[2] != b':' {
            return Err(invalid());
        }
        let digits = [bytes[0], bytes[1], bytes[3], bytes[4]];
        if !digits.iter().all(u8::is_ascii_digit) {
            return Err(invalid());
        }
        let hour = (digits[0] - b'0') * 10 + (digits[1] - b'0');
        let minute = (digits[2] - b'0') * 10 + (digits[3] - b'0');
        Self::new(hour, minute).map_err(|_| invalid())
    }
}

impl fmt::Display for StartTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl Serialize for StartTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for StartTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// 7-bit weekday mask: bit 0 = Monday ... bit 6 = Sunday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DaysOfWeek(u8);

impl DaysOfWeek {
    pub const NONE: DaysOfWeek = DaysOfWeek(0);
    pub const ALL: DaysOfWeek = DaysOfWeek(0b111_1111);
    pub const WEEKDAYS: DaysOfWeek = DaysOfWeek(0b001_1111);

    pub fn new(mask: u32) -> Result<Self, ValidationError> {
        if mask > Self::ALL.0 as u32 {
            return Err(ValidationError::DaysOfWeek(mask));
        }
        Ok(Self(mask as u8))
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    /// `weekday` counts from Monday = 0. Anything past 6 is never active.
    pub fn is_active_on_day(&self, weekday: u32) -> bool {
        weekday < 7 && self.0 & (1 << weekday) != 0
    }

    pub fn contains(&self, weekday: Weekday) -> bool {
        self.is_active_on_day(weekday.num_days_from_monday())
    }

    pub fn to_weekdays(&self) -> Vec<Weekday> {
        let mut day = Weekday::Mon;
        let mut days = Vec::new();
        for _ in 0..7 {
            if self.contains(day) {
                days.push(day);
            }
            day = day.succ();
        }
        days
    }
}

impl Default for DaysOfWeek {
    fn default() -> Self {
        Self::ALL
    }
}

impl FromIterator<Weekday> for DaysOfWeek {
    fn from_iter<I: IntoIterator<Item = Weekday>>(iter: I) -> Self {
        let bits = iter
            .into_iter()
            .fold(0u8, |acc, day| acc | (1 << day.num_days_from_monday()));
        Self(bits)
    }
}

/// A persisted recurring activation rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub id: i64,
    pub project_name: String,
    pub start_time: StartTime,
    pub duration_minutes: u32,
    pub days_of_week: DaysOfWeek,
    pub enabled: bool,
    pub yolo_mode: bool,
    /// `None` means the agent's default model.
    pub model: Option<String>,
    pub max_concurrency: u8,
    pub crash_count: u32,
    pub created_at: DateTime<Utc>,
}

impl Schedule {
    pub fn is_active_on_day(&self, weekday: u32) -> bool {
        self.days_of_week.is_active_on_day(weekday)
    }

    /// Whether the window runs past midnight into the following day.
    pub fn crosses_midnight(&self) -> bool {
        self.duration_minutes < MINUTES_PER_DAY
            && self.start_time.minutes_from_midnight() + self.duration_minutes > MINUTES_PER_DAY
    }
}

/// Unvalidated schedule fields as supplied by a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSchedule {
    pub project_name: String,
    pub start_time: String,
    pub duration_minutes: u32,
    #[serde(default = "default_days")]
    pub days_of_week: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub yolo_mode: bool,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: u32,
}

fn default_days() -> u32 {
    DaysOfWeek::ALL.bits() as u32
}

fn default_enabled() -> bool {
    true
}

fn default_max_concurrency() -> u32 {
    DEFAULT_MAX_CONCURRENCY as u32
}

/// Fields of a [`NewSchedule`] that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidSchedule {
    pub project_name: String,
    pub start_time: StartTime,
    pub duration_minutes: u32,
    pub days_of_week: DaysOfWeek,
    pub enabled: bool,
    pub yolo_mode: bool,
    pub model: Option<String>,
    pub max_concurrency: u8,
}

impl NewSchedule {
    pub fn new(
        project_name: impl Into<String>,
        start_time: impl Into<String>,
        duration_minutes: u32,
    ) -> Self {
        Self {
            project_name: project_name.into(),
            start_time: start_time.into(),
            duration_minutes,
            days_of_week: default_days(),
            enabled: true,
            yolo_mode: false,
            model: None,
            max_concurrency: default_max_concurrency(),
        }
    }

    pub fn days(mut self, mask: u32) -> Self {
        self.days_of_week = mask;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn max_concurrency(mut self, max: u32) -> Self {
        self.max_concurrency = max;
        self
    }

    pub fn validate(&self) -> Result<ValidSchedule, ValidationError> {
        let name_len = self.project_name.chars().count();
        if name_len == 0 || name_len > MAX_PROJECT_NAME_LEN {
            return Err(ValidationError::ProjectName(name_len));
        }
        let start_time: StartTime = self.start_time.parse()?;
        if !(1..=MINUTES_PER_DAY).contains(&self.duration_minutes) {
            return Err(ValidationError::Duration(self.duration_minutes));
        }
        let days_of_week = DaysOfWeek::new(self.days_of_week)?;
        if !(1..=5).contains(&self.max_concurrency) {
            return Err(ValidationError::MaxConcurrency(self.max_concurrency));
        }

        Ok(ValidSchedule {
            project_name: self.project_name.clone(),
            start_time,
            duration_minutes: self.duration_minutes,
            days_of_week,
            enabled: self.enabled,
            yolo_mode: self.yolo_mode,
            model: self.model.clone(),
            max_concurrency: self.max_concurrency as u8,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrideType {
    /// Force the schedule active.
    Start,
    /// Force the schedule inactive.
    Stop,
}

impl OverrideType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverrideType::Start => "start",
            OverrideType::Stop => "stop",
        }
    }

    pub fn forces_active(&self) -> bool {
        matches!(self, OverrideType::Start)
    }
}

impl FromStr for OverrideType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(OverrideType::Start),
            "stop" => Ok(OverrideType::Stop),
            _ => Err(ValidationError::OverrideType(s.to_string())),
        }
    }
}

/// A time-boxed manual correction to a schedule's computed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleOverride {
    pub id: i64,
    pub schedule_id: i64,
    pub override_type: OverrideType,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl ScheduleOverride {
    /// In effect only while `now < expires_at`.
    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_start_times() {
        assert_eq!("00:00".parse::<StartTime>().unwrap(), StartTime::new(0, 0).unwrap());
        assert_eq!("23:59".parse::<StartTime>().unwrap().minutes_from_midnight(), 1439);
        assert_eq!("07:05".parse::<StartTime>().unwrap().to_string(), "07:05");
    }

    #[test]
    fn rejects_malformed_start_times() {
        let malformed = [
            "24:00", "12:60", "7:05", "07:5", "0705", "07-05", "ab:cd", "", " 7:05", "07:05 ",
        ];
        for bad in malformed {
            assert!(bad.parse::<StartTime>().is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn day_mask_matches_bit_test_for_every_mask() {
        for mask in 0..=127u32 {
            let days = DaysOfWeek::new(mask).unwrap();
            for day in 0..7 {
                assert_eq!(days.is_active_on_day(day), mask & (1 << day) != 0);
            }
            assert!(!days.is_active_on_day(7));
        }
        assert!(DaysOfWeek::new(128).is_err());
    }

    #[test]
    fn day_mask_from_weekdays() {
        let days: DaysOfWeek = [Weekday::Mon, Weekday::Sun].into_iter().collect();
        assert_eq!(days.bits(), 0b100_0001);
        assert_eq!(days.to_weekdays(), vec![Weekday::Mon, Weekday::Sun]);
    }

    #[test]
    fn validate_rejects_out_of_range_fields() {
        let base = NewSchedule::new("demo", "09:00", 60);
        assert!(base.validate().is_ok());

        assert_eq!(
            base.clone().days(128).validate(),
            Err(ValidationError::DaysOfWeek(128))
        );
        assert_eq!(
            NewSchedule::new("demo", "09:00", 0).validate(),
            Err(ValidationError::Duration(0))
        );
        assert_eq!(
            NewSchedule::new("demo", "09:00", 1441).validate(),
            Err(ValidationError::Duration(1441))
        );
        assert_eq!(
            base.clone().max_concurrency(6).validate(),
            Err(ValidationError::MaxConcurrency(6))
        );
        assert_eq!(
            NewSchedule::new("", "09:00", 60).validate(),
            Err(ValidationError::ProjectName(0))
        );
        assert!(NewSchedule::new("demo", "9:00", 60).validate().is_err());
    }

    #[test]
    fn schedule_serializes_in_api_shape() {
        let schedule = Schedule {
            id: 1,
            project_name: "demo".into(),
            start_time: "22:30".parse().unwrap(),
            duration_minutes: 90,
            days_of_week: DaysOfWeek::WEEKDAYS,
            enabled: true,
            yolo_mode: false,
            model: None,
            max_concurrency: 3,
            crash_count: 0,
            created_at: "2026-01-05T00:00:00Z".parse().unwrap(),
        };
        let value = serde_json::to_value(&schedule).unwrap();
        assert_eq!(value["startTime"], "22:30");
        assert_eq!(value["daysOfWeek"], 31);
        assert_eq!(value["projectName"], "demo");
        assert!(value["model"].is_null());
        assert!(schedule.crosses_midnight());
    }

    #[test]
    fn override_type_round_trips_through_str() {
        assert_eq!("stop".parse::<OverrideType>().unwrap(), OverrideType::Stop);
        assert!("pause".parse::<OverrideType>().is_err());
        assert_eq!(serde_json::to_value(OverrideType::Start).unwrap(), "start");
    }
}
