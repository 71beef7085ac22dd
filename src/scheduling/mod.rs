//! Schedule evaluation and crash tracking

pub mod crash;
pub mod evaluator;
pub mod types;

pub use crash::{CrashRecoveryCounter, Transition, WindowState};
pub use evaluator::{ScheduleEvaluator, Window};
pub use types::{DaysOfWeek, NewSchedule, OverrideType, Schedule, ScheduleOverride, StartTime};
