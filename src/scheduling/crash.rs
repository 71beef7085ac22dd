//! Crash tracking within active windows

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::db::ScheduleRepository;
use crate::error::Result;

/// Per-schedule window state as seen by the scheduler loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowState {
    #[default]
    Idle,
    ActiveWindowOpen,
}

/// Outcome of feeding one evaluation result to [`CrashRecoveryCounter::observe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transition {
    /// Idle -> ActiveWindowOpen; the crash count was reset.
    Opened,
    /// ActiveWindowOpen -> Idle; the crash count is kept for diagnostics.
    Closed,
    Unchanged,
}

/// Tracks crashes per schedule across the scheduler loop's ticks.
///
/// The counter itself lives in the store (`schedules.crash_count`), so any
/// process can read it back. The window state is owned by the loop that
/// drives this tracker, which is the one observing the transitions. A fresh
/// tracker starts every schedule as `Idle`, so the first active observation
/// after a restart opens a new window.
pub struct CrashRecoveryCounter {
    schedules: ScheduleRepository,
    states: HashMap<i64, WindowState>,
}

impl CrashRecoveryCounter {
    pub fn new(schedules: ScheduleRepository) -> Self {
        Self {
            schedules,
            states: HashMap::new(),
        }
    }

    pub fn state(&self, schedule_id: i64) -> WindowState {
        self.states.get(&schedule_id).copied().unwrap_or_default()
    }

    /// Feed the evaluator's verdict for one tick.
    pub fn observe(&mut self, schedule_id: i64, active: bool) -> Result<Transition> {
        let transition = match (self.state(schedule_id), active) {
            (WindowState::Idle, true) => {
                self.schedules.reset_crash_count(schedule_id)?;
                self.states.insert(schedule_id, WindowState::ActiveWindowOpen);
                info!("Schedule {} window opened, crash count reset", schedule_id);
                Transition::Opened
            }
            (WindowState::ActiveWindowOpen, false) => {
                self.states.insert(schedule_id, WindowState::Idle);
                debug!("Schedule {} window closed", schedule_id);
                Transition::Closed
            }
            _ => Transition::Unchanged,
        };
        Ok(transition)
    }

    /// Count one crash. Returns the new count, or `None` when no window is open.
    pub fn record_crash(&mut self, schedule_id: i64) -> Result<Option<u32>> {
        if self.state(schedule_id) != WindowState::ActiveWindowOpen {
            warn!(
                "Ignoring crash report for schedule {} outside an active window",
                schedule_id
            );
            return Ok(None);
        }
        let count = self.schedules.increment_crash_count(schedule_id)?;
        info!("Schedule {} crash count now {}", schedule_id, count);
        Ok(Some(count))
    }

    /// Persisted count; after a window closes this is the last window's tally.
    pub fn crash_count(&self, schedule_id: i64) -> Result<u32> {
        self.schedules.crash_count(schedule_id)
    }

    /// Drop in-memory state for a schedule that no longer exists.
    pub fn forget(&mut self, schedule_id: i64) {
        self.states.remove(&schedule_id);
    }
}
