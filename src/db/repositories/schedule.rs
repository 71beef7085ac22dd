//! Schedule repository

use chrono::{SubsecRound, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{decode_timestamp, encode_timestamp};
use crate::db::Store;
use crate::error::{Result, StoreError};
use crate::scheduling::types::{
    DaysOfWeek, NewSchedule, Schedule, StartTime, DEFAULT_MAX_CONCURRENCY, MINUTES_PER_DAY,
};

const COLUMNS: &str = "id, project_name, start_time, duration_minutes, days_of_week, enabled,
                       yolo_mode, model, max_concurrency, crash_count, created_at";

/// A `schedules` row exactly as stored. Columns that older stores may hold as
/// NULL stay optional here and get their canonical default in `decode`.
struct ScheduleRow {
    id: i64,
    project_name: String,
    start_time: String,
    duration_minutes: i64,
    days_of_week: Option<i64>,
    enabled: Option<bool>,
    yolo_mode: Option<bool>,
    model: Option<String>,
    max_concurrency: Option<i64>,
    crash_count: Option<i64>,
    created_at: String,
}

impl ScheduleRow {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            project_name: row.get(1)?,
            start_time: row.get(2)?,
            duration_minutes: row.get(3)?,
            days_of_week: row.get(4)?,
            enabled: row.get(5)?,
            yolo_mode: row.get(6)?,
            model: row.get(7)?,
            max_concurrency: row.get(8)?,
            crash_count: row.get(9)?,
            created_at: row.get(10)?,
        })
    }

    fn decode(self) -> Result<Schedule> {
        let corrupt = |detail: String| StoreError::Decode {
            table: "schedules",
            detail: format!("schedule {}: {}", self.id, detail),
        };

        let start_time: StartTime = self
            .start_time
            .parse()
            .map_err(|e| corrupt(format!("{}", e)))?;
        let duration_minutes = u32::try_from(self.duration_minutes)
            .ok()
            .filter(|d| (1..=MINUTES_PER_DAY).contains(d))
            .ok_or_else(|| corrupt(format!("duration_minutes {}", self.duration_minutes)))?;
        let days_raw = self.days_of_week.unwrap_or(DaysOfWeek::ALL.bits() as i64);
        let days_of_week = u32::try_from(days_raw)
            .ok()
            .and_then(|mask| DaysOfWeek::new(mask).ok())
            .ok_or_else(|| corrupt(format!("days_of_week {}", days_raw)))?;
        let max_raw = self.max_concurrency.unwrap_or(DEFAULT_MAX_CONCURRENCY as i64);
        let max_concurrency = u8::try_from(max_raw)
            .ok()
            .filter(|m| (1..=5).contains(m))
            .ok_or_else(|| corrupt(format!("max_concurrency {}", max_raw)))?;
        let crash_count = u32::try_from(self.crash_count.unwrap_or(0).max(0)).unwrap_or(u32::MAX);

        Ok(Schedule {
            id: self.id,
            start_time,
            duration_minutes,
            days_of_week,
            enabled: self.enabled.unwrap_or(false),
            yolo_mode: self.yolo_mode.unwrap_or(false),
            model: self.model.filter(|m| !m.is_empty()),
            max_concurrency,
            crash_count,
            created_at: decode_timestamp("schedules", &self.created_at)?,
            project_name: self.project_name,
        })
    }
}

#[derive(Clone)]
pub struct ScheduleRepository {
    store: Store,
}

impl ScheduleRepository {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Get the store reference
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Validate and insert a new schedule
    pub fn create(&self, new: &NewSchedule) -> Result<Schedule> {
        let valid = new.validate()?;
        let created_at = Utc::now().trunc_subsecs(6);

        let id = self.store.with_tx(|tx| {
            tx.execute(
                "INSERT INTO schedules (project_name, start_time, duration_minutes, days_of_week,
                                        enabled, yolo_mode, model, max_concurrency,
                                        crash_count, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9)",
                params![
                    valid.project_name,
                    valid.start_time.to_string(),
                    valid.duration_minutes,
                    valid.days_of_week.bits(),
                    valid.enabled,
                    valid.yolo_mode,
                    valid.model,
                    valid.max_concurrency,
                    encode_timestamp(created_at),
                ],
            )?;
            Ok(tx.last_insert_rowid())
        })?;

        tracing::debug!("Created schedule {} for project {}", id, valid.project_name);
        Ok(Schedule {
            id,
            project_name: valid.project_name,
            start_time: valid.start_time,
            duration_minutes: valid.duration_minutes,
            days_of_week: valid.days_of_week,
            enabled: valid.enabled,
            yolo_mode: valid.yolo_mode,
            model: valid.model,
            max_concurrency: valid.max_concurrency,
            crash_count: 0,
            created_at,
        })
    }

    /// Get a schedule by ID
    pub fn get(&self, id: i64) -> Result<Option<Schedule>> {
        let conn = self.store.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM schedules WHERE id = ?1", COLUMNS),
                params![id],
                ScheduleRow::from_row,
            )
            .optional()?;
        row.map(ScheduleRow::decode).transpose()
    }

    /// List schedules, optionally for a single project
    pub fn list(&self, project_name: Option<&str>) -> Result<Vec<Schedule>> {
        let conn = self.store.conn()?;
        let rows = match project_name {
            Some(project) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM schedules WHERE project_name = ?1 ORDER BY id",
                    COLUMNS
                ))?;
                let rows = stmt.query_map(params![project], ScheduleRow::from_row)?;
                rows.collect::<std::result::Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt =
                    conn.prepare(&format!("SELECT {} FROM schedules ORDER BY id", COLUMNS))?;
                let rows = stmt.query_map([], ScheduleRow::from_row)?;
                rows.collect::<std::result::Result<Vec<_>, _>>()?
            }
        };
        rows.into_iter().map(ScheduleRow::decode).collect()
    }

    /// Replace every user-editable field. `crash_count` is left alone.
    pub fn update(&self, id: i64, new: &NewSchedule) -> Result<Schedule> {
        let valid = new.validate()?;
        let updated = self.store.with_tx(|tx| {
            Ok(tx.execute(
                "UPDATE schedules
                 SET project_name = ?1, start_time = ?2, duration_minutes = ?3, days_of_week = ?4,
                     enabled = ?5, yolo_mode = ?6, model = ?7, max_concurrency = ?8
                 WHERE id = ?9",
                params![
                    valid.project_name,
                    valid.start_time.to_string(),
                    valid.duration_minutes,
                    valid.days_of_week.bits(),
                    valid.enabled,
                    valid.yolo_mode,
                    valid.model,
                    valid.max_concurrency,
                    id,
                ],
            )?)
        })?;
        if updated == 0 {
            return Err(StoreError::ScheduleNotFound(id));
        }

        tracing::debug!("Updated schedule {}", id);
        self.get(id)?.ok_or(StoreError::ScheduleNotFound(id))
    }

    /// Flip the master switch
    pub fn set_enabled(&self, id: i64, enabled: bool) -> Result<()> {
        let updated = self.store.with_tx(|tx| {
            Ok(tx.execute(
                "UPDATE schedules SET enabled = ?1 WHERE id = ?2",
                params![enabled, id],
            )?)
        })?;
        if updated == 0 {
            return Err(StoreError::ScheduleNotFound(id));
        }
        tracing::debug!("Schedule {} enabled={}", id, enabled);
        Ok(())
    }

    /// Delete a schedule and its overrides in one transaction.
    /// Returns whether the schedule existed.
    pub fn delete(&self, id: i64) -> Result<bool> {
        let deleted = self.store.with_tx(|tx| {
            // Children first, in case foreign_keys is off on this connection.
            tx.execute(
                "DELETE FROM schedule_overrides WHERE schedule_id = ?1",
                params![id],
            )?;
            Ok(tx.execute("DELETE FROM schedules WHERE id = ?1", params![id])?)
        })?;
        tracing::debug!("Deleted schedule: {}", id);
        Ok(deleted > 0)
    }

    pub fn reset_crash_count(&self, id: i64) -> Result<()> {
        let updated = self.store.with_tx(|tx| {
            Ok(tx.execute(
                "UPDATE schedules SET crash_count = 0 WHERE id = ?1",
                params![id],
            )?)
        })?;
        if updated == 0 {
            return Err(StoreError::ScheduleNotFound(id));
        }
        Ok(())
    }

    /// Add one crash and return the new count.
    pub fn increment_crash_count(&self, id: i64) -> Result<u32> {
        let count: Option<i64> = self.store.with_tx(|tx| {
            let updated = tx.execute(
                "UPDATE schedules SET crash_count = COALESCE(crash_count, 0) + 1 WHERE id = ?1",
                params![id],
            )?;
            if updated == 0 {
                return Ok(None);
            }
            Ok(Some(tx.query_row(
                "SELECT crash_count FROM schedules WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )?))
        })?;
        let count = count.ok_or(StoreError::ScheduleNotFound(id))?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    pub fn crash_count(&self, id: i64) -> Result<u32> {
        let conn = self.store.conn()?;
        let count: Option<Option<i64>> = conn
            .query_row(
                "SELECT crash_count FROM schedules WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        match count {
            Some(raw) => Ok(u32::try_from(raw.unwrap_or(0).max(0)).unwrap_or(u32::MAX)),
            None => Err(StoreError::ScheduleNotFound(id)),
        }
    }
}
