//! Schedule override repository
//!
//! Overrides are never checked against each other on write. Which one applies
//! is decided at read time by [`ScheduleEvaluator`]: the newest unexpired one.

use chrono::{DateTime, Datelike, Duration, SubsecRound, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tracing::warn;

use super::{decode_timestamp, encode_timestamp};
use crate::db::Store;
use crate::error::{Result, StoreError, ValidationError};
use crate::scheduling::evaluator::ScheduleEvaluator;
use crate::scheduling::types::{OverrideType, ScheduleOverride};

struct OverrideRow {
    id: i64,
    schedule_id: i64,
    override_type: String,
    expires_at: String,
    created_at: String,
}

impl OverrideRow {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            schedule_id: row.get(1)?,
            override_type: row.get(2)?,
            expires_at: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    fn decode(self) -> Result<ScheduleOverride> {
        let override_type: OverrideType =
            self.override_type.parse().map_err(|e: ValidationError| StoreError::Decode {
                table: "schedule_overrides",
                detail: format!("override {}: {}", self.id, e),
            })?;
        Ok(ScheduleOverride {
            id: self.id,
            schedule_id: self.schedule_id,
            override_type,
            expires_at: decode_timestamp("schedule_overrides", &self.expires_at)?,
            created_at: decode_timestamp("schedule_overrides", &self.created_at)?,
        })
    }
}

/// Expiries past this year no longer encode as fixed-width RFC 3339.
const MAX_EXPIRY_YEAR: i32 = 9999;

#[derive(Clone)]
pub struct OverrideRepository {
    store: Store,
}

impl OverrideRepository {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Get the store reference
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Force `schedule_id` on or off for `ttl` from now.
    pub fn create(
        &self,
        schedule_id: i64,
        override_type: OverrideType,
        ttl: Duration,
    ) -> Result<ScheduleOverride> {
        self.create_at(schedule_id, override_type, ttl, Utc::now())
    }

    /// Like [`create`](Self::create) with an explicit creation instant.
    pub fn create_at(
        &self,
        schedule_id: i64,
        override_type: OverrideType,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<ScheduleOverride> {
        // Anything shorter would expire on creation once truncated.
        if ttl < Duration::microseconds(1) {
            return Err(ValidationError::OverrideTtl(ttl.num_seconds()).into());
        }
        // Stored at microsecond precision; keep the returned value identical.
        let now = now.trunc_subsecs(6);
        let expires_at = now
            .checked_add_signed(ttl)
            .filter(|at| at.year() <= MAX_EXPIRY_YEAR)
            .ok_or(ValidationError::OverrideTtl(ttl.num_seconds()))?
            .trunc_subsecs(6);

        let id = self.store.with_tx(|tx| {
            let exists = tx
                .query_row(
                    "SELECT 1 FROM schedules WHERE id = ?1",
                    params![schedule_id],
                    |row| row.get::<_, i64>(0),
                )
                .optional()?
                .is_some();
            if !exists {
                return Err(StoreError::ScheduleNotFound(schedule_id));
            }
            tx.execute(
                "INSERT INTO schedule_overrides (schedule_id, override_type, expires_at, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    schedule_id,
                    override_type.as_str(),
                    encode_timestamp(expires_at),
                    encode_timestamp(now),
                ],
            )?;
            Ok(tx.last_insert_rowid())
        })?;

        tracing::debug!(
            "Created {} override {} for schedule {} until {}",
            override_type.as_str(),
            id,
            schedule_id,
            expires_at
        );
        Ok(ScheduleOverride {
            id,
            schedule_id,
            override_type,
            expires_at,
            created_at: now,
        })
    }

    /// Every stored override for a schedule, expired or not, newest first.
    pub fn list_for_schedule(&self, schedule_id: i64) -> Result<Vec<ScheduleOverride>> {
        let conn = self.store.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, schedule_id, override_type, expires_at, created_at
             FROM schedule_overrides WHERE schedule_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![schedule_id], OverrideRow::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut overrides = rows
            .into_iter()
            .map(OverrideRow::decode)
            .collect::<Result<Vec<_>>>()?;
        overrides.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(overrides)
    }

    /// Unexpired overrides for a schedule, newest first. Stale rows that have
    /// not been swept yet are never returned.
    pub fn list_effective(
        &self,
        schedule_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduleOverride>> {
        let mut overrides = self.list_for_schedule(schedule_id)?;
        overrides.retain(|o| o.is_effective(now));
        Ok(overrides)
    }

    /// The override currently deciding the schedule's state, if any.
    pub fn latest_effective(
        &self,
        schedule_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<ScheduleOverride>> {
        let overrides = self.list_effective(schedule_id, now)?;
        Ok(ScheduleEvaluator::effective_override(schedule_id, &overrides, now).cloned())
    }

    /// Revoke a single override. Returns whether it existed.
    pub fn delete(&self, id: i64) -> Result<bool> {
        let deleted = self.store.with_tx(|tx| {
            Ok(tx.execute("DELETE FROM schedule_overrides WHERE id = ?1", params![id])?)
        })?;
        Ok(deleted > 0)
    }

    /// Delete overrides that have expired. Returns how many were removed.
    pub fn sweep_expired(&self) -> Result<usize> {
        self.sweep_expired_at(Utc::now())
    }

    /// Delete overrides with `expires_at <= now`.
    ///
    /// Expiry is decided on decoded timestamps, never on text comparison, and
    /// rows whose expiry cannot be read are kept. The scan and the deletes
    /// share one write transaction, and `create` only inserts rows expiring
    /// after its own `now`, so a concurrent create is never swept.
    pub fn sweep_expired_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let removed = self.store.with_tx(|tx| {
            let candidates = {
                let mut stmt = tx.prepare("SELECT id, expires_at FROM schedule_overrides")?;
                let rows = stmt.query_map([], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
                })?;
                rows.collect::<std::result::Result<Vec<_>, _>>()?
            };

            let mut removed = 0;
            for (id, raw) in candidates {
                match decode_timestamp("schedule_overrides", &raw) {
                    Ok(expires_at) if expires_at <= now => {
                        removed += tx.execute(
                            "DELETE FROM schedule_overrides WHERE id = ?1",
                            params![id],
                        )?;
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Keeping override {} with unreadable expiry: {}", id, e),
                }
            }
            Ok(removed)
        })?;

        if removed > 0 {
            tracing::debug!("Swept {} expired overrides", removed);
        }
        Ok(removed)
    }
}
