//! Upgrade-in-place migrations
//!
//! Steps are additive only and each one checks the live schema before acting,
//! so the sequence can run on every startup, on stores written by any older
//! version, and from several processes at once. Every step runs in its own
//! IMMEDIATE transaction, which serialises concurrent migrators on the write
//! lock; "already exists" outcomes from a racing peer are still tolerated.

use std::collections::HashSet;

use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;
use tracing::{debug, info};

use super::schema::{INDEXES, SCHEDULE_TABLES};
use crate::error::{Result, StoreError};

struct Migration {
    name: &'static str,
    /// Returns whether anything changed.
    apply: fn(&Connection) -> rusqlite::Result<bool>,
}

/// Fixed total order. Later steps may rely on earlier ones.
const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "add_features_in_progress",
        apply: add_features_in_progress,
    },
    Migration {
        name: "fix_null_feature_flags",
        apply: fix_null_feature_flags,
    },
    Migration {
        name: "add_features_dependencies",
        apply: add_features_dependencies,
    },
    Migration {
        name: "create_schedule_tables",
        apply: create_schedule_tables,
    },
    Migration {
        name: "add_schedule_crash_recovery_columns",
        apply: add_schedule_crash_recovery_columns,
    },
    Migration {
        name: "fix_null_schedule_flags",
        apply: fix_null_schedule_flags,
    },
    Migration {
        name: "create_indexes",
        apply: create_indexes,
    },
];

/// Schema version recorded in `PRAGMA user_version` once every step passed.
pub const SCHEMA_VERSION: u32 = MIGRATIONS.len() as u32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Steps that changed the schema or data on this run.
    pub applied: Vec<&'static str>,
    pub schema_version: u32,
}

/// Names of all steps, in execution order.
pub fn step_names() -> Vec<&'static str> {
    MIGRATIONS.iter().map(|m| m.name).collect()
}

/// Bring the store on `conn` up to the current schema.
///
/// Stops at the first failing step. Steps before it stay committed, the
/// failing one is rolled back.
pub fn run(conn: &mut Connection) -> Result<MigrationReport> {
    let mut applied = Vec::new();

    for step in MIGRATIONS {
        let fail = |source| StoreError::Migration {
            step: step.name,
            source,
        };

        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(fail)?;
        let changed = tolerate_existing((step.apply)(&tx)).map_err(fail)?;
        tx.commit().map_err(fail)?;

        if changed {
            info!("Applied migration: {}", step.name);
            applied.push(step.name);
        } else {
            debug!("Migration {} already applied", step.name);
        }
    }

    let current: i64 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(StoreError::from)?;
    // Never lower a version written by a newer build.
    if current < SCHEMA_VERSION as i64 {
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)
            .map_err(StoreError::from)?;
    }

    Ok(MigrationReport {
        applied,
        schema_version: SCHEMA_VERSION.max(current as u32),
    })
}

/// A peer that won the race may have added the column or table first.
fn tolerate_existing(result: rusqlite::Result<bool>) -> rusqlite::Result<bool> {
    match result {
        Err(rusqlite::Error::SqliteFailure(_, Some(msg)))
            if msg.contains("duplicate column name") || msg.contains("already exists") =>
        {
            Ok(false)
        }
        other => other,
    }
}

pub fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn table_columns(conn: &Connection, table: &str) -> rusqlite::Result<HashSet<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
    let mut columns = HashSet::new();
    for row in rows {
        columns.insert(row?);
    }
    Ok(columns)
}

fn add_column_if_missing(
    conn: &Connection,
    table: &str,
    column: &str,
    definition: &str,
) -> rusqlite::Result<bool> {
    if table_columns(conn, table)?.contains(column) {
        return Ok(false);
    }
    conn.execute(
        &format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, definition),
        [],
    )?;
    Ok(true)
}

fn add_features_in_progress(conn: &Connection) -> rusqlite::Result<bool> {
    add_column_if_missing(conn, "features", "in_progress", "BOOLEAN DEFAULT 0")
}

/// Legacy rows may hold NULL flags; NULL means false.
fn fix_null_feature_flags(conn: &Connection) -> rusqlite::Result<bool> {
    let passes = conn.execute("UPDATE features SET passes = 0 WHERE passes IS NULL", [])?;
    let in_progress = conn.execute(
        "UPDATE features SET in_progress = 0 WHERE in_progress IS NULL",
        [],
    )?;
    Ok(passes + in_progress > 0)
}

/// NULL and `[]` both mean "no dependencies".
fn add_features_dependencies(conn: &Connection) -> rusqlite::Result<bool> {
    add_column_if_missing(conn, "features", "dependencies", "TEXT DEFAULT NULL")
}

fn create_schedule_tables(conn: &Connection) -> rusqlite::Result<bool> {
    let missing = !table_exists(conn, "schedules")? || !table_exists(conn, "schedule_overrides")?;
    if missing {
        conn.execute_batch(SCHEDULE_TABLES)?;
    }
    Ok(missing)
}

fn add_schedule_crash_recovery_columns(conn: &Connection) -> rusqlite::Result<bool> {
    let crash_count =
        add_column_if_missing(conn, "schedules", "crash_count", "INTEGER NOT NULL DEFAULT 0")?;
    let max_concurrency = add_column_if_missing(
        conn,
        "schedules",
        "max_concurrency",
        "INTEGER NOT NULL DEFAULT 3",
    )?;
    Ok(crash_count || max_concurrency)
}

/// Same rule as the feature flags: a NULL flag is off.
fn fix_null_schedule_flags(conn: &Connection) -> rusqlite::Result<bool> {
    let enabled = conn.execute("UPDATE schedules SET enabled = 0 WHERE enabled IS NULL", [])?;
    let yolo_mode = conn.execute(
        "UPDATE schedules SET yolo_mode = 0 WHERE yolo_mode IS NULL",
        [],
    )?;
    Ok(enabled + yolo_mode > 0)
}

fn create_indexes(conn: &Connection) -> rusqlite::Result<bool> {
    let before: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index'",
        [],
        |row| row.get(0),
    )?;
    conn.execute_batch(INDEXES)?;
    let after: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index'",
        [],
        |row| row.get(0),
    )?;
    Ok(after > before)
}
