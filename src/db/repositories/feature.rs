//! Feature repository (read side)
//!
//! Feature rows predate schedules and older stores carry NULL flags and
//! missing or free-form dependency lists. Rows are decoded once here into
//! fully-typed values; nothing downstream sees a NULL.

use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::Store;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feature {
    pub id: i64,
    pub priority: i64,
    pub category: String,
    pub name: String,
    pub description: String,
    pub steps: Vec<String>,
    pub passes: bool,
    pub in_progress: bool,
    /// IDs of features that must pass first. Empty means none.
    pub dependencies: Vec<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct NewFeature {
    pub priority: Option<i64>,
    pub category: String,
    pub name: String,
    pub description: String,
    pub steps: Vec<String>,
    pub dependencies: Vec<i64>,
}

struct FeatureRow {
    id: i64,
    priority: Option<i64>,
    category: Option<String>,
    name: Option<String>,
    description: Option<String>,
    steps: Option<String>,
    passes: Option<bool>,
    in_progress: Option<bool>,
    dependencies: Option<String>,
}

impl FeatureRow {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            priority: row.get(1)?,
            category: row.get(2)?,
            name: row.get(3)?,
            description: row.get(4)?,
            steps: row.get(5)?,
            passes: row.get(6)?,
            in_progress: row.get(7)?,
            dependencies: row.get(8)?,
        })
    }

    fn decode(self) -> Feature {
        Feature {
            id: self.id,
            priority: self.priority.unwrap_or(999),
            category: self.category.unwrap_or_default(),
            name: self.name.unwrap_or_default(),
            description: self.description.unwrap_or_default(),
            steps: decode_steps(self.steps.as_deref()),
            passes: self.passes.unwrap_or(false),
            in_progress: self.in_progress.unwrap_or(false),
            dependencies: decode_dependencies(self.dependencies.as_deref()),
        }
    }
}

/// NULL, empty, malformed and non-array values all mean "no dependencies".
/// Non-integer entries are dropped.
pub fn decode_dependencies(raw: Option<&str>) -> Vec<i64> {
    match raw.and_then(|s| serde_json::from_str::<Value>(s).ok()) {
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_i64).collect(),
        _ => Vec::new(),
    }
}

fn decode_steps(raw: Option<&str>) -> Vec<String> {
    match raw.and_then(|s| serde_json::from_str::<Value>(s).ok()) {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

const COLUMNS: &str =
    "id, priority, category, name, description, steps, passes, in_progress, dependencies";

pub struct FeatureRepository {
    store: Store,
}

impl FeatureRepository {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Insert a feature. Dependencies are stored as NULL when empty.
    pub fn insert(&self, new: &NewFeature) -> Result<i64> {
        let steps = serde_json::to_string(&new.steps).unwrap_or_else(|_| "[]".to_string());
        let dependencies = if new.dependencies.is_empty() {
            None
        } else {
            serde_json::to_string(&new.dependencies).ok()
        };

        let id = self.store.with_tx(|tx| {
            tx.execute(
                "INSERT INTO features (priority, category, name, description, steps,
                                       passes, in_progress, dependencies)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, 0, ?6)",
                params![
                    new.priority.unwrap_or(999),
                    new.category,
                    new.name,
                    new.description,
                    steps,
                    dependencies,
                ],
            )?;
            Ok(tx.last_insert_rowid())
        })?;
        tracing::debug!("Created feature: {}", id);
        Ok(id)
    }

    /// Get a feature by ID
    pub fn get(&self, id: i64) -> Result<Option<Feature>> {
        let conn = self.store.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM features WHERE id = ?1", COLUMNS),
                params![id],
                FeatureRow::from_row,
            )
            .optional()?;
        Ok(row.map(FeatureRow::decode))
    }

    /// List all features by priority
    pub fn list(&self) -> Result<Vec<Feature>> {
        let conn = self.store.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM features ORDER BY priority, id",
            COLUMNS
        ))?;
        let rows = stmt
            .query_map([], FeatureRow::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows.into_iter().map(FeatureRow::decode).collect())
    }
}
