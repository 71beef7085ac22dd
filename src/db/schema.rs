//! SQL schema definitions

/// Tables every store has carried since its first version. Created on open;
/// left untouched when they already exist in an older shape.
pub const BASE_SCHEMA: &str = r#"
-- Features table
CREATE TABLE IF NOT EXISTS features (
    id INTEGER PRIMARY KEY,
    priority INTEGER NOT NULL DEFAULT 999,
    category VARCHAR(100) NOT NULL,
    name VARCHAR(255) NOT NULL,
    description TEXT NOT NULL,
    steps TEXT NOT NULL,
    passes BOOLEAN NOT NULL DEFAULT 0,
    in_progress BOOLEAN NOT NULL DEFAULT 0,
    dependencies TEXT DEFAULT NULL
);
"#;

/// Schedules and their overrides.
pub const SCHEDULE_TABLES: &str = r#"
-- Schedules table
CREATE TABLE IF NOT EXISTS schedules (
    id INTEGER PRIMARY KEY,
    project_name VARCHAR(50) NOT NULL,
    start_time VARCHAR(5) NOT NULL,
    duration_minutes INTEGER NOT NULL,
    days_of_week INTEGER NOT NULL DEFAULT 127,
    enabled BOOLEAN NOT NULL DEFAULT 1,
    yolo_mode BOOLEAN NOT NULL DEFAULT 0,
    model VARCHAR(50),
    max_concurrency INTEGER NOT NULL DEFAULT 3,
    crash_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

-- Schedule overrides table
CREATE TABLE IF NOT EXISTS schedule_overrides (
    id INTEGER PRIMARY KEY,
    schedule_id INTEGER NOT NULL,
    override_type VARCHAR(10) NOT NULL,
    expires_at TEXT NOT NULL,
    created_at TEXT NOT NULL,
    FOREIGN KEY (schedule_id) REFERENCES schedules(id) ON DELETE CASCADE
);
"#;

/// Indexes. Run last: some cover columns that older stores only gain
/// through migration.
pub const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS ix_features_priority ON features(priority);
CREATE INDEX IF NOT EXISTS ix_features_passes ON features(passes);
CREATE INDEX IF NOT EXISTS ix_features_in_progress ON features(in_progress);
CREATE INDEX IF NOT EXISTS ix_schedules_project_name ON schedules(project_name);
CREATE INDEX IF NOT EXISTS ix_schedules_enabled ON schedules(enabled);
CREATE INDEX IF NOT EXISTS ix_schedule_overrides_schedule_id ON schedule_overrides(schedule_id);
CREATE INDEX IF NOT EXISTS ix_schedule_overrides_expires_at ON schedule_overrides(expires_at);
"#;
