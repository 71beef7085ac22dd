// Tests for store opening and the schedule repository

use std::time::Duration;

use agentsched::config::{JournalModeSetting, StoreConfig};
use agentsched::db::filesystem::FixedClassifier;
use agentsched::db::{FsKind, JournalMode, OverrideRepository, ScheduleRepository, Store};
use agentsched::scheduling::{NewSchedule, OverrideType};
use agentsched::{StoreError, ValidationError};
use tempfile::TempDir;

fn create_test_store() -> (Store, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let store = Store::open_with(
        temp_dir.path(),
        &StoreConfig::default(),
        &FixedClassifier(FsKind::Local),
    )
    .unwrap();
    (store, temp_dir)
}

#[test]
fn test_store_initialization() {
    let (store, temp) = create_test_store();
    assert_eq!(store.path(), temp.path().join("features.db"));
    assert!(store.path().exists());
    assert!(store.health_check());
}

#[test]
fn test_local_filesystem_uses_wal() {
    let (store, _temp) = create_test_store();
    assert_eq!(store.durability(), JournalMode::Wal);
    assert_eq!(store.journal_mode().unwrap(), "wal");
    assert_eq!(store.busy_timeout().unwrap(), Duration::from_secs(30));
}

#[test]
fn test_network_filesystem_uses_rollback_journal() {
    let temp = TempDir::new().unwrap();
    let store = Store::open_with(
        temp.path(),
        &StoreConfig::default(),
        &FixedClassifier(FsKind::Network),
    )
    .unwrap();
    assert_eq!(store.fs_kind(), FsKind::Network);
    assert_eq!(store.durability(), JournalMode::Delete);
    assert_eq!(store.journal_mode().unwrap(), "delete");
}

#[test]
fn test_configured_journal_mode_overrides_classification() {
    let temp = TempDir::new().unwrap();
    let config = StoreConfig {
        journal_mode: JournalModeSetting::Delete,
        busy_timeout_secs: 5,
        ..StoreConfig::default()
    };
    let store = Store::open_with(temp.path(), &config, &FixedClassifier(FsKind::Local)).unwrap();
    assert_eq!(store.journal_mode().unwrap(), "delete");
    assert_eq!(store.busy_timeout().unwrap(), Duration::from_secs(5));
}

#[test]
fn test_reopen_is_idempotent() {
    let (store, temp) = create_test_store();
    let repo = ScheduleRepository::new(store.clone());
    repo.create(&NewSchedule::new("demo", "09:00", 60)).unwrap();

    let reopened = Store::open_with(
        temp.path(),
        &StoreConfig::default(),
        &FixedClassifier(FsKind::Local),
    )
    .unwrap();
    assert_eq!(ScheduleRepository::new(reopened).list(None).unwrap().len(), 1);
}

#[test]
fn test_creates_missing_project_dir() {
    let temp = TempDir::new().unwrap();
    let project = temp.path().join("nested").join("project");
    let store = Store::open_with(
        &project,
        &StoreConfig::default(),
        &FixedClassifier(FsKind::Local),
    )
    .unwrap();
    assert!(store.path().starts_with(&project));
}

#[test]
fn test_journal_switch_blocked_by_reader_keeps_wal() {
    let (first, temp) = create_test_store();
    assert_eq!(first.durability(), JournalMode::Wal);

    // An open read transaction keeps the file from leaving WAL.
    let reader = rusqlite::Connection::open(first.path()).unwrap();
    reader.execute_batch("BEGIN").unwrap();
    let _: i64 = reader
        .query_row("SELECT COUNT(*) FROM schedules", [], |row| row.get(0))
        .unwrap();

    let config = StoreConfig {
        journal_mode: JournalModeSetting::Delete,
        busy_timeout_secs: 1,
        ..StoreConfig::default()
    };
    let second = Store::open_with(temp.path(), &config, &FixedClassifier(FsKind::Local)).unwrap();
    assert_eq!(second.durability(), JournalMode::Wal);
    assert_eq!(second.journal_mode().unwrap(), "wal");

    reader.execute_batch("COMMIT").unwrap();
}

#[test]
fn test_busy_store_is_retryable() {
    let temp = TempDir::new().unwrap();
    let config = StoreConfig {
        busy_timeout_secs: 1,
        ..StoreConfig::default()
    };
    let store = Store::open_with(temp.path(), &config, &FixedClassifier(FsKind::Local)).unwrap();
    let repo = ScheduleRepository::new(store.clone());

    // Another process holding the write lock past our lock-wait budget.
    let writer = rusqlite::Connection::open(store.path()).unwrap();
    writer.execute_batch("BEGIN IMMEDIATE").unwrap();

    let err = repo.create(&NewSchedule::new("demo", "09:00", 60)).unwrap_err();
    assert!(matches!(err, StoreError::Busy(_)), "unexpected error: {err}");
    assert!(err.is_retryable());

    writer.execute_batch("COMMIT").unwrap();
    assert!(repo.create(&NewSchedule::new("demo", "09:00", 60)).is_ok());
    assert_eq!(repo.list(None).unwrap().len(), 1);
}

#[test]
fn test_create_schedule_with_defaults() {
    let (store, _temp) = create_test_store();
    let repo = ScheduleRepository::new(store);

    let schedule = repo.create(&NewSchedule::new("demo", "22:15", 90)).unwrap();

    assert!(schedule.id > 0);
    assert_eq!(schedule.start_time.to_string(), "22:15");
    assert_eq!(schedule.days_of_week.bits(), 127);
    assert!(schedule.enabled);
    assert!(!schedule.yolo_mode);
    assert_eq!(schedule.model, None);
    assert_eq!(schedule.max_concurrency, 3);
    assert_eq!(schedule.crash_count, 0);

    let retrieved = repo.get(schedule.id).unwrap().unwrap();
    assert_eq!(retrieved.id, schedule.id);
    assert_eq!(retrieved.start_time, schedule.start_time);
    assert_eq!(retrieved.created_at, schedule.created_at);
}

#[test]
fn test_invalid_schedule_is_not_persisted() {
    let (store, _temp) = create_test_store();
    let repo = ScheduleRepository::new(store);

    let err = repo.create(&NewSchedule::new("demo", "25:00", 60)).unwrap_err();
    assert!(matches!(err, StoreError::Invalid(ValidationError::StartTime(_))));

    let err = repo
        .create(&NewSchedule::new("demo", "09:00", 60).days(200))
        .unwrap_err();
    assert!(matches!(err, StoreError::Invalid(ValidationError::DaysOfWeek(200))));

    let err = repo
        .create(&NewSchedule::new("demo", "09:00", 60).max_concurrency(0))
        .unwrap_err();
    assert!(!err.is_retryable());

    assert!(repo.list(None).unwrap().is_empty());
}

#[test]
fn test_schedule_not_found() {
    let (store, _temp) = create_test_store();
    let repo = ScheduleRepository::new(store);
    assert!(repo.get(42).unwrap().is_none());
    assert!(matches!(
        repo.set_enabled(42, false),
        Err(StoreError::ScheduleNotFound(42))
    ));
    assert!(!repo.delete(42).unwrap());
}

#[test]
fn test_list_filters_by_project() {
    let (store, _temp) = create_test_store();
    let repo = ScheduleRepository::new(store);

    repo.create(&NewSchedule::new("alpha", "09:00", 60)).unwrap();
    repo.create(&NewSchedule::new("alpha", "21:00", 60)).unwrap();
    repo.create(&NewSchedule::new("beta", "09:00", 60)).unwrap();

    assert_eq!(repo.list(Some("alpha")).unwrap().len(), 2);
    assert_eq!(repo.list(Some("beta")).unwrap().len(), 1);
    assert_eq!(repo.list(Some("gamma")).unwrap().len(), 0);
    assert_eq!(repo.list(None).unwrap().len(), 3);
}

#[test]
fn test_update_and_enable_toggle() {
    let (store, _temp) = create_test_store();
    let repo = ScheduleRepository::new(store);
    let schedule = repo.create(&NewSchedule::new("demo", "09:00", 60)).unwrap();
    repo.increment_crash_count(schedule.id).unwrap();

    let updated = repo
        .update(
            schedule.id,
            &NewSchedule::new("demo", "10:30", 45)
                .days(0b001_1111)
                .model("opus")
                .max_concurrency(5),
        )
        .unwrap();
    assert_eq!(updated.start_time.to_string(), "10:30");
    assert_eq!(updated.duration_minutes, 45);
    assert_eq!(updated.days_of_week.bits(), 31);
    assert_eq!(updated.model.as_deref(), Some("opus"));
    assert_eq!(updated.max_concurrency, 5);
    assert_eq!(updated.crash_count, 1);

    repo.set_enabled(schedule.id, false).unwrap();
    assert!(!repo.get(schedule.id).unwrap().unwrap().enabled);

    assert!(repo
        .update(schedule.id, &NewSchedule::new("demo", "10:30", 0))
        .is_err());
    assert_eq!(repo.get(schedule.id).unwrap().unwrap().duration_minutes, 45);
}

#[test]
fn test_delete_cascades_to_overrides() {
    let (store, _temp) = create_test_store();
    let schedules = ScheduleRepository::new(store.clone());
    let overrides = OverrideRepository::new(store.clone());

    let keep = schedules.create(&NewSchedule::new("demo", "09:00", 60)).unwrap();
    let doomed = schedules.create(&NewSchedule::new("demo", "21:00", 60)).unwrap();
    overrides
        .create(doomed.id, OverrideType::Start, chrono::Duration::minutes(30))
        .unwrap();
    overrides
        .create(doomed.id, OverrideType::Stop, chrono::Duration::minutes(30))
        .unwrap();
    overrides
        .create(keep.id, OverrideType::Stop, chrono::Duration::minutes(30))
        .unwrap();

    assert!(schedules.delete(doomed.id).unwrap());
    assert!(schedules.get(doomed.id).unwrap().is_none());
    assert!(overrides.list_for_schedule(doomed.id).unwrap().is_empty());
    assert_eq!(overrides.list_for_schedule(keep.id).unwrap().len(), 1);

    let conn = store.conn().unwrap();
    let orphans: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM schedule_overrides WHERE schedule_id = ?1",
            [doomed.id],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(orphans, 0);
}

#[test]
fn test_foreign_key_cascade_is_declared() {
    let (store, _temp) = create_test_store();
    let schedules = ScheduleRepository::new(store.clone());
    let overrides = OverrideRepository::new(store.clone());
    let schedule = schedules.create(&NewSchedule::new("demo", "09:00", 60)).unwrap();
    overrides
        .create(schedule.id, OverrideType::Start, chrono::Duration::minutes(10))
        .unwrap();

    // Bypass the repository: the storage-level cascade alone must clean up.
    let conn = store.conn().unwrap();
    conn.execute("DELETE FROM schedules WHERE id = ?1", [schedule.id])
        .unwrap();
    let remaining: i64 = conn
        .query_row("SELECT COUNT(*) FROM schedule_overrides", [], |row| row.get(0))
        .unwrap();
    assert_eq!(remaining, 0);
}

#[test]
fn test_transaction_rolls_back_on_error() {
    let (store, _temp) = create_test_store();
    let repo = ScheduleRepository::new(store.clone());
    let schedule = repo.create(&NewSchedule::new("demo", "09:00", 60)).unwrap();

    let result: agentsched::Result<()> = store.with_tx(|tx| {
        tx.execute("UPDATE schedules SET duration_minutes = 5 WHERE id = ?1", [schedule.id])?;
        Err(StoreError::ScheduleNotFound(schedule.id))
    });
    assert!(result.is_err());
    assert_eq!(repo.get(schedule.id).unwrap().unwrap().duration_minutes, 60);
}

#[test]
fn test_corrupt_row_is_a_decode_error() {
    let (store, _temp) = create_test_store();
    let repo = ScheduleRepository::new(store.clone());
    let schedule = repo.create(&NewSchedule::new("demo", "09:00", 60)).unwrap();

    store
        .conn()
        .unwrap()
        .execute("UPDATE schedules SET start_time = '9am' WHERE id = ?1", [schedule.id])
        .unwrap();
    assert!(matches!(
        repo.get(schedule.id),
        Err(StoreError::Decode { table: "schedules", .. })
    ));
}

#[test]
fn test_schedule_serializes_in_record_shape() {
    let (store, _temp) = create_test_store();
    let repo = ScheduleRepository::new(store);
    let schedule = repo.create(&NewSchedule::new("demo", "09:00", 60)).unwrap();

    let value = serde_json::to_value(&schedule).unwrap();
    for key in [
        "id",
        "projectName",
        "startTime",
        "durationMinutes",
        "daysOfWeek",
        "enabled",
        "yoloMode",
        "model",
        "maxConcurrency",
        "crashCount",
        "createdAt",
    ] {
        assert!(value.get(key).is_some(), "missing {key}");
    }
    assert_eq!(value["startTime"], "09:00");
}
