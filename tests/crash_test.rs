// Tests for crash counting across window transitions

use agentsched::config::StoreConfig;
use agentsched::db::filesystem::FixedClassifier;
use agentsched::db::{FsKind, OverrideRepository, ScheduleRepository, Store};
use agentsched::scheduling::{
    CrashRecoveryCounter, NewSchedule, OverrideType, ScheduleEvaluator, Transition, WindowState,
};
use agentsched::StoreError;
use chrono::{DateTime, Duration, Utc};
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

fn setup() -> (CrashRecoveryCounter, ScheduleRepository, i64, TempDir) {
    let (store, temp) = create_test_store();
    let schedules = ScheduleRepository::new(store);
    let id = schedules
        .create(&NewSchedule::new("demo", "09:00", 60))
        .unwrap()
        .id;
    (CrashRecoveryCounter::new(schedules.clone()), schedules, id, temp)
}

#[test]
fn test_starts_idle() {
    let (counter, _schedules, id, _temp) = setup();
    assert_eq!(counter.state(id), WindowState::Idle);
    assert_eq!(counter.crash_count(id).unwrap(), 0);
}

#[test]
fn test_crashes_count_while_window_open() {
    let (mut counter, _schedules, id, _temp) = setup();

    assert_eq!(counter.observe(id, true).unwrap(), Transition::Opened);
    assert_eq!(counter.state(id), WindowState::ActiveWindowOpen);
    assert_eq!(counter.record_crash(id).unwrap(), Some(1));
    assert_eq!(counter.record_crash(id).unwrap(), Some(2));
    assert_eq!(counter.record_crash(id).unwrap(), Some(3));
    assert_eq!(counter.crash_count(id).unwrap(), 3);
}

#[test]
fn test_repeated_active_ticks_do_not_reset() {
    let (mut counter, _schedules, id, _temp) = setup();

    counter.observe(id, true).unwrap();
    counter.record_crash(id).unwrap();
    for _ in 0..5 {
        assert_eq!(counter.observe(id, true).unwrap(), Transition::Unchanged);
    }
    assert_eq!(counter.crash_count(id).unwrap(), 1);
}

#[test]
fn test_count_survives_close_and_resets_on_next_open() {
    let (mut counter, schedules, id, _temp) = setup();

    counter.observe(id, true).unwrap();
    counter.record_crash(id).unwrap();
    counter.record_crash(id).unwrap();

    assert_eq!(counter.observe(id, false).unwrap(), Transition::Closed);
    assert_eq!(counter.observe(id, false).unwrap(), Transition::Unchanged);
    assert_eq!(counter.crash_count(id).unwrap(), 2);
    assert_eq!(schedules.get(id).unwrap().unwrap().crash_count, 2);

    assert_eq!(counter.observe(id, true).unwrap(), Transition::Opened);
    assert_eq!(counter.crash_count(id).unwrap(), 0);
}

#[test]
fn test_crash_while_idle_is_ignored() {
    let (mut counter, _schedules, id, _temp) = setup();

    assert_eq!(counter.record_crash(id).unwrap(), None);
    assert_eq!(counter.crash_count(id).unwrap(), 0);

    counter.observe(id, true).unwrap();
    counter.record_crash(id).unwrap();
    counter.observe(id, false).unwrap();
    assert_eq!(counter.record_crash(id).unwrap(), None);
    assert_eq!(counter.crash_count(id).unwrap(), 1);
}

#[test]
fn test_fresh_counter_resets_on_first_active_tick() {
    let (mut counter, schedules, id, _temp) = setup();
    counter.observe(id, true).unwrap();
    counter.record_crash(id).unwrap();

    // A restarted scheduler loop knows nothing of the open window.
    let mut restarted = CrashRecoveryCounter::new(schedules.clone());
    assert_eq!(restarted.crash_count(id).unwrap(), 1);
    assert_eq!(restarted.observe(id, true).unwrap(), Transition::Opened);
    assert_eq!(restarted.crash_count(id).unwrap(), 0);
}

#[test]
fn test_schedules_are_tracked_independently() {
    let (mut counter, schedules, first, _temp) = setup();
    let second = schedules
        .create(&NewSchedule::new("other", "21:00", 60))
        .unwrap()
        .id;

    counter.observe(first, true).unwrap();
    counter.record_crash(first).unwrap();
    assert_eq!(counter.state(second), WindowState::Idle);
    assert_eq!(counter.record_crash(second).unwrap(), None);
    assert_eq!(counter.crash_count(second).unwrap(), 0);

    counter.forget(first);
    assert_eq!(counter.state(first), WindowState::Idle);
}

#[test]
fn test_missing_schedule_is_an_error() {
    let (mut counter, _schedules, _id, _temp) = setup();
    assert!(matches!(
        counter.observe(999, true),
        Err(StoreError::ScheduleNotFound(999))
    ));
    assert_eq!(counter.state(999), WindowState::Idle);
}

#[test]
fn test_driven_by_evaluator_ticks() {
    let (store, _temp) = create_test_store();
    let schedules = ScheduleRepository::new(store.clone());
    let overrides = OverrideRepository::new(store.clone());
    let schedule = schedules
        .create(&NewSchedule::new("demo", "23:30", 60))
        .unwrap();
    let mut counter = CrashRecoveryCounter::new(ScheduleRepository::new(store));

    let tick = |counter: &mut CrashRecoveryCounter, now: DateTime<Utc>| {
        let effective = overrides.list_effective(schedule.id, now).unwrap();
        let active = ScheduleEvaluator::is_active(&schedule, &effective, now);
        counter.observe(schedule.id, active).unwrap()
    };

    let t0: DateTime<Utc> = "2026-01-05T23:00:00Z".parse().unwrap();
    assert_eq!(tick(&mut counter, t0), Transition::Unchanged);
    assert_eq!(tick(&mut counter, t0 + Duration::minutes(35)), Transition::Opened);
    counter.record_crash(schedule.id).unwrap();

    // Still open after midnight.
    assert_eq!(tick(&mut counter, t0 + Duration::minutes(70)), Transition::Unchanged);
    counter.record_crash(schedule.id).unwrap();

    // A stop override closes the window early.
    overrides
        .create_at(
            schedule.id,
            OverrideType::Stop,
            Duration::minutes(30),
            t0 + Duration::minutes(75),
        )
        .unwrap();
    assert_eq!(tick(&mut counter, t0 + Duration::minutes(76)), Transition::Closed);
    assert_eq!(counter.crash_count(schedule.id).unwrap(), 2);
}
