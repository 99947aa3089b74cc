use chrono::NaiveDate;
use std::sync::Arc;
use std::thread;
use tally::kernel::aggregator::EventAggregator;
use tally::kernel::record::RecordKey;
use tally::kernel::time::ManualClock;
use tally::store::{FileRecordStore, MemoryRecordStore, SharedStore};
use tempfile::TempDir;

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
}

#[test]
fn test_same_day_collapses_into_one_counter() {
    let store = SharedStore::new(MemoryRecordStore::new());
    let clock = Arc::new(ManualClock::at_day(day(1)));
    let aggregator = EventAggregator::new(store.clone(), clock.clone());

    for n in 1..=5 {
        assert_eq!(aggregator.record("ModuleA", "featureX").unwrap(), n);
        clock.advance(chrono::Duration::minutes(30));
    }

    let snap = store.snapshot();
    assert_eq!(snap.len(), 1, "Five occurrences on one day should be one record");
    assert_eq!(snap.count_of(&RecordKey::new("ModuleA", "featureX", day(1))), 5);
}

#[test]
fn test_different_days_are_distinct_records() {
    let store = SharedStore::new(MemoryRecordStore::new());
    let clock = Arc::new(ManualClock::at_day(day(1)));
    let aggregator = EventAggregator::new(store.clone(), clock.clone());

    aggregator.record("ModuleA", "featureX").unwrap();
    clock.set_day(day(2));
    aggregator.record("ModuleA", "featureX").unwrap();

    let snap = store.snapshot();
    assert_eq!(snap.len(), 2);
    assert_eq!(snap.count_of(&RecordKey::new("ModuleA", "featureX", day(1))), 1);
    assert_eq!(snap.count_of(&RecordKey::new("ModuleA", "featureX", day(2))), 1);
}

#[test]
fn test_merge_leaves_other_keys_untouched() {
    let store = SharedStore::new(MemoryRecordStore::new());
    let clock = Arc::new(ManualClock::at_day(day(3)));
    let aggregator = EventAggregator::new(store.clone(), clock);

    aggregator.record("A", "x").unwrap();
    aggregator.record("A", "x").unwrap();
    aggregator.record("B", "y").unwrap();
    aggregator.record("A", "z").unwrap();

    let snap = store.snapshot();
    assert_eq!(snap.len(), 3);
    assert_eq!(snap.count_of(&RecordKey::new("A", "x", day(3))), 2);
    assert_eq!(snap.count_of(&RecordKey::new("B", "y", day(3))), 1);
    assert_eq!(snap.count_of(&RecordKey::new("A", "z", day(3))), 1);
    // insertion order preserved
    let order: Vec<_> = snap.records().iter().map(|r| (r.component.as_str(), r.event.as_str())).collect();
    assert_eq!(order, vec![("A", "x"), ("B", "y"), ("A", "z")]);
}

#[test]
fn test_write_failure_is_reported() {
    let store = SharedStore::new(MemoryRecordStore::new().fail_writes());
    let aggregator = EventAggregator::new(store.clone(), Arc::new(ManualClock::at_day(day(1))));

    assert!(aggregator.record("A", "x").is_err());
    assert!(store.snapshot().is_empty(), "Failed write loses the occurrence");
}

#[test]
fn test_corrupt_store_is_replaced_by_fresh_counters() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("events.csv");
    std::fs::write(&path, "garbage\u{0}\n\"unterminated").unwrap();
    let store = SharedStore::new(FileRecordStore::new(&path));
    let aggregator = EventAggregator::new(store.clone(), Arc::new(ManualClock::at_day(day(1))));

    assert_eq!(aggregator.record("A", "x").unwrap(), 1);
    assert_eq!(store.snapshot().len(), 1);
}

#[test]
fn test_row_with_empty_component_does_not_block_recording() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("events.csv");
    std::fs::write(
        &path,
        "component,event,day,count\n,featureX,2024-01-01,2\nModuleA,featureX,2024-01-01,1\n",
    )
    .unwrap();
    let store = SharedStore::new(FileRecordStore::new(&path));
    let aggregator = EventAggregator::new(store.clone(), Arc::new(ManualClock::at_day(day(1))));

    for n in 1..=3 {
        assert_eq!(aggregator.record("ModuleA", "featureX").unwrap(), n);
    }

    let snap = store.snapshot();
    assert_eq!(snap.len(), 1);
    assert_eq!(snap.count_of(&RecordKey::new("ModuleA", "featureX", day(1))), 3);
}

#[test]
fn test_concurrent_recording_is_serialized() {
    let dir = TempDir::new().unwrap();
    let store = SharedStore::new(FileRecordStore::new(dir.path().join("events.csv")));
    let aggregator = EventAggregator::new(store.clone(), Arc::new(ManualClock::at_day(day(1))));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let aggregator = aggregator.clone();
            thread::spawn(move || {
                for _ in 0..25 {
                    aggregator.record("Shared", "click").unwrap();
                    aggregator.record(&format!("Worker{i}"), "click").unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let snap = store.snapshot();
    assert_eq!(snap.count_of(&RecordKey::new("Shared", "click", day(1))), 200, "No increment may be lost");
    assert_eq!(snap.len(), 9);
}
