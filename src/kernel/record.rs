//! Aggregate records and the snapshot that holds them.
//!
//! # KEY INVARIANT
//! A snapshot never holds two records with the same `(component, event, day)`.
//! All growth goes through [`Snapshot::increment`] or [`Snapshot::add`], which
//! look the key up first.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

pub const DAY_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub component: String,
    pub event: String,
    pub day: NaiveDate,
}

impl RecordKey {
    pub fn new(component: &str, event: &str, day: NaiveDate) -> Self {
        Self {
            component: component.to_string(),
            event: event.to_string(),
            day,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("record has an empty component")]
    EmptyComponent,
    #[error("record has an empty event")]
    EmptyEvent,
    #[error("record for {component}/{event} has a zero count")]
    ZeroCount { component: String, event: String },
}

/// Persisted unit. Serializes to the upload wire shape
/// `{component, event, day, count}` with `day` as `YYYY-MM-DD`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateRecord {
    pub component: String,
    pub event: String,
    #[serde(with = "day_format")]
    pub day: NaiveDate,
    pub count: u64,
}

impl AggregateRecord {
    pub fn new(component: &str, event: &str, day: NaiveDate, count: u64) -> Self {
        Self {
            component: component.to_string(),
            event: event.to_string(),
            day,
            count,
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::new(&self.component, &self.event, self.day)
    }

    /// Schema check done before a record is allowed near the store.
    pub fn validate(&self) -> Result<(), RecordError> {
        if self.component.is_empty() {
            return Err(RecordError::EmptyComponent);
        }
        if self.event.is_empty() {
            return Err(RecordError::EmptyEvent);
        }
        if self.count == 0 {
            return Err(RecordError::ZeroCount {
                component: self.component.clone(),
                event: self.event.clone(),
            });
        }
        Ok(())
    }
}

/// Ordered set of aggregate records, unique by key.
///
/// Order is insertion order so that a load/save cycle leaves the file bytes
/// untouched.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    records: Vec<AggregateRecord>,
    index: HashMap<RecordKey, usize>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a snapshot, merging duplicate keys by summing their counts.
    pub fn from_records(records: impl IntoIterator<Item = AggregateRecord>) -> Self {
        let mut snapshot = Self::new();
        for record in records {
            let key = record.key();
            snapshot.add(key, record.count);
        }
        snapshot
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[AggregateRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<AggregateRecord> {
        self.records
    }

    pub fn get(&self, key: &RecordKey) -> Option<&AggregateRecord> {
        self.index.get(key).and_then(|&i| self.records.get(i))
    }

    pub fn count_of(&self, key: &RecordKey) -> u64 {
        self.get(key).map(|r| r.count).unwrap_or(0)
    }

    /// One more occurrence of `key`. Returns the new count.
    pub fn increment(&mut self, key: RecordKey) -> u64 {
        self.add(key, 1)
    }

    /// Adds `by` to the counter for `key`, creating it at zero first if absent.
    pub fn add(&mut self, key: RecordKey, by: u64) -> u64 {
        if by == 0 {
            return self.count_of(&key);
        }
        match self.index.get(&key) {
            Some(&i) => {
                let record = &mut self.records[i];
                record.count = record.count.saturating_add(by);
                record.count
            }
            None => {
                self.index.insert(key.clone(), self.records.len());
                self.records.push(AggregateRecord {
                    component: key.component,
                    event: key.event,
                    day: key.day,
                    count: by,
                });
                by
            }
        }
    }

    /// Removes what `sent` accounts for. Records whose count drops to zero
    /// disappear; anything merged after `sent` was taken survives.
    pub fn subtract(&self, sent: &Snapshot) -> Snapshot {
        let remaining = self.records.iter().filter_map(|record| {
            let left = record.count.saturating_sub(sent.count_of(&record.key()));
            (left > 0).then(|| AggregateRecord { count: left, ..record.clone() })
        });
        Snapshot::from_records(remaining)
    }

    pub fn validate(&self) -> Result<(), RecordError> {
        self.records.iter().try_for_each(AggregateRecord::validate)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.records)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.records)
    }
}

/// Equality ignores order.
impl PartialEq for Snapshot {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .records
                .iter()
                .all(|r| other.get(&r.key()).is_some_and(|o| o.count == r.count))
    }
}

impl Eq for Snapshot {}

mod day_format {
    use super::DAY_FORMAT;
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(day: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&day.format(DAY_FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        NaiveDate::parse_from_str(&raw, DAY_FORMAT).map_err(serde::de::Error::custom)
    }
}
