use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

use super::record::Snapshot;

/// Totals a dashboard needs, computed from the current snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UsageSummary {
    pub total: u64,
    pub records: usize,
    pub by_component: BTreeMap<String, u64>,
    pub by_event: BTreeMap<String, u64>,
    pub by_day: BTreeMap<NaiveDate, u64>,
    pub first_day: Option<NaiveDate>,
    pub last_day: Option<NaiveDate>,
}

pub fn summarize(snapshot: &Snapshot) -> UsageSummary {
    let mut summary = UsageSummary {
        records: snapshot.len(),
        ..Default::default()
    };

    for record in snapshot.records() {
        summary.total += record.count;
        *summary.by_component.entry(record.component.clone()).or_default() += record.count;
        *summary.by_event.entry(record.event.clone()).or_default() += record.count;
        *summary.by_day.entry(record.day).or_default() += record.count;
    }

    summary.first_day = summary.by_day.keys().next().copied();
    summary.last_day = summary.by_day.keys().next_back().copied();
    summary
}
