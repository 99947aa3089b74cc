use std::sync::Arc;
use tracing::debug;

use super::event::Occurrence;
use super::record::RecordKey;
use super::time::Clock;
use crate::store::{SharedStore, StoreError};

/// Folds occurrences into the durable daily counters.
#[derive(Clone)]
pub struct EventAggregator {
    store: SharedStore,
    clock: Arc<dyn Clock>,
}

impl EventAggregator {
    pub fn new(store: SharedStore, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Stamps a new occurrence with the current time.
    pub fn occurrence(&self, component: &str, event: &str) -> Occurrence {
        Occurrence::new(component, event, self.clock.now())
    }

    /// Read-merge-write under the store lock. Returns the new count of the
    /// occurrence's `(component, event, day)` counter.
    ///
    /// Only the touched key changes; every other record is written back as
    /// loaded.
    pub fn merge(&self, occurrence: &Occurrence) -> Result<u64, StoreError> {
        let day = self.clock.day_of(occurrence.observed_at);
        let key = RecordKey::new(&occurrence.component, &occurrence.event, day);

        let mut store = self.store.lock();
        let mut snapshot = store.load();
        let count = snapshot.increment(key);
        store.save(&snapshot)?;

        debug!(component = %occurrence.component, event = %occurrence.event, %day, count, "occurrence merged");
        Ok(count)
    }

    pub fn record(&self, component: &str, event: &str) -> Result<u64, StoreError> {
        self.merge(&self.occurrence(component, event))
    }
}
