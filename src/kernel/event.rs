use chrono::{DateTime, Utc};

/// A single "feature used" signal from the host. Never persisted on its own;
/// it only exists long enough to be gated and merged into the snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occurrence {
    pub component: String,
    pub event: String,
    pub observed_at: DateTime<Utc>,
}

impl Occurrence {
    pub fn new(component: &str, event: &str, observed_at: DateTime<Utc>) -> Self {
        Self {
            component: component.to_string(),
            event: event.to_string(),
            observed_at,
        }
    }
}

/// What happened to an occurrence handed to the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Merged into the durable snapshot.
    Recorded,
    /// Permission resolver said no. Nothing was read or written.
    Denied,
    /// Allowed, but the store write failed; the occurrence is lost.
    Dropped,
}
