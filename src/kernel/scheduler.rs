//! Upload scheduler: `Idle → (AwaitingUserChoice) → Uploading → Idle`.
//!
//! # CLEAR-ON-SUCCESS INVARIANT
//! Records leave the store only after the transport confirmed delivery of
//! exactly those records. A failed or in-flight attempt never touches the
//! store.
//!
//! # SINGLE FLIGHT
//! At most one attempt exists at a time. A check while uploading reports the
//! running attempt instead of starting another.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::policy::{decide, default_upload_interval, SkipReason, UploadDecision, UserChoice};
use super::record::Snapshot;
use super::time::Clock;
use crate::services::transport::{Transport, TransportError};
use crate::settings::SettingsStore;
use crate::store::SharedStore;

/// Correlates an in-flight transport call with where it is going.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadAttempt {
    pub id: Uuid,
    pub endpoint: String,
    pub started_at: DateTime<Utc>,
    pub records: usize,
}

/// What the host shows when asking the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPrompt {
    pub snapshot: Snapshot,
    /// Pretty-printed JSON of exactly what would be sent.
    pub preview: String,
    pub raised_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadState {
    Idle,
    AwaitingUserChoice(PendingPrompt),
    Uploading(UploadAttempt),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadReport {
    Delivered { attempt: Uuid, records: usize },
    Failed { attempt: Uuid, reason: String },
}

impl UploadReport {
    pub fn is_delivered(&self) -> bool {
        matches!(self, UploadReport::Delivered { .. })
    }
}

/// Handle on a dispatched upload. Dropping it does not cancel the upload.
#[derive(Debug)]
pub struct UploadTicket {
    pub attempt: UploadAttempt,
    done: oneshot::Receiver<UploadReport>,
}

impl UploadTicket {
    /// Resolves once the transport answered and the store was settled.
    pub async fn wait(self) -> UploadReport {
        let attempt = self.attempt.id;
        self.done.await.unwrap_or_else(|_| UploadReport::Failed {
            attempt,
            reason: "upload task ended without reporting".to_string(),
        })
    }
}

#[derive(Debug)]
pub enum UploadOutcome {
    Skipped(SkipReason),
    /// Eligible, but the snapshot is empty. Transport not contacted.
    NothingToSend,
    AwaitingUserChoice(PendingPrompt),
    Dispatched(UploadTicket),
    /// An attempt is already running.
    InFlight(UploadAttempt),
    /// The user answered a prompt with a non-sending choice.
    Declined(UserChoice),
    /// `resolve_user_choice` without an open prompt.
    NoPendingPrompt,
    /// The upload could not be started (no async runtime, unserializable
    /// snapshot). Nothing was sent and the store is untouched.
    NotStarted(String),
}

#[derive(Clone)]
pub struct UploadScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    settings: Arc<SettingsStore>,
    store: SharedStore,
    transport: Arc<dyn Transport>,
    endpoint: String,
    clock: Arc<dyn Clock>,
    interval: Duration,
    // Lock order: state, then store.
    state: Mutex<UploadState>,
}

impl UploadScheduler {
    pub fn new(
        settings: Arc<SettingsStore>,
        store: SharedStore,
        transport: Arc<dyn Transport>,
        endpoint: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_interval(settings, store, transport, endpoint, clock, default_upload_interval())
    }

    /// Like [`UploadScheduler::new`] with a custom spacing between uploads in
    /// `ask` mode.
    pub fn with_interval(
        settings: Arc<SettingsStore>,
        store: SharedStore,
        transport: Arc<dyn Transport>,
        endpoint: impl Into<String>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                store,
                transport,
                endpoint: endpoint.into(),
                clock,
                interval,
                state: Mutex::new(UploadState::Idle),
            }),
        }
    }

    pub fn state(&self) -> UploadState {
        self.inner.state.lock().clone()
    }

    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    /// Periodic / startup check, or an explicit "send now" when `force`.
    ///
    /// Never blocks on the network: an upload is spawned on the current
    /// Tokio runtime and reported through the returned ticket.
    pub fn check_and_maybe_upload(&self, force: bool) -> UploadOutcome {
        let mut state = self.inner.state.lock();
        match &*state {
            UploadState::Uploading(attempt) => return UploadOutcome::InFlight(attempt.clone()),
            UploadState::AwaitingUserChoice(prompt) if !force => {
                return UploadOutcome::AwaitingUserChoice(prompt.clone())
            }
            _ => {}
        }

        let policy = self.inner.settings.send_policy();
        match decide(&policy, force, self.inner.interval, self.inner.clock.now()) {
            UploadDecision::Skip(reason) => {
                *state = UploadState::Idle;
                UploadOutcome::Skipped(reason)
            }
            UploadDecision::Prompt => self.raise_prompt(&mut state),
            UploadDecision::Upload => self.start_upload(&mut state),
        }
    }

    /// Applies the user's answer to the open prompt.
    ///
    /// `always`/`never` become the sticky send mode. With `remember`, the
    /// one-time answers are stored so later checks stop asking.
    pub fn resolve_user_choice(&self, choice: UserChoice, remember: bool) -> UploadOutcome {
        let mut state = self.inner.state.lock();
        if !matches!(*state, UploadState::AwaitingUserChoice(_)) {
            return UploadOutcome::NoPendingPrompt;
        }

        let settings = &self.inner.settings;
        if let Some(mode) = choice.sticky_mode() {
            if let Err(e) = settings.set_send_mode(mode) {
                warn!(error = %e, ?mode, "failed to persist send policy");
            }
        }
        if remember {
            if let Some(response) = choice.remembered_response() {
                if let Err(e) = settings.set_user_response(response) {
                    warn!(error = %e, ?response, "failed to persist user response");
                }
            }
        }

        if choice.sends() {
            self.start_upload(&mut state)
        } else {
            info!(?choice, "user declined the telemetry upload");
            *state = UploadState::Idle;
            UploadOutcome::Declined(choice)
        }
    }

    fn raise_prompt(&self, state: &mut UploadState) -> UploadOutcome {
        let snapshot = self.inner.store.snapshot();
        if snapshot.is_empty() {
            *state = UploadState::Idle;
            return UploadOutcome::NothingToSend;
        }
        let prompt = PendingPrompt {
            preview: snapshot.to_json_pretty().unwrap_or_default(),
            snapshot,
            raised_at: self.inner.clock.now(),
        };
        *state = UploadState::AwaitingUserChoice(prompt.clone());
        UploadOutcome::AwaitingUserChoice(prompt)
    }

    fn start_upload(&self, state: &mut UploadState) -> UploadOutcome {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!("no async runtime available, upload not started");
            *state = UploadState::Idle;
            return UploadOutcome::NotStarted("no async runtime".to_string());
        };

        let snapshot = self.inner.store.snapshot();
        if snapshot.is_empty() {
            info!("no logged events to send");
            *state = UploadState::Idle;
            return UploadOutcome::NothingToSend;
        }
        let payload = match snapshot.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "failed to serialize snapshot");
                *state = UploadState::Idle;
                return UploadOutcome::NotStarted(e.to_string());
            }
        };

        let attempt = UploadAttempt {
            id: Uuid::new_v4(),
            endpoint: self.inner.endpoint.clone(),
            started_at: self.inner.clock.now(),
            records: snapshot.len(),
        };
        *state = UploadState::Uploading(attempt.clone());
        info!(attempt = %attempt.id, records = attempt.records, endpoint = %attempt.endpoint, "uploading usage snapshot");

        let (tx, rx) = oneshot::channel();
        let inner = Arc::clone(&self.inner);
        let task_attempt = attempt.clone();
        runtime.spawn(async move {
            let result = inner.transport.send(&task_attempt.endpoint, payload).await;
            let report = inner.complete(&task_attempt, &snapshot, result);
            let _ = tx.send(report);
        });

        UploadOutcome::Dispatched(UploadTicket { attempt, done: rx })
    }
}

impl Inner {
    /// Completion path of a transport call. Always returns to `Idle`.
    fn complete(
        &self,
        attempt: &UploadAttempt,
        sent: &Snapshot,
        result: Result<(), TransportError>,
    ) -> UploadReport {
        let mut state = self.state.lock();
        let report = match result {
            Ok(()) => {
                self.settle(sent);
                if let Err(e) = self.settings.mark_sent(self.clock.now()) {
                    warn!(error = %e, "failed to record last upload time");
                }
                info!(attempt = %attempt.id, records = sent.len(), "logged events sent to server");
                UploadReport::Delivered {
                    attempt: attempt.id,
                    records: sent.len(),
                }
            }
            Err(e) => {
                warn!(attempt = %attempt.id, error = %e, "error sending logged events, keeping them for the next check");
                UploadReport::Failed {
                    attempt: attempt.id,
                    reason: e.to_string(),
                }
            }
        };
        *state = UploadState::Idle;
        report
    }

    /// Drops what was delivered. Occurrences merged while the upload was in
    /// flight stay behind.
    fn settle(&self, sent: &Snapshot) {
        let mut store = self.store.lock();
        let remaining = store.load().subtract(sent);
        let result = if remaining.is_empty() {
            store.clear()
        } else {
            store.save(&remaining)
        };
        if let Err(e) = result {
            error!(error = %e, "delivered records could not be removed and will be sent again");
        }
    }
}
