//! Host-facing entry points.
//!
//! The host calls [`TelemetryAgent::record_occurrence`] whenever an
//! instrumented feature fires and [`TelemetryAgent::check_and_maybe_upload`]
//! on its startup/periodic schedule or on an explicit "send now". Neither
//! ever returns an error: telemetry failures degrade to log lines.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::AgentConfig;
use crate::kernel::aggregator::EventAggregator;
use crate::kernel::event::RecordOutcome;
use crate::kernel::metrics::{summarize, UsageSummary};
use crate::kernel::permission::{PermissionPolicy, PermissionResolver};
use crate::kernel::policy::{self, default_upload_interval, SendPolicy, UserChoice};
use crate::kernel::record::Snapshot;
use crate::kernel::scheduler::{UploadOutcome, UploadScheduler, UploadState};
use crate::kernel::time::{Clock, SystemClock};
use crate::services::transport::{HttpTransport, Transport};
use crate::settings::SettingsStore;
use crate::store::{FileRecordStore, SharedStore};

pub struct TelemetryAgent {
    settings: Arc<SettingsStore>,
    store: SharedStore,
    resolver: PermissionResolver,
    aggregator: EventAggregator,
    scheduler: UploadScheduler,
}

impl TelemetryAgent {
    pub fn new(
        settings: Arc<SettingsStore>,
        store: SharedStore,
        transport: Arc<dyn Transport>,
        endpoint: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_interval(settings, store, transport, endpoint, clock, default_upload_interval())
    }

    /// Like [`TelemetryAgent::new`] with a custom spacing between uploads in
    /// `ask` mode.
    pub fn with_interval(
        settings: Arc<SettingsStore>,
        store: SharedStore,
        transport: Arc<dyn Transport>,
        endpoint: impl Into<String>,
        clock: Arc<dyn Clock>,
        interval: chrono::Duration,
    ) -> Self {
        Self {
            resolver: PermissionResolver::new(Arc::clone(&settings)),
            aggregator: EventAggregator::new(store.clone(), Arc::clone(&clock)),
            scheduler: UploadScheduler::with_interval(
                Arc::clone(&settings),
                store.clone(),
                transport,
                endpoint,
                clock,
                interval,
            ),
            settings,
            store,
        }
    }

    /// File-backed store and settings, HTTP transport, wall clock.
    pub fn from_config(config: &AgentConfig) -> Self {
        Self::with_interval(
            Arc::new(SettingsStore::open(&config.settings_path)),
            SharedStore::new(FileRecordStore::new(&config.store_path)),
            Arc::new(HttpTransport::new(config.timeout)),
            config.endpoint.clone(),
            Arc::new(SystemClock),
            config.upload_interval,
        )
    }

    /// Gate, then merge. Runs to completion on the calling thread.
    pub fn record_occurrence(&self, component: &str, event: &str) -> RecordOutcome {
        if !self.resolver.should_log(component) {
            debug!(component = %component, event = %event, "component not permitted, event not logged");
            return RecordOutcome::Denied;
        }
        match self.aggregator.record(component, event) {
            Ok(_) => RecordOutcome::Recorded,
            Err(e) => {
                warn!(component = %component, event = %event, error = %e, "failed to persist usage event");
                RecordOutcome::Dropped
            }
        }
    }

    pub fn check_and_maybe_upload(&self, force: bool) -> UploadOutcome {
        self.scheduler.check_and_maybe_upload(force)
    }

    pub fn resolve_user_choice(&self, choice: UserChoice, remember: bool) -> UploadOutcome {
        self.scheduler.resolve_user_choice(choice, remember)
    }

    /// Host hook for a freshly installed extension.
    pub fn on_extension_installed(&self, component: &str) -> bool {
        self.settings.register_extension(component).unwrap_or_else(|e| {
            warn!(component = %component, error = %e, "failed to register installed extension");
            false
        })
    }

    pub fn should_log(&self, component: &str) -> bool {
        self.resolver.should_log(component)
    }

    pub fn snapshot(&self) -> Snapshot {
        self.store.snapshot()
    }

    pub fn summary(&self) -> UsageSummary {
        summarize(&self.snapshot())
    }

    pub fn permission_policy(&self) -> PermissionPolicy {
        self.settings.permission_policy()
    }

    pub fn default_permission_unset(&self) -> bool {
        self.settings.default_permission_unset()
    }

    pub fn send_policy(&self) -> SendPolicy {
        self.settings.send_policy()
    }

    /// When `ask` mode next becomes due, `None` when nothing was ever sent.
    pub fn next_due(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        policy::next_due(&self.send_policy(), self.scheduler.interval())
    }

    pub fn upload_interval(&self) -> chrono::Duration {
        self.scheduler.interval()
    }

    pub fn upload_state(&self) -> UploadState {
        self.scheduler.state()
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }
}
