use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;
use std::fs;
use std::sync::Arc;
use tally::kernel::event::RecordOutcome;
use tally::kernel::permission::ExtensionState;
use tally::kernel::policy::UserChoice;
use tally::kernel::record::RecordKey;
use tally::kernel::scheduler::UploadOutcome;
use tally::kernel::time::{Clock, ManualClock};
use tally::services::transport::{Transport, TransportError};
use tally::settings::SettingsStore;
use tally::store::{FileRecordStore, MemoryRecordStore, SharedStore};
use tally::TelemetryAgent;
use tempfile::TempDir;

#[derive(Default)]
struct AcceptingTransport {
    payloads: Mutex<Vec<String>>,
}

#[async_trait]
impl Transport for AcceptingTransport {
    async fn send(&self, _endpoint: &str, payload: String) -> Result<(), TransportError> {
        self.payloads.lock().push(payload);
        Ok(())
    }
}

fn day(m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, m, d).unwrap()
}

fn agent_with(
    settings: Arc<SettingsStore>,
    store: SharedStore,
    clock: Arc<ManualClock>,
) -> (TelemetryAgent, Arc<AcceptingTransport>) {
    let transport = Arc::new(AcceptingTransport::default());
    let agent = TelemetryAgent::new(settings, store, transport.clone(), "http://collector.test", clock);
    (agent, transport)
}

#[tokio::test]
async fn test_end_to_end_record_and_upload() {
    let dir = TempDir::new().unwrap();
    let store_path = dir.path().join("telemetry_events.csv");
    let settings = Arc::new(SettingsStore::open(dir.path().join("settings.json")));
    settings.set_extension_state("ModuleA", ExtensionState::Enabled).unwrap();
    let clock = Arc::new(ManualClock::at_day(day(1, 1)));
    let (agent, transport) = agent_with(
        settings.clone(),
        SharedStore::new(FileRecordStore::new(&store_path)),
        clock.clone(),
    );

    for _ in 0..3 {
        assert_eq!(agent.record_occurrence("ModuleA", "featureX"), RecordOutcome::Recorded);
    }
    clock.set_day(day(1, 2));
    agent.record_occurrence("ModuleA", "featureX");

    assert_eq!(
        fs::read_to_string(&store_path).unwrap(),
        "component,event,day,count\nModuleA,featureX,2024-01-01,3\nModuleA,featureX,2024-01-02,1\n"
    );

    // never sent before → ask
    let prompt = match agent.check_and_maybe_upload(false) {
        UploadOutcome::AwaitingUserChoice(prompt) => prompt,
        other => panic!("expected a prompt, got {other:?}"),
    };
    assert_eq!(prompt.snapshot.len(), 2);

    let report = match agent.resolve_user_choice(UserChoice::SendOnce, false) {
        UploadOutcome::Dispatched(ticket) => ticket.wait().await,
        other => panic!("expected dispatch, got {other:?}"),
    };
    assert!(report.is_delivered());

    assert_eq!(fs::read_to_string(&store_path).unwrap(), "component,event,day,count\n");
    assert_eq!(agent.send_policy().last_sent, Some(clock.now()));
    assert_eq!(transport.payloads.lock().len(), 1);

    // persisted across a restart
    let reopened = SettingsStore::open(dir.path().join("settings.json"));
    assert_eq!(reopened.send_policy().last_sent, Some(clock.now()));
}

#[tokio::test]
async fn test_permission_gates_before_any_store_access() {
    let dir = TempDir::new().unwrap();
    let store_path = dir.path().join("events.csv");
    let settings = Arc::new(SettingsStore::in_memory());
    settings.set_extension_state("Blocked", ExtensionState::Disabled).unwrap();
    settings.set_extension_state("Governed", ExtensionState::Default).unwrap();
    let (agent, _) = agent_with(
        settings.clone(),
        SharedStore::new(FileRecordStore::new(&store_path)),
        Arc::new(ManualClock::at_day(day(3, 1))),
    );

    assert_eq!(agent.record_occurrence("Blocked", "x"), RecordOutcome::Denied);
    assert_eq!(agent.record_occurrence("Unknown", "x"), RecordOutcome::Denied);
    assert_eq!(agent.record_occurrence("Governed", "x"), RecordOutcome::Denied, "Unset default denies");
    assert!(!store_path.exists(), "Denied occurrences must not touch the store");

    settings.set_default_permission(true).unwrap();
    assert_eq!(agent.record_occurrence("Governed", "x"), RecordOutcome::Recorded);
    assert_eq!(agent.record_occurrence("Unknown", "x"), RecordOutcome::Denied, "Unknown stays closed");

    settings.set_default_permission(false).unwrap();
    assert_eq!(agent.record_occurrence("Governed", "x"), RecordOutcome::Denied);
}

#[tokio::test]
async fn test_installed_extension_follows_default() {
    let settings = Arc::new(SettingsStore::in_memory());
    settings.set_default_permission(true).unwrap();
    let (agent, _) = agent_with(
        settings,
        SharedStore::new(MemoryRecordStore::new()),
        Arc::new(ManualClock::at_day(day(3, 1))),
    );

    assert!(!agent.should_log("FreshTool"));
    assert!(agent.on_extension_installed("FreshTool"));
    assert!(agent.should_log("FreshTool"));
    assert!(!agent.on_extension_installed("FreshTool"), "Second install is a no-op");
}

#[tokio::test]
async fn test_store_write_failure_never_reaches_host() {
    let settings = Arc::new(SettingsStore::in_memory());
    settings.set_extension_state("A", ExtensionState::Enabled).unwrap();
    let (agent, _) = agent_with(
        settings,
        SharedStore::new(MemoryRecordStore::new().fail_writes()),
        Arc::new(ManualClock::at_day(day(3, 1))),
    );

    assert_eq!(agent.record_occurrence("A", "x"), RecordOutcome::Dropped);
    assert!(agent.snapshot().is_empty());
}

#[tokio::test]
async fn test_summary_view() {
    let settings = Arc::new(SettingsStore::in_memory());
    settings.set_extension_state("A", ExtensionState::Enabled).unwrap();
    settings.set_extension_state("B", ExtensionState::Enabled).unwrap();
    let clock = Arc::new(ManualClock::at_day(day(5, 1)));
    let (agent, _) = agent_with(settings, SharedStore::new(MemoryRecordStore::new()), clock.clone());

    agent.record_occurrence("A", "open");
    agent.record_occurrence("A", "open");
    agent.record_occurrence("B", "open");
    clock.set_day(day(5, 3));
    agent.record_occurrence("A", "save");

    let summary = agent.summary();
    assert_eq!(summary.total, 4);
    assert_eq!(summary.records, 3);
    assert_eq!(summary.by_component["A"], 3);
    assert_eq!(summary.by_event["open"], 3);
    assert_eq!(summary.by_day[&day(5, 1)], 3);
    assert_eq!(summary.first_day, Some(day(5, 1)));
    assert_eq!(summary.last_day, Some(day(5, 3)));
    assert_eq!(agent.snapshot().count_of(&RecordKey::new("A", "save", day(5, 3))), 1);
}
