//! Default on-disk locations.

use std::path::PathBuf;

const APP_DIR: &str = "tally";

/// `<data_dir>/tally`, or `./tally` when the platform has no data dir.
pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

pub fn store_path() -> PathBuf {
    data_dir().join("telemetry_events.csv")
}

pub fn settings_path() -> PathBuf {
    data_dir().join("settings.json")
}
