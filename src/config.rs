use std::path::PathBuf;
use std::time::Duration;

use crate::kernel::policy::default_upload_interval;
use crate::paths;
use crate::services::transport::{DEFAULT_ENDPOINT, DEFAULT_TIMEOUT};

/// Where the agent keeps its files and where it uploads.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub endpoint: String,
    pub store_path: PathBuf,
    pub settings_path: PathBuf,
    /// Transport-level timeout. The upload policy itself has none.
    pub timeout: Duration,
    /// Spacing between uploads in `ask` mode.
    pub upload_interval: chrono::Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            store_path: paths::store_path(),
            settings_path: paths::settings_path(),
            timeout: DEFAULT_TIMEOUT,
            upload_interval: default_upload_interval(),
        }
    }
}
