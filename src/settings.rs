//! Settings context shared by the resolver, the aggregator host path and the
//! upload scheduler.
//!
//! JSON file using the host's key names. Reads never fail: a missing or
//! corrupt file yields defaults (fail-closed permission, `ask` policy). Every
//! mutation is written straight back.

use chrono::{DateTime, NaiveDateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::kernel::permission::{DefaultPermission, ExtensionState, PermissionPolicy};
use crate::kernel::policy::{SendMode, SendPolicy, UserResponse};

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to write settings to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize settings: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// On-disk shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct TelemetrySettings {
    #[serde(rename = "enabledExtensions", default, deserialize_with = "lenient")]
    enabled_extensions: BTreeSet<String>,
    #[serde(rename = "disabledExtensions", default, deserialize_with = "lenient")]
    disabled_extensions: BTreeSet<String>,
    #[serde(rename = "defaultExtensions", default, deserialize_with = "lenient")]
    default_extensions: BTreeSet<String>,
    #[serde(
        rename = "TelemetryDefaultPermission",
        default,
        deserialize_with = "lenient_permission"
    )]
    default_permission: Option<bool>,
    #[serde(rename = "TelemetrySendPolicy", default, deserialize_with = "lenient")]
    send_policy: SendMode,
    #[serde(rename = "TelemetryUserResponse", default, deserialize_with = "lenient")]
    user_response: UserResponse,
    #[serde(rename = "lastSent", default, deserialize_with = "lenient_timestamp")]
    last_sent: Option<DateTime<Utc>>,
}

impl TelemetrySettings {
    fn permission_policy(&self) -> PermissionPolicy {
        PermissionPolicy {
            enabled: self.enabled_extensions.clone(),
            disabled: self.disabled_extensions.clone(),
            default_governed: self.default_extensions.clone(),
            default_permission: DefaultPermission::from_option(self.default_permission),
        }
    }

    fn apply_permission_policy(&mut self, policy: PermissionPolicy) {
        self.enabled_extensions = policy.enabled;
        self.disabled_extensions = policy.disabled;
        self.default_extensions = policy.default_governed;
        self.default_permission = policy.default_permission.as_option();
    }

    fn send_policy(&self) -> SendPolicy {
        SendPolicy {
            mode: self.send_policy,
            last_sent: self.last_sent,
            user_response: self.user_response,
        }
    }
}

pub struct SettingsStore {
    path: Option<PathBuf>,
    data: RwLock<TelemetrySettings>,
    // Cached so the per-occurrence check does not rebuild sets.
    permissions: RwLock<PermissionPolicy>,
}

impl SettingsStore {
    /// Opens the settings file, falling back to defaults when it is missing
    /// or unreadable.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut data = read_settings(&path);
        let mut policy = data.permission_policy();
        if policy.normalize() {
            data.apply_permission_policy(policy.clone());
        }
        Self {
            path: Some(path),
            data: RwLock::new(data),
            permissions: RwLock::new(policy),
        }
    }

    /// Settings that live only for the lifetime of the process.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            data: RwLock::new(TelemetrySettings::default()),
            permissions: RwLock::new(PermissionPolicy::default()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn with_permission_policy<R>(&self, f: impl FnOnce(&PermissionPolicy) -> R) -> R {
        f(&self.permissions.read())
    }

    pub fn permission_policy(&self) -> PermissionPolicy {
        self.permissions.read().clone()
    }

    pub fn send_policy(&self) -> SendPolicy {
        self.data.read().send_policy()
    }

    pub fn default_permission(&self) -> DefaultPermission {
        self.permissions.read().default_permission
    }

    /// True until the user answered the first-run permission question.
    pub fn default_permission_unset(&self) -> bool {
        self.default_permission() == DefaultPermission::Unset
    }

    pub fn set_extension_state(&self, component: &str, state: ExtensionState) -> Result<(), SettingsError> {
        self.update_permissions(|policy| {
            policy.set_state(component, state);
            true
        })
    }

    /// Newly installed extensions follow the global default until the user
    /// classifies them. Returns whether the extension was new.
    pub fn register_extension(&self, component: &str) -> Result<bool, SettingsError> {
        let mut added = false;
        self.update_permissions(|policy| {
            added = policy.register(component);
            added
        })?;
        if added {
            info!(component = %component, "extension placed under default permission");
        }
        Ok(added)
    }

    pub fn set_default_permission(&self, allow: bool) -> Result<(), SettingsError> {
        self.update_permissions(|policy| {
            policy.default_permission = DefaultPermission::from_option(Some(allow));
            true
        })
    }

    pub fn set_send_mode(&self, mode: SendMode) -> Result<(), SettingsError> {
        self.update(|data| data.send_policy = mode)
    }

    pub fn set_user_response(&self, response: UserResponse) -> Result<(), SettingsError> {
        self.update(|data| data.user_response = response)
    }

    pub fn mark_sent(&self, at: DateTime<Utc>) -> Result<(), SettingsError> {
        self.update(|data| data.last_sent = Some(at))
    }

    fn update_permissions(
        &self,
        f: impl FnOnce(&mut PermissionPolicy) -> bool,
    ) -> Result<(), SettingsError> {
        let mut data = self.data.write();
        let mut permissions = self.permissions.write();
        let mut next = permissions.clone();
        if !f(&mut next) {
            return Ok(());
        }
        data.apply_permission_policy(next.clone());
        *permissions = next;
        self.persist(&data)
    }

    fn update(&self, f: impl FnOnce(&mut TelemetrySettings)) -> Result<(), SettingsError> {
        let mut data = self.data.write();
        f(&mut data);
        self.persist(&data)
    }

    fn persist(&self, data: &TelemetrySettings) -> Result<(), SettingsError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let serialized = serde_json::to_string_pretty(data)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| SettingsError::Io {
                path: path.clone(),
                source,
            })?;
        }
        fs::write(path, serialized).map_err(|source| SettingsError::Io {
            path: path.clone(),
            source,
        })
    }
}

fn read_settings(path: &Path) -> TelemetrySettings {
    if !path.exists() {
        return TelemetrySettings::default();
    }
    match fs::read_to_string(path) {
        Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "settings file is corrupt, using defaults");
            TelemetrySettings::default()
        }),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read settings, using defaults");
            TelemetrySettings::default()
        }
    }
}

/// A single unreadable key falls back to its default instead of discarding
/// the whole file.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(T::deserialize(value).unwrap_or_default())
}

/// Accepts `true`/`false`, `"true"`/`"false"` and null.
fn lenient_permission<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Bool(b) => Some(b),
        serde_json::Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

/// RFC 3339, or a naive ISO-8601 timestamp read as UTC.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    let serde_json::Value::String(raw) = value else {
        return Ok(None);
    };
    Ok(parse_timestamp(&raw))
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
