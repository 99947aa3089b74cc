//! Per-component collection permission.
//!
//! # FAIL-CLOSED INVARIANT
//! Anything not explicitly allowed is not logged: unknown components, and
//! default-governed components while the global default is unset.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::warn;

use crate::settings::SettingsStore;

/// Global answer for default-governed components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DefaultPermission {
    Allow,
    Deny,
    #[default]
    Unset,
}

impl DefaultPermission {
    pub fn allows(self) -> bool {
        matches!(self, DefaultPermission::Allow)
    }

    pub fn from_option(value: Option<bool>) -> Self {
        match value {
            Some(true) => DefaultPermission::Allow,
            Some(false) => DefaultPermission::Deny,
            None => DefaultPermission::Unset,
        }
    }

    pub fn as_option(self) -> Option<bool> {
        match self {
            DefaultPermission::Allow => Some(true),
            DefaultPermission::Deny => Some(false),
            DefaultPermission::Unset => None,
        }
    }
}

/// Which of the three sets a component belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtensionState {
    Enabled,
    Disabled,
    Default,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionPolicy {
    pub enabled: BTreeSet<String>,
    pub disabled: BTreeSet<String>,
    pub default_governed: BTreeSet<String>,
    pub default_permission: DefaultPermission,
}

impl PermissionPolicy {
    /// Pure decision. Set lookups only.
    pub fn should_log(&self, component: &str) -> bool {
        match self.classify(component) {
            Some(ExtensionState::Enabled) => true,
            Some(ExtensionState::Disabled) => false,
            Some(ExtensionState::Default) => self.default_permission.allows(),
            None => false,
        }
    }

    pub fn classify(&self, component: &str) -> Option<ExtensionState> {
        if self.enabled.contains(component) {
            Some(ExtensionState::Enabled)
        } else if self.disabled.contains(component) {
            Some(ExtensionState::Disabled)
        } else if self.default_governed.contains(component) {
            Some(ExtensionState::Default)
        } else {
            None
        }
    }

    /// Moves `component` into exactly one set.
    pub fn set_state(&mut self, component: &str, state: ExtensionState) {
        self.enabled.remove(component);
        self.disabled.remove(component);
        self.default_governed.remove(component);
        let target = match state {
            ExtensionState::Enabled => &mut self.enabled,
            ExtensionState::Disabled => &mut self.disabled,
            ExtensionState::Default => &mut self.default_governed,
        };
        target.insert(component.to_string());
    }

    /// Puts a newly seen component under the global default.
    /// Returns false if it was already classified.
    pub fn register(&mut self, component: &str) -> bool {
        if self.classify(component).is_some() {
            return false;
        }
        self.default_governed.insert(component.to_string());
        true
    }

    /// Restores disjointness after reading hand-edited or legacy settings.
    /// Disabled beats enabled, enabled beats default.
    pub fn normalize(&mut self) -> bool {
        let mut changed = false;
        for name in self.disabled.iter() {
            if self.enabled.remove(name) | self.default_governed.remove(name) {
                warn!(component = %name, "component listed in several permission sets, keeping it disabled");
                changed = true;
            }
        }
        for name in self.enabled.iter() {
            if self.default_governed.remove(name) {
                warn!(component = %name, "component listed as enabled and default, keeping it enabled");
                changed = true;
            }
        }
        changed
    }
}

/// Gate in front of the aggregator. Reads the live policy from the settings
/// context on every call so user changes apply immediately.
#[derive(Clone)]
pub struct PermissionResolver {
    settings: Arc<SettingsStore>,
}

impl PermissionResolver {
    pub fn new(settings: Arc<SettingsStore>) -> Self {
        Self { settings }
    }

    pub fn should_log(&self, component: &str) -> bool {
        self.settings.with_permission_policy(|policy| policy.should_log(component))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(default_permission: DefaultPermission) -> PermissionPolicy {
        let mut p = PermissionPolicy {
            default_permission,
            ..Default::default()
        };
        p.set_state("On", ExtensionState::Enabled);
        p.set_state("Off", ExtensionState::Disabled);
        p.set_state("Dflt", ExtensionState::Default);
        p
    }

    #[test]
    fn test_truth_table() {
        for perm in [DefaultPermission::Allow, DefaultPermission::Deny, DefaultPermission::Unset] {
            let p = policy(perm);
            assert!(p.should_log("On"));
            assert!(!p.should_log("Off"));
            assert_eq!(p.should_log("Dflt"), perm == DefaultPermission::Allow);
            assert!(!p.should_log("Stranger"), "unknown component must fail closed");
        }
    }

    #[test]
    fn test_set_state_moves_between_sets() {
        let mut p = policy(DefaultPermission::Allow);
        p.set_state("Off", ExtensionState::Enabled);
        assert!(p.enabled.contains("Off"));
        assert!(!p.disabled.contains("Off"));
        assert_eq!(p.classify("Off"), Some(ExtensionState::Enabled));
    }

    #[test]
    fn test_register_only_new_components() {
        let mut p = policy(DefaultPermission::Deny);
        assert!(!p.register("On"));
        assert!(p.register("Fresh"));
        assert_eq!(p.classify("Fresh"), Some(ExtensionState::Default));
    }

    #[test]
    fn test_normalize_prefers_disabled() {
        let mut p = PermissionPolicy::default();
        p.enabled.insert("X".into());
        p.disabled.insert("X".into());
        p.default_governed.insert("X".into());
        p.enabled.insert("Y".into());
        p.default_governed.insert("Y".into());

        assert!(p.normalize());
        assert_eq!(p.classify("X"), Some(ExtensionState::Disabled));
        assert!(!p.enabled.contains("X") && !p.default_governed.contains("X"));
        assert_eq!(p.classify("Y"), Some(ExtensionState::Enabled));
        assert!(!p.default_governed.contains("Y"));
        assert!(!p.normalize());
    }
}
