//! Desktop policy engine. Reads `~/.webos/policy.toml` and enforces
//! admin-managed app allowlists, permission denials and isolation overrides.

use crate::permissions::Permission;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use webos_types::AppId;

/// Which apps may be registered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    /// Only listed apps can be registered.
    Allowlist,
    /// Every app except the blocked ones can be registered.
    Denylist,
    #[default]
    Unrestricted,
}

/// Policy configuration parsed from `policy.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub mode: PolicyMode,
    #[serde(default)]
    pub allowed_app_ids: Vec<String>,
    #[serde(default)]
    pub blocked_app_ids: Vec<String>,
    /// Permission names that are never granted, whatever the descriptor says.
    #[serde(default)]
    pub denied_permissions: HashSet<String>,
    #[serde(default)]
    pub force_high_isolation: bool,
}

/// Enforces desktop policy decisions.
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    config: PolicyConfig,
    policy_path: Option<PathBuf>,
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::with_config(PolicyConfig::default())
    }
}

impl PolicyEngine {
    /// Loads policy from `~/.webos/policy.toml` if it exists.
    pub fn load() -> Self {
        Self::load_from(config_dir().join("policy.toml"))
    }

    /// Loads policy from an explicit path.
    /// Missing, unreadable or malformed files fall back to unrestricted mode.
    pub fn load_from(policy_path: PathBuf) -> Self {
        if !policy_path.exists() {
            info!(path = ?policy_path, "No desktop policy, all apps allowed");
            return Self::default();
        }

        let config = read_policy(&policy_path).unwrap_or_else(|reason| {
            warn!(path = ?policy_path, "Ignoring desktop policy: {}", reason);
            PolicyConfig::default()
        });

        Self {
            config,
            policy_path: Some(policy_path),
        }
    }

    pub fn with_config(config: PolicyConfig) -> Self {
        Self {
            config,
            policy_path: None,
        }
    }

    /// Check if an app may be registered.
    pub fn is_app_allowed(&self, app_id: &AppId) -> bool {
        let listed = |ids: &[String]| ids.iter().any(|id| id == app_id.as_str());
        match self.config.mode {
            PolicyMode::Unrestricted => true,
            PolicyMode::Allowlist => listed(&self.config.allowed_app_ids),
            PolicyMode::Denylist => !listed(&self.config.blocked_app_ids),
        }
    }

    /// Check if a permission is withheld from every app.
    pub fn is_permission_denied_by_policy(&self, permission: Permission) -> bool {
        self.config.denied_permissions.contains(permission.name())
    }

    pub fn forces_high_isolation(&self) -> bool {
        self.config.force_high_isolation
    }

    pub fn has_policy_file(&self) -> bool {
        self.policy_path.is_some()
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }
}

fn read_policy(path: &Path) -> Result<PolicyConfig, String> {
    let contents = std::fs::read_to_string(path).map_err(|e| format!("unreadable: {e}"))?;
    let file: PolicyFile = toml::from_str(&contents).map_err(|e| format!("malformed: {e}"))?;
    info!(path = ?path, "Desktop policy loaded");
    Ok(file.into_config())
}

/// Raw TOML structure matching the policy.toml format.
#[derive(Deserialize)]
struct PolicyFile {
    #[serde(default)]
    policy: PolicySection,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
struct PolicySection {
    #[serde(default)]
    mode: PolicyMode,
    #[serde(default)]
    apps: AppLists,
    #[serde(default)]
    denied_permissions: Vec<String>,
    #[serde(default)]
    force_high_isolation: bool,
}

#[derive(Deserialize, Default)]
struct AppLists {
    #[serde(default)]
    allow: Vec<String>,
    #[serde(default)]
    block: Vec<String>,
}

impl PolicyFile {
    fn into_config(self) -> PolicyConfig {
        let denied_permissions = self
            .policy
            .denied_permissions
            .into_iter()
            .filter(|name| match name.parse::<Permission>() {
                Ok(_) => true,
                Err(e) => {
                    warn!("Ignoring denied permission in policy: {}", e);
                    false
                }
            })
            .collect();

        PolicyConfig {
            mode: self.policy.mode,
            allowed_app_ids: self.policy.apps.allow,
            blocked_app_ids: self.policy.apps.block,
            denied_permissions,
            force_high_isolation: self.policy.force_high_isolation,
        }
    }
}

/// Resolve the desktop config directory.
fn config_dir() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        Path::new(&home).join(".webos")
    } else if let Ok(home) = std::env::var("USERPROFILE") {
        Path::new(&home).join(".webos")
    } else {
        PathBuf::from(".webos")
    }
}
