//! Application descriptors, the catalog record for an installable app.
//!
//! The JSON shape (`id, name, type, category, icon, description,
//! defaultSize, minSize, permissions, security{permissions,
//! isolationLevel}`) is kept verbatim so existing descriptor files load
//! unchanged.

use crate::component::ComponentKind;
use crate::error::{AppHostError, AppHostResult};
use crate::sandbox::{IsolationLevel, RestrictionRule};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};
use webos_types::AppId;

/// Category used when a descriptor does not name one.
pub const DEFAULT_CATEGORY: &str = "General";

/// Window width and height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSize {
    pub width: u32,
    pub height: u32,
}

impl WindowSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    fn fits_within(&self, other: &WindowSize) -> bool {
        self.width <= other.width && self.height <= other.height
    }
}

fn default_window_size() -> WindowSize {
    WindowSize::new(800, 600)
}

fn default_min_size() -> WindowSize {
    WindowSize::new(300, 200)
}

fn default_true() -> bool {
    true
}

/// Security section of a descriptor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityConfig {
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub isolation_level: IsolationLevel,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub restrictions: Vec<RestrictionRule>,
}

/// Static catalog entry for an application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppDescriptor {
    pub id: AppId,
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: ComponentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_window_size")]
    pub default_size: WindowSize,
    #[serde(default = "default_min_size")]
    pub min_size: WindowSize,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<SecurityConfig>,
    /// Source of an embedded frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Factory key for a ui-component; falls back to the app id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    #[serde(default = "default_true")]
    pub resizable: bool,
    #[serde(default = "default_true")]
    pub maximizable: bool,
    #[serde(default = "default_true")]
    pub minimizable: bool,
}

impl AppDescriptor {
    /// Creates a ui-component descriptor with default geometry and only
    /// `basic_access`.
    pub fn new(id: impl Into<AppId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: ComponentKind::default(),
            category: None,
            icon: None,
            description: None,
            default_size: default_window_size(),
            min_size: default_min_size(),
            permissions: vec!["basic_access".to_string()],
            security: None,
            url: None,
            component: None,
            resizable: true,
            maximizable: true,
            minimizable: true,
        }
    }

    pub fn with_kind(mut self, kind: ComponentKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_size(mut self, default_size: WindowSize, min_size: WindowSize) -> Self {
        self.default_size = default_size;
        self.min_size = min_size;
        self
    }

    pub fn with_permissions<S: Into<String>>(mut self, permissions: impl IntoIterator<Item = S>) -> Self {
        self.permissions = permissions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_security(mut self, security: SecurityConfig) -> Self {
        self.security = Some(security);
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    /// Returns the category, or `"General"` when unset.
    pub fn category(&self) -> &str {
        self.category
            .as_deref()
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_CATEGORY)
    }

    /// Returns the component factory key for ui-components.
    pub fn component_key(&self) -> &str {
        self.component.as_deref().unwrap_or(self.id.as_str())
    }

    /// Returns the security section, deriving one from the top-level
    /// permission list when the descriptor has none.
    pub fn security_config(&self) -> SecurityConfig {
        match &self.security {
            Some(security) => security.clone(),
            None => SecurityConfig {
                permissions: self.permissions.clone(),
                ..Default::default()
            },
        }
    }

    /// Checks the fields the catalog relies on.
    pub fn validate(&self) -> AppHostResult<()> {
        if !self.id.is_valid() {
            return Err(AppHostError::InvalidDescriptor(format!(
                "invalid app id '{}'",
                self.id
            )));
        }
        if self.name.trim().is_empty() {
            return Err(AppHostError::InvalidDescriptor(format!(
                "app '{}' has an empty name",
                self.id
            )));
        }
        if !self.min_size.fits_within(&self.default_size) {
            return Err(AppHostError::InvalidDescriptor(format!(
                "app '{}' has a minimum size larger than its default size",
                self.id
            )));
        }
        Ok(())
    }

    /// Parses a single descriptor from JSON.
    pub fn from_json(json: &str) -> AppHostResult<Self> {
        let descriptor: Self = serde_json::from_str(json)
            .map_err(|e| AppHostError::InvalidDescriptor(e.to_string()))?;
        descriptor.validate()?;
        Ok(descriptor)
    }
}

/// Loads every `*.json` descriptor in `dir`, sorted by file name.
/// Files that fail to parse are skipped with a warning.
pub fn load_descriptors_from_dir(dir: &Path) -> AppHostResult<Vec<AppDescriptor>> {
    let mut paths: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    let mut descriptors = Vec::with_capacity(paths.len());
    for path in paths {
        let contents = std::fs::read_to_string(&path)?;
        match AppDescriptor::from_json(&contents) {
            Ok(descriptor) => {
                debug!(app_id = %descriptor.id, path = ?path, "Loaded app descriptor");
                descriptors.push(descriptor);
            }
            Err(e) => warn!(path = ?path, "Skipping invalid app descriptor: {}", e),
        }
    }
    Ok(descriptors)
}
