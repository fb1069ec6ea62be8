//! Component resolution for the three implementation kinds.
//!
//! UI components are looked up in a factory map populated at startup
//! (`component key → constructor`). Embedded frames become a sandboxed frame
//! descriptor. Native apps get a stub the host shell fills in.

use crate::descriptor::AppDescriptor;
use crate::error::{AppHostError, AppHostResult, InitStage};
use crate::sandbox::IsolationLevel;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};
use webos_types::AppId;

/// How an application is implemented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentKind {
    #[default]
    #[serde(rename = "ui-component", alias = "react")]
    UiComponent,
    #[serde(rename = "embedded-frame", alias = "iframe")]
    EmbeddedFrame,
    #[serde(rename = "native")]
    Native,
}

/// A UI component instance produced by a registered factory.
pub trait AppComponent: Send + Sync {
    fn name(&self) -> &str;
}

pub type ComponentFactory = Arc<dyn Fn() -> Arc<dyn AppComponent> + Send + Sync>;

/// Factory map from component key to constructor.
#[derive(Default)]
pub struct ComponentRegistry {
    factories: RwLock<HashMap<String, ComponentFactory>>,
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("keys", &self.keys())
            .finish()
    }
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory, replacing any previous one under the same key.
    pub fn register<F>(&self, key: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn AppComponent> + Send + Sync + 'static,
    {
        let key = key.into();
        debug!(component = %key, "Component factory registered");
        self.factories
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, Arc::new(factory));
    }

    pub fn contains(&self, key: &str) -> bool {
        self.factories
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .factories
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Builds a fresh component instance, if a factory is registered.
    pub fn resolve(&self, key: &str) -> Option<Arc<dyn AppComponent>> {
        let factory = self
            .factories
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()?;
        Some(factory())
    }
}

/// A sandboxed frame ready for the window manager to embed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameDescriptor {
    pub src: String,
    /// Frame sandbox attribute tokens.
    pub sandbox: Vec<&'static str>,
}

impl FrameDescriptor {
    fn new(src: String, isolation: IsolationLevel) -> Self {
        let sandbox = match isolation {
            IsolationLevel::Standard => {
                vec!["allow-scripts", "allow-same-origin", "allow-forms", "allow-popups"]
            }
            IsolationLevel::High => vec!["allow-scripts"],
        };
        Self { src, sandbox }
    }
}

/// The component a container hands to its window.
#[derive(Clone)]
pub enum LoadedComponent {
    Ui(Arc<dyn AppComponent>),
    Frame(FrameDescriptor),
    Native { app_id: AppId },
    /// Shown when a ui-component could not be resolved.
    Placeholder { app_id: AppId, reason: String },
}

impl fmt::Debug for LoadedComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ui(c) => f.debug_tuple("Ui").field(&c.name()).finish(),
            Self::Frame(frame) => f.debug_tuple("Frame").field(frame).finish(),
            Self::Native { app_id } => f.debug_struct("Native").field("app_id", app_id).finish(),
            Self::Placeholder { app_id, reason } => f
                .debug_struct("Placeholder")
                .field("app_id", app_id)
                .field("reason", reason)
                .finish(),
        }
    }
}

impl LoadedComponent {
    pub fn kind(&self) -> Option<ComponentKind> {
        match self {
            Self::Ui(_) => Some(ComponentKind::UiComponent),
            Self::Frame(_) => Some(ComponentKind::EmbeddedFrame),
            Self::Native { .. } => Some(ComponentKind::Native),
            Self::Placeholder { .. } => None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, Self::Placeholder { .. })
    }
}

/// Resolves the component for `descriptor`.
///
/// A missing ui-component factory degrades to a placeholder. An embedded
/// frame without a usable url fails initialization.
pub fn load_component(
    descriptor: &AppDescriptor,
    components: &ComponentRegistry,
    isolation: IsolationLevel,
) -> AppHostResult<LoadedComponent> {
    match descriptor.kind {
        ComponentKind::UiComponent => {
            let key = descriptor.component_key();
            match components.resolve(key) {
                Some(component) => Ok(LoadedComponent::Ui(component)),
                None => {
                    let reason = format!("no component registered under '{key}'");
                    warn!(app = %descriptor.name, app_id = %descriptor.id, "Component load failed, using placeholder: {}", reason);
                    Ok(LoadedComponent::Placeholder {
                        app_id: descriptor.id.clone(),
                        reason,
                    })
                }
            }
        }
        ComponentKind::EmbeddedFrame => {
            let src = descriptor
                .url
                .as_deref()
                .filter(|u| is_frame_source(u))
                .ok_or_else(|| AppHostError::InitializationFailed {
                    app_id: descriptor.id.clone(),
                    stage: InitStage::Component,
                    reason: "embedded-frame app needs an http(s) or root-relative url".into(),
                })?;
            Ok(LoadedComponent::Frame(FrameDescriptor::new(src.to_string(), isolation)))
        }
        ComponentKind::Native => Ok(LoadedComponent::Native {
            app_id: descriptor.id.clone(),
        }),
    }
}

fn is_frame_source(url: &str) -> bool {
    url.starts_with("https://") || url.starts_with("http://") || (url.starts_with('/') && !url.starts_with("//"))
}
