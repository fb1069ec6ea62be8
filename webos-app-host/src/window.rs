//! Window manager contract.
//!
//! The registry only needs to ask for a window and, on close, tell the
//! window manager to drop it. Everything about drawing, focus and stacking
//! lives on the other side of this trait.

use crate::component::LoadedComponent;
use crate::container::AppProps;
use crate::descriptor::{AppDescriptor, WindowSize};
use crate::lock;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use webos_types::{AppId, WindowId};

#[derive(Debug, Error)]
pub enum WindowError {
    #[error("window manager unavailable: {0}")]
    Unavailable(String),

    #[error("window rejected: {0}")]
    Rejected(String),

    #[error("unknown window: {0}")]
    UnknownWindow(WindowId),
}

/// Caller-supplied window settings. Set fields win over descriptor defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowOverrides {
    pub title: Option<String>,
    pub icon: Option<String>,
    pub default_size: Option<WindowSize>,
    pub min_size: Option<WindowSize>,
    pub resizable: Option<bool>,
    pub maximizable: Option<bool>,
    pub minimizable: Option<bool>,
}

/// Everything the window manager needs to open an app window.
#[derive(Debug, Clone)]
pub struct WindowConfig {
    pub title: String,
    pub component: LoadedComponent,
    pub props: AppProps,
    pub icon: Option<String>,
    pub default_size: WindowSize,
    pub min_size: WindowSize,
    pub resizable: bool,
    pub maximizable: bool,
    pub minimizable: bool,
}

impl WindowConfig {
    /// Merges descriptor defaults with caller overrides.
    pub fn merged(
        descriptor: &AppDescriptor,
        component: LoadedComponent,
        props: AppProps,
        overrides: WindowOverrides,
    ) -> Self {
        Self {
            title: overrides.title.unwrap_or_else(|| descriptor.name.clone()),
            component,
            props,
            icon: overrides.icon.or_else(|| descriptor.icon.clone()),
            default_size: overrides.default_size.unwrap_or(descriptor.default_size),
            min_size: overrides.min_size.unwrap_or(descriptor.min_size),
            resizable: overrides.resizable.unwrap_or(descriptor.resizable),
            maximizable: overrides.maximizable.unwrap_or(descriptor.maximizable),
            minimizable: overrides.minimizable.unwrap_or(descriptor.minimizable),
        }
    }
}

#[async_trait]
pub trait WindowManager: Send + Sync {
    async fn create_window(&self, config: WindowConfig) -> Result<WindowId, WindowError>;

    async fn close_window(&self, window_id: &WindowId) -> Result<(), WindowError> {
        let _ = window_id;
        Ok(())
    }
}

/// What a [`HeadlessWindowManager`] remembers about an open window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowRecord {
    pub window_id: WindowId,
    pub app_id: AppId,
    pub title: String,
    pub default_size: WindowSize,
    pub min_size: WindowSize,
    pub resizable: bool,
}

/// Window manager without a display. Issues `win-1`, `win-2`, ... and keeps
/// a record of open windows; used by tests and server-side embedding.
#[derive(Debug, Default)]
pub struct HeadlessWindowManager {
    next: AtomicU64,
    open: Mutex<Vec<WindowRecord>>,
}

impl HeadlessWindowManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_windows(&self) -> Vec<WindowRecord> {
        lock(&self.open).clone()
    }
}

#[async_trait]
impl WindowManager for HeadlessWindowManager {
    async fn create_window(&self, config: WindowConfig) -> Result<WindowId, WindowError> {
        let n = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        let window_id = WindowId::new(format!("win-{n}"));
        lock(&self.open).push(WindowRecord {
            window_id: window_id.clone(),
            app_id: config.props.app_id.clone(),
            title: config.title,
            default_size: config.default_size,
            min_size: config.min_size,
            resizable: config.resizable,
        });
        Ok(window_id)
    }

    async fn close_window(&self, window_id: &WindowId) -> Result<(), WindowError> {
        let mut open = lock(&self.open);
        let before = open.len();
        open.retain(|w| &w.window_id != window_id);
        if open.len() == before {
            return Err(WindowError::UnknownWindow(window_id.clone()));
        }
        Ok(())
    }
}
