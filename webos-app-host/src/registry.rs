//! Central application registry.
//!
//! Owns the catalog of installable apps and the index of running instances,
//! enforces desktop policy, and drives container creation and teardown on
//! launch and close.

use crate::builtin::builtin_apps;
use crate::container::{AppContainer, ContainerContext};
use crate::descriptor::{AppDescriptor, load_descriptors_from_dir};
use crate::error::{AppHostError, AppHostResult};
use crate::lifecycle::LifecycleState;
use crate::window::{WindowConfig, WindowManager, WindowOverrides};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use webos_types::{AppId, InstanceId, WindowId};

#[derive(Default)]
struct Catalog {
    apps: Vec<Arc<AppDescriptor>>,
    by_id: HashMap<AppId, Arc<AppDescriptor>>,
    /// Category names in first-registration order.
    categories: Vec<String>,
    by_category: HashMap<String, Vec<Arc<AppDescriptor>>>,
}

impl Catalog {
    fn insert(&mut self, descriptor: Arc<AppDescriptor>) {
        let category = descriptor.category().to_string();
        if !self.by_category.contains_key(&category) {
            self.categories.push(category.clone());
        }
        self.by_category
            .entry(category)
            .or_default()
            .push(Arc::clone(&descriptor));
        self.by_id.insert(descriptor.id.clone(), Arc::clone(&descriptor));
        self.apps.push(descriptor);
    }

    fn remove(&mut self, app_id: &AppId) -> Option<Arc<AppDescriptor>> {
        let descriptor = self.by_id.remove(app_id)?;
        self.apps.retain(|d| &d.id != app_id);
        let category = descriptor.category();
        let emptied = match self.by_category.get_mut(category) {
            Some(list) => {
                list.retain(|d| &d.id != app_id);
                list.is_empty()
            }
            None => false,
        };
        if emptied {
            self.by_category.remove(category);
            self.categories.retain(|c| c != category);
        }
        Some(descriptor)
    }
}

struct RunningApp {
    seq: u64,
    container: Arc<AppContainer>,
}

/// Summary of one running app instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunningAppInfo {
    pub window_id: WindowId,
    pub app_id: AppId,
    pub app_name: String,
    pub instance_id: InstanceId,
    pub state: LifecycleState,
}

pub struct AppRegistry {
    context: ContainerContext,
    catalog: RwLock<Catalog>,
    running: RwLock<HashMap<WindowId, RunningApp>>,
    window_manager: OnceLock<Arc<dyn WindowManager>>,
    ready: AtomicBool,
    launch_seq: AtomicU64,
    builtins: Vec<AppDescriptor>,
}

impl std::fmt::Debug for AppRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppRegistry")
            .field("ready", &self.is_initialized())
            .field("builtins", &self.builtins.len())
            .finish_non_exhaustive()
    }
}

impl AppRegistry {
    /// Creates a registry that installs the standard built-in apps on
    /// `initialize`.
    pub fn new(context: ContainerContext) -> Self {
        Self {
            context,
            catalog: RwLock::new(Catalog::default()),
            running: RwLock::new(HashMap::new()),
            window_manager: OnceLock::new(),
            ready: AtomicBool::new(false),
            launch_seq: AtomicU64::new(0),
            builtins: builtin_apps(),
        }
    }

    /// Replaces the built-in catalog installed on `initialize`.
    pub fn with_builtins(mut self, builtins: Vec<AppDescriptor>) -> Self {
        self.builtins = builtins;
        self
    }

    // ================================================================
    // Setup
    // ================================================================

    /// Stores the window manager and registers the built-in apps.
    pub async fn initialize(&self, window_manager: Arc<dyn WindowManager>) -> AppHostResult<()> {
        if self.window_manager.set(window_manager).is_err() {
            return Err(AppHostError::AlreadyInitialized);
        }

        let mut installed = 0;
        for descriptor in self.builtins.clone() {
            let app_id = descriptor.id.clone();
            match self.register_app(descriptor).await {
                Ok(()) => installed += 1,
                Err(AppHostError::DuplicateRegistration(_)) => {
                    debug!(app_id = %app_id, "Built-in app already registered, skipping");
                }
                Err(e) => warn!(app_id = %app_id, "Built-in app not installed: {}", e),
            }
        }

        self.ready.store(true, Ordering::Release);
        info!(builtins = installed, "App registry initialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    // ================================================================
    // Catalog
    // ================================================================

    /// Adds an app to the catalog.
    pub async fn register_app(&self, descriptor: AppDescriptor) -> AppHostResult<()> {
        descriptor.validate()?;

        if !self.context.policy.is_app_allowed(&descriptor.id) {
            return Err(AppHostError::PolicyDenied(format!(
                "app '{}' blocked by policy",
                descriptor.id
            )));
        }

        let mut catalog = self.catalog.write().await;
        if catalog.by_id.contains_key(&descriptor.id) {
            return Err(AppHostError::DuplicateRegistration(descriptor.id));
        }

        info!(
            app_id = %descriptor.id,
            category = %descriptor.category(),
            kind = ?descriptor.kind,
            "App registered"
        );
        catalog.insert(Arc::new(descriptor));
        Ok(())
    }

    /// Registers every valid descriptor found in `dir`. Returns how many
    /// were added; rejected descriptors are logged and skipped.
    pub async fn register_apps_from_dir(&self, dir: &Path) -> AppHostResult<usize> {
        let mut added = 0;
        for descriptor in load_descriptors_from_dir(dir)? {
            let app_id = descriptor.id.clone();
            match self.register_app(descriptor).await {
                Ok(()) => added += 1,
                Err(e) => warn!(app_id = %app_id, "App from directory not registered: {}", e),
            }
        }
        Ok(added)
    }

    /// Removes an app from the catalog. Running instances keep running.
    pub async fn unregister_app(&self, app_id: &AppId) -> AppHostResult<()> {
        self.catalog
            .write()
            .await
            .remove(app_id)
            .ok_or_else(|| AppHostError::AppNotFound(app_id.clone()))?;
        info!(app_id = %app_id, "App unregistered");
        Ok(())
    }

    pub async fn registered_apps(&self) -> Vec<Arc<AppDescriptor>> {
        self.catalog.read().await.apps.clone()
    }

    pub async fn app(&self, app_id: &AppId) -> Option<Arc<AppDescriptor>> {
        self.catalog.read().await.by_id.get(app_id).cloned()
    }

    /// Apps in `category`, in registration order.
    pub async fn apps_by_category(&self, category: &str) -> Vec<Arc<AppDescriptor>> {
        self.catalog
            .read()
            .await
            .by_category
            .get(category)
            .cloned()
            .unwrap_or_default()
    }

    /// Category names in the order they were first seen.
    pub async fn categories(&self) -> Vec<String> {
        self.catalog.read().await.categories.clone()
    }

    // ================================================================
    // Launch / Close
    // ================================================================

    /// Starts a new instance of `app_id` in its own window.
    ///
    /// Every launch gets an independent container. Nothing is recorded
    /// unless the container initialized and the window manager produced an
    /// unused window id.
    pub async fn launch_app(
        &self,
        app_id: &AppId,
        overrides: WindowOverrides,
    ) -> AppHostResult<WindowId> {
        let window_manager = self.window_manager()?;

        let descriptor = self
            .app(app_id)
            .await
            .ok_or_else(|| AppHostError::AppNotFound(app_id.clone()))?;

        if !self.context.policy.is_app_allowed(app_id) {
            return Err(AppHostError::PolicyDenied(format!(
                "app '{app_id}' blocked by policy"
            )));
        }

        let mut container = AppContainer::new(Arc::clone(&descriptor), self.context.clone());
        container.initialize().await?;
        let container = Arc::new(container);

        let config = match self.window_config(&container, &descriptor, overrides) {
            Ok(config) => config,
            Err(e) => {
                container.teardown().await;
                return Err(e);
            }
        };

        let window_id = match window_manager.create_window(config).await {
            Ok(window_id) => window_id,
            Err(e) => {
                warn!(app_id = %app_id, "Window creation failed: {}", e);
                container.teardown().await;
                return Err(e.into());
            }
        };

        let window_id = self.admit(window_manager, container, window_id).await?;

        info!(app_id = %app_id, window_id = %window_id, "App launched");
        Ok(window_id)
    }

    /// Starts `container` in its new window and records it in the running
    /// index. On failure the container is torn down; the window is closed
    /// unless its id belongs to another running app.
    async fn admit(
        &self,
        window_manager: &Arc<dyn WindowManager>,
        container: Arc<AppContainer>,
        window_id: WindowId,
    ) -> AppHostResult<WindowId> {
        if let Err(e) = container.start(window_id.clone()) {
            container.teardown().await;
            close_window(window_manager, &window_id).await;
            return Err(e);
        }

        let duplicate = {
            let mut running = self.running.write().await;
            if running.contains_key(&window_id) {
                true
            } else {
                running.insert(
                    window_id.clone(),
                    RunningApp {
                        seq: self.launch_seq.fetch_add(1, Ordering::Relaxed),
                        container: Arc::clone(&container),
                    },
                );
                false
            }
        };
        if duplicate {
            warn!(app_id = %container.app_id(), window_id = %window_id, "Window manager reused a live window id");
            container.teardown().await;
            return Err(AppHostError::DuplicateWindow(window_id));
        }

        debug!(
            app_id = %container.app_id(),
            instance_id = %container.instance_id(),
            window_id = %window_id,
            "Container admitted to running index"
        );
        Ok(window_id)
    }

    fn window_config(
        &self,
        container: &AppContainer,
        descriptor: &AppDescriptor,
        overrides: WindowOverrides,
    ) -> AppHostResult<WindowConfig> {
        let props = container.app_props()?;
        let component = container
            .component()
            .cloned()
            .ok_or_else(|| AppHostError::ContainerNotInitialized(descriptor.id.clone()))?;
        Ok(WindowConfig::merged(descriptor, component, props, overrides))
    }

    /// Closes the app running in `window_id` and releases its container.
    pub async fn close_app(&self, window_id: &WindowId) -> AppHostResult<()> {
        let entry = self
            .running
            .write()
            .await
            .remove(window_id)
            .ok_or_else(|| AppHostError::WindowNotFound(window_id.clone()))?;

        entry.container.teardown().await;
        if let Some(window_manager) = self.window_manager.get() {
            close_window(window_manager, window_id).await;
        }

        info!(app_id = %entry.container.app_id(), window_id = %window_id, "App closed");
        Ok(())
    }

    /// Closes every running app and shuts the message bus down. Returns how
    /// many apps were closed.
    pub async fn shutdown(&self) -> usize {
        let mut entries: Vec<(WindowId, RunningApp)> =
            self.running.write().await.drain().collect();
        entries.sort_by_key(|(_, entry)| entry.seq);

        for (window_id, entry) in &entries {
            entry.container.teardown().await;
            if let Some(window_manager) = self.window_manager.get() {
                close_window(window_manager, window_id).await;
            }
        }
        self.context.bus.shutdown();

        info!(closed = entries.len(), "App registry shut down");
        entries.len()
    }

    // ================================================================
    // Queries
    // ================================================================

    /// Running instances in launch order.
    pub async fn running_apps(&self) -> Vec<RunningAppInfo> {
        let running = self.running.read().await;
        let mut entries: Vec<(&WindowId, &RunningApp)> = running.iter().collect();
        entries.sort_by_key(|(_, entry)| entry.seq);
        entries
            .into_iter()
            .map(|(window_id, entry)| RunningAppInfo {
                window_id: window_id.clone(),
                app_id: entry.container.app_id().clone(),
                app_name: entry.container.descriptor().name.clone(),
                instance_id: entry.container.instance_id(),
                state: entry.container.lifecycle().state(),
            })
            .collect()
    }

    pub async fn running_count(&self) -> usize {
        self.running.read().await.len()
    }

    pub async fn container(&self, window_id: &WindowId) -> Option<Arc<AppContainer>> {
        self.running
            .read()
            .await
            .get(window_id)
            .map(|entry| Arc::clone(&entry.container))
    }

    pub fn context(&self) -> &ContainerContext {
        &self.context
    }

    fn window_manager(&self) -> AppHostResult<&Arc<dyn WindowManager>> {
        match self.window_manager.get() {
            Some(window_manager) if self.is_initialized() => Ok(window_manager),
            _ => Err(AppHostError::RegistryNotInitialized),
        }
    }
}

async fn close_window(window_manager: &Arc<dyn WindowManager>, window_id: &WindowId) {
    if let Err(e) = window_manager.close_window(window_id).await {
        warn!(window_id = %window_id, "Window manager close failed: {}", e);
    }
}
