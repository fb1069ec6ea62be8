//! App container: one running instance of an application.
//!
//! A container owns its sandbox, lifecycle, state store, communication
//! endpoint and loaded component. `initialize` sets them up strictly in that
//! order; a failure at any stage releases what was already built and leaves
//! the container unusable. `teardown` releases everything on close.

use crate::auth::AuthClient;
use crate::bus::{AppCommunication, MessageBus};
use crate::component::{ComponentRegistry, LoadedComponent, load_component};
use crate::descriptor::AppDescriptor;
use crate::error::{AppHostError, AppHostResult, InitStage};
use crate::lifecycle::{AppLifecycle, LifecycleHooks, LifecycleState, NoopHooks};
use crate::permissions::Permission;
use crate::policy::PolicyEngine;
use crate::sandbox::{OperationContext, SandboxPolicy};
use crate::state::{AppStateStore, NoopPersistence, StatePersistence};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{error, info, warn};
use webos_types::{AppId, InstanceId, WindowId};

/// Shared collaborators handed to every container.
#[derive(Clone)]
pub struct ContainerContext {
    pub bus: Arc<MessageBus>,
    pub components: Arc<ComponentRegistry>,
    pub auth: Arc<dyn AuthClient>,
    pub persistence: Arc<dyn StatePersistence>,
    pub hooks: Arc<dyn LifecycleHooks>,
    pub policy: Arc<PolicyEngine>,
}

impl ContainerContext {
    /// Creates a context with no component factories, no persistence, no
    /// lifecycle hooks and an unrestricted policy.
    pub fn new(bus: Arc<MessageBus>, auth: Arc<dyn AuthClient>) -> Self {
        Self {
            bus,
            components: Arc::new(ComponentRegistry::new()),
            auth,
            persistence: Arc::new(NoopPersistence),
            hooks: Arc::new(NoopHooks),
            policy: Arc::new(PolicyEngine::default()),
        }
    }

    pub fn with_components(mut self, components: Arc<ComponentRegistry>) -> Self {
        self.components = components;
        self
    }

    pub fn with_persistence(mut self, persistence: Arc<dyn StatePersistence>) -> Self {
        self.persistence = persistence;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn LifecycleHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_policy(mut self, policy: PolicyEngine) -> Self {
        self.policy = Arc::new(policy);
        self
    }
}

/// The data surface a container exposes to its hosted UI.
#[derive(Clone)]
pub struct AppProps {
    pub app_id: AppId,
    pub app_name: String,
    pub comms: Arc<AppCommunication>,
    pub state: Arc<AppStateStore>,
    pub permissions: Vec<Permission>,
    pub auth: Arc<dyn AuthClient>,
}

impl std::fmt::Debug for AppProps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppProps")
            .field("app_id", &self.app_id)
            .field("app_name", &self.app_name)
            .field("permissions", &self.permissions)
            .finish_non_exhaustive()
    }
}

pub struct AppContainer {
    instance_id: InstanceId,
    descriptor: Arc<AppDescriptor>,
    context: ContainerContext,
    sandbox: Option<Arc<SandboxPolicy>>,
    lifecycle: AppLifecycle,
    state: Arc<AppStateStore>,
    comms: Option<Arc<AppCommunication>>,
    component: Option<LoadedComponent>,
    window_id: OnceLock<WindowId>,
    torn_down: AtomicBool,
}

impl std::fmt::Debug for AppContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContainer")
            .field("app_id", &self.descriptor.id)
            .field("instance_id", &self.instance_id)
            .field("state", &self.lifecycle.state())
            .field("window_id", &self.window_id.get())
            .finish_non_exhaustive()
    }
}

impl AppContainer {
    pub fn new(descriptor: Arc<AppDescriptor>, context: ContainerContext) -> Self {
        let app_id = descriptor.id.clone();
        Self {
            instance_id: InstanceId::new(),
            state: Arc::new(AppStateStore::new(
                app_id.clone(),
                Arc::clone(&context.persistence),
            )),
            lifecycle: AppLifecycle::new(app_id),
            descriptor,
            context,
            sandbox: None,
            comms: None,
            component: None,
            window_id: OnceLock::new(),
            torn_down: AtomicBool::new(false),
        }
    }

    /// Sets up sandbox → lifecycle → state → communication → component.
    /// Runs at most once; later calls fail with `AlreadyInitialized`.
    pub async fn initialize(&mut self) -> AppHostResult<()> {
        if self.lifecycle.state() != LifecycleState::Uninitialized
            || self.torn_down.load(Ordering::Acquire)
        {
            return Err(AppHostError::AlreadyInitialized);
        }

        match self.initialize_stages().await {
            Ok(()) => {
                info!(
                    app = %self.descriptor.name,
                    app_id = %self.descriptor.id,
                    instance_id = %self.instance_id,
                    "App container initialized"
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    app = %self.descriptor.name,
                    app_id = %self.descriptor.id,
                    "Failed to initialize app: {}",
                    e
                );
                self.release(false).await;
                Err(e)
            }
        }
    }

    async fn initialize_stages(&mut self) -> AppHostResult<()> {
        let app_id = self.descriptor.id.clone();
        let stage_failed = |stage: InitStage, e: AppHostError| match e {
            AppHostError::InitializationFailed { .. } => e,
            other => AppHostError::InitializationFailed {
                app_id: app_id.clone(),
                stage,
                reason: other.to_string(),
            },
        };

        let sandbox = SandboxPolicy::initialize_with_policy(
            app_id.clone(),
            &self.descriptor.security_config(),
            &self.context.policy,
        )
        .map_err(|e| stage_failed(InitStage::Sandbox, e))?;
        let sandbox = Arc::new(sandbox);
        self.sandbox = Some(Arc::clone(&sandbox));

        self.lifecycle
            .initialize(&self.descriptor, self.context.hooks.as_ref())
            .await
            .map_err(|e| stage_failed(InitStage::Lifecycle, e))?;

        self.state
            .load_persisted_state()
            .await
            .map_err(|e| stage_failed(InitStage::State, e))?;

        self.comms = Some(Arc::new(
            self.context.bus.endpoint(app_id.clone(), Arc::clone(&sandbox)),
        ));

        let component = load_component(
            &self.descriptor,
            &self.context.components,
            sandbox.isolation(),
        )
        .map_err(|e| stage_failed(InitStage::Component, e))?;
        self.component = Some(component);
        Ok(())
    }

    /// Marks an initialized container as running once it has a window.
    pub fn start(&self, window_id: WindowId) -> AppHostResult<()> {
        self.lifecycle.start()?;
        if self.window_id.set(window_id).is_err() {
            warn!(app_id = %self.descriptor.id, "Container already had a window id");
        }
        Ok(())
    }

    /// The privileged-operation gate. Every file, network, storage or
    /// notification action an app performs must pass through here.
    pub fn authorize(&self, operation: &str, context: &OperationContext) -> AppHostResult<()> {
        self.sandbox()?.validate_operation(operation, context)
    }

    /// Returns what the hosted UI receives.
    pub fn app_props(&self) -> AppHostResult<AppProps> {
        let comms = self
            .comms
            .as_ref()
            .ok_or_else(|| AppHostError::ContainerNotInitialized(self.descriptor.id.clone()))?;
        Ok(AppProps {
            app_id: self.descriptor.id.clone(),
            app_name: self.descriptor.name.clone(),
            comms: Arc::clone(comms),
            state: Arc::clone(&self.state),
            permissions: self.sandbox()?.permissions().granted_permissions().to_vec(),
            auth: Arc::clone(&self.context.auth),
        })
    }

    /// Releases every owned resource. Safe to call more than once.
    pub async fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let live = matches!(
            self.lifecycle.state(),
            LifecycleState::Initialized | LifecycleState::Running
        );
        self.release(live).await;
        info!(
            app_id = %self.descriptor.id,
            instance_id = %self.instance_id,
            window_id = ?self.window_id.get(),
            "App container torn down"
        );
    }

    /// Containers that never finished initializing must not flush.
    async fn release(&self, flush: bool) {
        self.lifecycle.terminate();
        if flush {
            if let Err(e) = self.state.flush().await {
                warn!(app_id = %self.descriptor.id, "State flush failed during teardown: {}", e);
            }
        }
        self.state.clear();
        if let Some(comms) = &self.comms {
            comms.close();
        }
        if let Some(sandbox) = &self.sandbox {
            sandbox.teardown();
        }
    }

    fn sandbox(&self) -> AppHostResult<&Arc<SandboxPolicy>> {
        self.sandbox
            .as_ref()
            .ok_or_else(|| AppHostError::ContainerNotInitialized(self.descriptor.id.clone()))
    }

    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    pub fn app_id(&self) -> &AppId {
        &self.descriptor.id
    }

    pub fn descriptor(&self) -> &Arc<AppDescriptor> {
        &self.descriptor
    }

    pub fn window_id(&self) -> Option<&WindowId> {
        self.window_id.get()
    }

    pub fn lifecycle(&self) -> &AppLifecycle {
        &self.lifecycle
    }

    pub fn state(&self) -> &Arc<AppStateStore> {
        &self.state
    }

    pub fn comms(&self) -> Option<&Arc<AppCommunication>> {
        self.comms.as_ref()
    }

    pub fn component(&self) -> Option<&LoadedComponent> {
        self.component.as_ref()
    }

    pub fn sandbox_policy(&self) -> Option<&Arc<SandboxPolicy>> {
        self.sandbox.as_ref()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::InMemoryAuthClient;
    use crate::component::{AppComponent, ComponentKind};
    use crate::descriptor::SecurityConfig;
    use crate::sandbox::IsolationLevel;
    use crate::state::MemoryPersistence;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct Calc;

    impl AppComponent for Calc {
        fn name(&self) -> &str {
            "Calc"
        }
    }

    struct RejectingHooks;

    #[async_trait]
    impl LifecycleHooks for RejectingHooks {
        async fn on_initialize(&self, descriptor: &AppDescriptor) -> Result<(), String> {
            Err(format!("{} refused to start", descriptor.name))
        }
    }

    fn context() -> ContainerContext {
        let components = Arc::new(ComponentRegistry::new());
        components.register("calculator", || Arc::new(Calc) as Arc<dyn AppComponent>);
        ContainerContext::new(MessageBus::new(), Arc::new(InMemoryAuthClient::new()))
            .with_components(components)
    }

    fn calculator() -> Arc<AppDescriptor> {
        Arc::new(
            AppDescriptor::new("calculator", "Calculator")
                .with_permissions(["basic_access", "app_communication"]),
        )
    }

    #[tokio::test]
    async fn initialize_builds_every_stage_in_order() {
        let mut container = AppContainer::new(calculator(), context());
        let states = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&states);
        container
            .lifecycle()
            .subscribe(move |e| sink.lock().unwrap().push(e.state));

        container.initialize().await.unwrap();

        assert_eq!(container.lifecycle().state(), LifecycleState::Initialized);
        assert!(container.sandbox_policy().is_some());
        assert!(container.comms().is_some());
        assert!(matches!(container.component(), Some(LoadedComponent::Ui(_))));
        assert_eq!(
            *states.lock().unwrap(),
            vec![LifecycleState::Initializing, LifecycleState::Initialized]
        );
    }

    #[tokio::test]
    async fn second_initialize_fails() {
        let mut container = AppContainer::new(calculator(), context());
        container.initialize().await.unwrap();
        assert!(matches!(
            container.initialize().await,
            Err(AppHostError::AlreadyInitialized)
        ));
    }

    #[tokio::test]
    async fn bad_security_config_fails_at_sandbox_stage() {
        let descriptor = Arc::new(
            AppDescriptor::new("bad", "Bad").with_security(SecurityConfig {
                permissions: vec!["superuser".into()],
                ..Default::default()
            }),
        );
        let mut container = AppContainer::new(descriptor, context());
        let err = container.initialize().await.unwrap_err();
        assert!(matches!(
            err,
            AppHostError::InitializationFailed { stage: InitStage::Sandbox, .. }
        ));
        assert!(container.app_props().is_err());
    }

    #[tokio::test]
    async fn hook_failure_releases_partial_resources() {
        let ctx = context().with_hooks(Arc::new(RejectingHooks));
        let bus = Arc::clone(&ctx.bus);
        let mut container = AppContainer::new(calculator(), ctx);
        let err = container.initialize().await.unwrap_err();
        assert!(err.to_string().contains("refused to start"));
        assert_eq!(container.lifecycle().state(), LifecycleState::Terminated);
        assert!(!container.sandbox_policy().unwrap().is_active());
        assert_eq!(bus.endpoint_count(&AppId::from("calculator")), 0);
    }

    #[tokio::test]
    async fn failed_start_keeps_persisted_state() {
        let persistence = Arc::new(MemoryPersistence::new());
        persistence.insert(
            AppId::from("calculator"),
            HashMap::from([("memory".to_string(), json!(42))]),
        );
        let ctx = context()
            .with_persistence(persistence.clone())
            .with_hooks(Arc::new(RejectingHooks));
        let mut container = AppContainer::new(calculator(), ctx);
        assert!(container.initialize().await.is_err());
        container.teardown().await;
        assert_eq!(
            persistence.saved(&AppId::from("calculator")).unwrap()["memory"],
            json!(42)
        );
    }

    #[tokio::test]
    async fn frame_without_url_fails_at_component_stage() {
        let descriptor = Arc::new(
            AppDescriptor::new("docs", "Docs").with_kind(ComponentKind::EmbeddedFrame),
        );
        let ctx = context();
        let bus = Arc::clone(&ctx.bus);
        let mut container = AppContainer::new(descriptor, ctx);
        let err = container.initialize().await.unwrap_err();
        assert!(matches!(
            err,
            AppHostError::InitializationFailed { stage: InitStage::Component, .. }
        ));
        assert_eq!(bus.endpoint_count(&AppId::from("docs")), 0);
    }

    #[tokio::test]
    async fn missing_component_degrades_to_placeholder() {
        let descriptor = Arc::new(AppDescriptor::new("ghost", "Ghost"));
        let mut container = AppContainer::new(descriptor, context());
        container.initialize().await.unwrap();
        assert!(container.component().unwrap().is_placeholder());
    }

    #[tokio::test]
    async fn props_expose_granted_permissions() {
        let mut container = AppContainer::new(calculator(), context());
        container.initialize().await.unwrap();
        let props = container.app_props().unwrap();
        assert_eq!(props.app_id.as_str(), "calculator");
        assert_eq!(props.app_name, "Calculator");
        assert_eq!(
            props.permissions,
            vec![Permission::BasicAccess, Permission::AppCommunication]
        );
        props.state.set("display", "0");
        assert_eq!(container.state().get("display"), Some(json!("0")));
    }

    #[tokio::test]
    async fn authorize_goes_through_sandbox() {
        let mut container = AppContainer::new(calculator(), context());
        assert!(matches!(
            container.authorize("render", &OperationContext::new()),
            Err(AppHostError::ContainerNotInitialized(_))
        ));
        container.initialize().await.unwrap();
        assert!(container.authorize("render", &OperationContext::new()).is_ok());
        assert!(matches!(
            container.authorize("file_access", &OperationContext::new()),
            Err(AppHostError::PermissionDenied { .. })
        ));
    }

    #[tokio::test]
    async fn policy_forced_isolation_applies() {
        let ctx = context().with_policy(PolicyEngine::with_config(crate::policy::PolicyConfig {
            force_high_isolation: true,
            ..Default::default()
        }));
        let mut container = AppContainer::new(calculator(), ctx);
        container.initialize().await.unwrap();
        assert_eq!(
            container.sandbox_policy().unwrap().isolation(),
            IsolationLevel::High
        );
    }

    #[tokio::test]
    async fn teardown_releases_everything_and_flushes_state() {
        let persistence = Arc::new(MemoryPersistence::new());
        persistence.insert(
            AppId::from("calculator"),
            HashMap::from([("memory".to_string(), json!(42))]),
        );
        let ctx = context().with_persistence(persistence.clone());
        let bus = Arc::clone(&ctx.bus);
        let mut container = AppContainer::new(calculator(), ctx);
        container.initialize().await.unwrap();
        assert_eq!(container.state().get("memory"), Some(json!(42)));

        container.state().set("memory", 7);
        container.start(WindowId::from("win-9")).unwrap();
        assert_eq!(container.window_id(), Some(&WindowId::from("win-9")));

        container.teardown().await;
        container.teardown().await;

        assert!(container.is_torn_down());
        assert_eq!(container.lifecycle().state(), LifecycleState::Terminated);
        assert!(container.comms().unwrap().is_closed());
        assert!(!container.sandbox_policy().unwrap().is_active());
        assert_eq!(container.state().get("memory"), None);
        assert_eq!(bus.endpoint_count(&AppId::from("calculator")), 0);
        assert_eq!(
            persistence.saved(&AppId::from("calculator")).unwrap()["memory"],
            json!(7)
        );
    }
}
