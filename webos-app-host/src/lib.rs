//! Application host for the WebOS desktop.
//!
//! Keeps the catalog of installable apps, launches each app into its own
//! container, and routes messages between running apps.
//!
//! Every container owns a sandbox that gates privileged operations, a
//! lifecycle state machine, a key/value state store with change history,
//! and an endpoint on the shared message bus.

mod auth;
mod builtin;
mod bus;
mod component;
mod container;
mod descriptor;
mod error;
mod lifecycle;
mod permissions;
mod policy;
mod registry;
mod sandbox;
mod state;
mod window;

pub use auth::{
    AuthClient, AuthSession, DEFAULT_SESSION_TTL_SECS, InMemoryAuthClient, TokenInfo, UserInfo,
};
pub use builtin::builtin_apps;
pub use bus::{AppCommunication, AppMessage, HandlerId, MessageBus, TAP_CAPACITY};
pub use component::{
    AppComponent, ComponentFactory, ComponentKind, ComponentRegistry, FrameDescriptor,
    LoadedComponent, load_component,
};
pub use container::{AppContainer, AppProps, ContainerContext};
pub use descriptor::{
    AppDescriptor, DEFAULT_CATEGORY, SecurityConfig, WindowSize, load_descriptors_from_dir,
};
pub use error::{AppHostError, AppHostResult, InitStage};
pub use lifecycle::{
    AppLifecycle, LifecycleEvent, LifecycleHooks, LifecycleState, ListenerId, NoopHooks,
};
pub use permissions::{Permission, PermissionSet, UnknownPermission, operations};
pub use policy::{PolicyConfig, PolicyEngine, PolicyMode};
pub use registry::{AppRegistry, RunningAppInfo};
pub use sandbox::{
    ContextPredicate, IsolationLevel, OperationContext, RestrictionRule, SandboxMetrics,
    SandboxPolicy, app_home,
};
pub use state::{
    AppStateStore, MemoryPersistence, NoopPersistence, StateChange, StateChangeNotice,
    StatePersistence, StateSubscription,
};
pub use window::{
    HeadlessWindowManager, WindowConfig, WindowError, WindowManager, WindowOverrides, WindowRecord,
};

use std::sync::{Mutex, MutexGuard};

/// Locks `mutex`, recovering the guard if a panicking holder poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
