//! Error types for the app host.

use crate::lifecycle::LifecycleState;
use thiserror::Error;
use webos_types::{AppId, WindowId};

/// Result type for app host operations.
pub type AppHostResult<T> = Result<T, AppHostError>;

/// Stage of container initialization that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStage {
    Sandbox,
    Lifecycle,
    State,
    Communication,
    Component,
}

impl std::fmt::Display for InitStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Sandbox => "sandbox",
            Self::Lifecycle => "lifecycle",
            Self::State => "state",
            Self::Communication => "communication",
            Self::Component => "component",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum AppHostError {
    #[error("permission denied: app '{app_id}' lacks '{permission}' for operation '{operation}'")]
    PermissionDenied {
        app_id: AppId,
        operation: String,
        permission: String,
    },

    #[error("operation restricted: '{operation}' is restricted for app '{app_id}' in this context")]
    OperationRestricted { app_id: AppId, operation: String },

    #[error("sandbox for app '{0}' has been torn down")]
    SandboxTornDown(AppId),

    #[error("invalid security config for app '{app_id}': {reason}")]
    InvalidSecurityConfig { app_id: AppId, reason: String },

    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("app not found: {0}")]
    AppNotFound(AppId),

    #[error("app already registered: {0}")]
    DuplicateRegistration(AppId),

    #[error("policy denied: {0}")]
    PolicyDenied(String),

    #[error("initialization of app '{app_id}' failed at {stage} stage: {reason}")]
    InitializationFailed {
        app_id: AppId,
        stage: InitStage,
        reason: String,
    },

    #[error("already initialized")]
    AlreadyInitialized,

    #[error("container for app '{0}' is not initialized")]
    ContainerNotInitialized(AppId),

    #[error("app registry has not been initialized")]
    RegistryNotInitialized,

    #[error("invalid lifecycle transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },

    #[error("window not found: {0}")]
    WindowNotFound(WindowId),

    #[error("window id already in use: {0}")]
    DuplicateWindow(WindowId),

    #[error("window creation failed: {0}")]
    WindowCreation(#[from] crate::window::WindowError),

    #[error("communication endpoint for app '{0}' is closed")]
    EndpointClosed(AppId),

    #[error("state storage error: {0}")]
    Storage(String),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
