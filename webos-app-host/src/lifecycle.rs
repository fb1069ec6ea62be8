//! App lifecycle state machine.
//!
//! ```text
//! uninitialized ──initialize()──▶ initializing ──hook ok──▶ initialized ──start()──▶ running
//!                                      │                         │                      │
//!                                      └──hook failed──┐         └────terminate()───────┴──▶ terminated
//!                                                      ▼
//!                                                 terminated
//! ```
//!
//! Every transition is delivered to listeners synchronously, in order, on
//! the calling task.

use crate::descriptor::AppDescriptor;
use crate::error::{AppHostError, AppHostResult, InitStage};
use crate::lock;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;
use webos_types::{AppId, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleState {
    Uninitialized,
    Initializing,
    Initialized,
    Running,
    Terminated,
}

/// Emitted on every `lifecycle-change`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleEvent {
    pub app_id: AppId,
    pub previous: LifecycleState,
    pub state: LifecycleState,
    pub timestamp: Timestamp,
}

/// Override point for app-specific initialization work.
#[async_trait]
pub trait LifecycleHooks: Send + Sync {
    /// Runs between `initializing` and `initialized`. An error aborts
    /// initialization and terminates the lifecycle.
    async fn on_initialize(&self, descriptor: &AppDescriptor) -> Result<(), String> {
        let _ = descriptor;
        Ok(())
    }
}

/// Hooks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl LifecycleHooks for NoopHooks {}

/// Handle returned by [`AppLifecycle::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&LifecycleEvent) + Send + Sync>;

pub struct AppLifecycle {
    app_id: AppId,
    state: Mutex<LifecycleState>,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
}

impl std::fmt::Debug for AppLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppLifecycle")
            .field("app_id", &self.app_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl AppLifecycle {
    pub fn new(app_id: AppId) -> Self {
        Self {
            app_id,
            state: Mutex::new(LifecycleState::Uninitialized),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *lock(&self.state)
    }

    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        lock(&self.listeners).push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) {
        lock(&self.listeners).retain(|(lid, _)| *lid != id);
    }

    /// Runs `uninitialized → initializing → initialized`, awaiting the hook
    /// in between. Fails with `AlreadyInitialized` from any other state.
    pub async fn initialize(
        &self,
        descriptor: &AppDescriptor,
        hooks: &dyn LifecycleHooks,
    ) -> AppHostResult<()> {
        self.transition(&[LifecycleState::Uninitialized], LifecycleState::Initializing)
            .map_err(|_| AppHostError::AlreadyInitialized)?;

        if let Err(reason) = hooks.on_initialize(descriptor).await {
            self.force(LifecycleState::Terminated);
            return Err(AppHostError::InitializationFailed {
                app_id: self.app_id.clone(),
                stage: InitStage::Lifecycle,
                reason,
            });
        }

        self.transition(&[LifecycleState::Initializing], LifecycleState::Initialized)
    }

    /// `initialized → running`.
    pub fn start(&self) -> AppHostResult<()> {
        self.transition(&[LifecycleState::Initialized], LifecycleState::Running)
    }

    /// Moves to `terminated` from any live state. No-op when already
    /// terminated.
    pub fn terminate(&self) {
        if self.state() != LifecycleState::Terminated {
            self.force(LifecycleState::Terminated);
        }
    }

    fn transition(&self, from: &[LifecycleState], to: LifecycleState) -> AppHostResult<()> {
        let previous = {
            let mut state = lock(&self.state);
            if !from.contains(&state) {
                return Err(AppHostError::InvalidTransition { from: *state, to });
            }
            std::mem::replace(&mut *state, to)
        };
        self.emit(previous, to);
        Ok(())
    }

    fn force(&self, to: LifecycleState) {
        let previous = std::mem::replace(&mut *lock(&self.state), to);
        if previous != to {
            self.emit(previous, to);
        }
    }

    fn emit(&self, previous: LifecycleState, state: LifecycleState) {
        debug!(app_id = %self.app_id, ?previous, ?state, "lifecycle-change");
        let event = LifecycleEvent {
            app_id: self.app_id.clone(),
            previous,
            state,
            timestamp: Timestamp::now(),
        };
        let listeners: Vec<Listener> = lock(&self.listeners)
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingHooks;

    #[async_trait]
    impl LifecycleHooks for FailingHooks {
        async fn on_initialize(&self, _descriptor: &AppDescriptor) -> Result<(), String> {
            Err("disk on fire".into())
        }
    }

    fn recorder(lifecycle: &AppLifecycle) -> Arc<Mutex<Vec<LifecycleState>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        lifecycle.subscribe(move |e| sink.lock().unwrap().push(e.state));
        seen
    }

    fn descriptor() -> AppDescriptor {
        AppDescriptor::new("calc", "Calculator")
    }

    #[tokio::test]
    async fn initialize_emits_ordered_events() {
        let lc = AppLifecycle::new(AppId::from("calc"));
        let seen = recorder(&lc);

        lc.initialize(&descriptor(), &NoopHooks).await.unwrap();
        assert_eq!(lc.state(), LifecycleState::Initialized);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![LifecycleState::Initializing, LifecycleState::Initialized]
        );
    }

    #[tokio::test]
    async fn double_initialize_is_an_error() {
        let lc = AppLifecycle::new(AppId::from("calc"));
        lc.initialize(&descriptor(), &NoopHooks).await.unwrap();
        let err = lc.initialize(&descriptor(), &NoopHooks).await.unwrap_err();
        assert!(matches!(err, AppHostError::AlreadyInitialized));
        assert_eq!(lc.state(), LifecycleState::Initialized);
    }

    #[tokio::test]
    async fn failing_hook_terminates() {
        let lc = AppLifecycle::new(AppId::from("calc"));
        let seen = recorder(&lc);
        let err = lc.initialize(&descriptor(), &FailingHooks).await.unwrap_err();
        assert!(matches!(
            err,
            AppHostError::InitializationFailed { stage: InitStage::Lifecycle, .. }
        ));
        assert_eq!(lc.state(), LifecycleState::Terminated);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![LifecycleState::Initializing, LifecycleState::Terminated]
        );
    }

    #[tokio::test]
    async fn start_then_terminate() {
        let lc = AppLifecycle::new(AppId::from("calc"));
        assert!(matches!(lc.start(), Err(AppHostError::InvalidTransition { .. })));

        lc.initialize(&descriptor(), &NoopHooks).await.unwrap();
        lc.start().unwrap();
        assert_eq!(lc.state(), LifecycleState::Running);

        let seen = recorder(&lc);
        lc.terminate();
        lc.terminate();
        assert_eq!(lc.state(), LifecycleState::Terminated);
        assert_eq!(*seen.lock().unwrap(), vec![LifecycleState::Terminated]);
    }

    #[tokio::test]
    async fn unsubscribed_listener_stops_receiving() {
        let lc = AppLifecycle::new(AppId::from("calc"));
        let seen = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&seen);
        let id = lc.subscribe(move |_| *sink.lock().unwrap() += 1);
        lc.unsubscribe(id);
        lc.initialize(&descriptor(), &NoopHooks).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), 0);
    }
}
