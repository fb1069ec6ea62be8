//! Per-app key/value state with append-only change history.
//!
//! Each container owns exactly one store. Apps that want to share state do
//! it through the message bus, never by reaching into another app's store.

use crate::error::{AppHostError, AppHostResult};
use crate::lock;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, trace};
use webos_types::{AppId, Timestamp};

/// One recorded mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChange {
    pub key: String,
    pub previous_value: Option<Value>,
    pub new_value: Value,
    pub timestamp: Timestamp,
}

/// Payload delivered to subscribers after a `set`.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChangeNotice {
    pub key: String,
    pub new_value: Value,
    pub previous_value: Option<Value>,
}

/// Storage backend for persisted app state.
#[async_trait]
pub trait StatePersistence: Send + Sync {
    async fn load(&self, app_id: &AppId) -> AppHostResult<HashMap<String, Value>>;

    async fn save(&self, app_id: &AppId, snapshot: HashMap<String, Value>) -> AppHostResult<()>;
}

/// Persistence that stores nothing and restores nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPersistence;

#[async_trait]
impl StatePersistence for NoopPersistence {
    async fn load(&self, _app_id: &AppId) -> AppHostResult<HashMap<String, Value>> {
        Ok(HashMap::new())
    }

    async fn save(&self, _app_id: &AppId, _snapshot: HashMap<String, Value>) -> AppHostResult<()> {
        Ok(())
    }
}

/// Process-local persistence keyed by app id.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    saved: Mutex<HashMap<AppId, HashMap<String, Value>>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the saved state for an app.
    pub fn insert(&self, app_id: AppId, snapshot: HashMap<String, Value>) {
        lock(&self.saved).insert(app_id, snapshot);
    }

    pub fn saved(&self, app_id: &AppId) -> Option<HashMap<String, Value>> {
        lock(&self.saved).get(app_id).cloned()
    }
}

#[async_trait]
impl StatePersistence for MemoryPersistence {
    async fn load(&self, app_id: &AppId) -> AppHostResult<HashMap<String, Value>> {
        Ok(self.saved(app_id).unwrap_or_default())
    }

    async fn save(&self, app_id: &AppId, snapshot: HashMap<String, Value>) -> AppHostResult<()> {
        self.insert(app_id.clone(), snapshot);
        Ok(())
    }
}

type Subscriber = Arc<dyn Fn(&StateChangeNotice) + Send + Sync>;
type SubscriberList = Mutex<Vec<(u64, Subscriber)>>;

/// Handle for removing one subscriber.
#[derive(Debug)]
pub struct StateSubscription {
    id: u64,
    subscribers: Weak<SubscriberList>,
}

impl StateSubscription {
    /// Removes this subscriber. Notifications already being delivered are
    /// unaffected.
    pub fn unsubscribe(self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            lock(&subscribers).retain(|(id, _)| *id != self.id);
        }
    }
}

#[derive(Default)]
struct StoreInner {
    values: HashMap<String, Value>,
    history: Vec<StateChange>,
    clock: Option<Timestamp>,
}

pub struct AppStateStore {
    app_id: AppId,
    inner: Mutex<StoreInner>,
    subscribers: Arc<SubscriberList>,
    next_subscriber: AtomicU64,
    persistence: Arc<dyn StatePersistence>,
}

impl std::fmt::Debug for AppStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppStateStore")
            .field("app_id", &self.app_id)
            .field("keys", &self.keys())
            .finish_non_exhaustive()
    }
}

impl AppStateStore {
    pub fn new(app_id: AppId, persistence: Arc<dyn StatePersistence>) -> Self {
        Self {
            app_id,
            inner: Mutex::new(StoreInner::default()),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            next_subscriber: AtomicU64::new(0),
            persistence,
        }
    }

    /// Creates a store with no persistence backend.
    pub fn in_memory(app_id: AppId) -> Self {
        Self::new(app_id, Arc::new(NoopPersistence))
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        lock(&self.inner).values.get(key).cloned()
    }

    /// Overwrites `key`, records the change and notifies subscribers.
    /// Returns the previous value.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let value = value.into();

        let previous = {
            let mut inner = lock(&self.inner);
            let timestamp = match inner.clock {
                Some(last) => last.tick(),
                None => Timestamp::now(),
            };
            inner.clock = Some(timestamp);
            let previous = inner.values.insert(key.clone(), value.clone());
            inner.history.push(StateChange {
                key: key.clone(),
                previous_value: previous.clone(),
                new_value: value.clone(),
                timestamp,
            });
            previous
        };

        trace!(app_id = %self.app_id, key = %key, "State updated");
        self.notify(&StateChangeNotice {
            key,
            new_value: value,
            previous_value: previous.clone(),
        });
        previous
    }

    pub fn subscribe<F>(&self, callback: F) -> StateSubscription
    where
        F: Fn(&StateChangeNotice) + Send + Sync + 'static,
    {
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        lock(&self.subscribers).push((id, Arc::new(callback)));
        StateSubscription {
            id,
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }

    /// Every mutation so far, oldest first.
    pub fn history(&self) -> Vec<StateChange> {
        lock(&self.inner).history.clone()
    }

    /// History entries for one key, oldest first.
    pub fn history_for(&self, key: &str) -> Vec<StateChange> {
        lock(&self.inner)
            .history
            .iter()
            .filter(|c| c.key == key)
            .cloned()
            .collect()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = lock(&self.inner).values.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn snapshot(&self) -> HashMap<String, Value> {
        lock(&self.inner).values.clone()
    }

    /// Restores previously saved entries. Restored entries are not recorded
    /// as history and do not notify subscribers.
    pub async fn load_persisted_state(&self) -> AppHostResult<usize> {
        let restored = self.persistence.load(&self.app_id).await?;
        let count = restored.len();
        lock(&self.inner).values.extend(restored);
        if count > 0 {
            debug!(app_id = %self.app_id, entries = count, "Restored persisted state");
        }
        Ok(count)
    }

    /// Saves the current values through the persistence backend.
    pub async fn flush(&self) -> AppHostResult<()> {
        let snapshot = self.snapshot();
        self.persistence
            .save(&self.app_id, snapshot)
            .await
            .map_err(|e| AppHostError::Storage(format!("flush for '{}': {e}", self.app_id)))
    }

    /// Discards values, history and subscribers.
    pub fn clear(&self) {
        *lock(&self.inner) = StoreInner::default();
        lock(&self.subscribers).clear();
    }

    fn notify(&self, notice: &StateChangeNotice) {
        let subscribers: Vec<Subscriber> = lock(&self.subscribers)
            .iter()
            .map(|(_, s)| Arc::clone(s))
            .collect();
        for subscriber in subscribers {
            subscriber(notice);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> AppStateStore {
        AppStateStore::in_memory(AppId::from("notes"))
    }

    #[test]
    fn set_then_get() {
        let s = store();
        assert_eq!(s.get("title"), None);
        assert_eq!(s.set("title", "Groceries"), None);
        assert_eq!(s.get("title"), Some(json!("Groceries")));
        assert_eq!(s.set("title", "Chores"), Some(json!("Groceries")));
    }

    #[test]
    fn history_records_previous_and_new() {
        let s = store();
        s.set("count", 1);
        s.set("count", 2);
        s.set("other", true);
        s.set("count", 3);

        let history = s.history_for("count");
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].previous_value, None);
        assert_eq!(history[0].new_value, json!(1));
        assert_eq!(history[2].previous_value, Some(json!(2)));
        assert!(history.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        assert_eq!(s.history().len(), 4);
    }

    #[test]
    fn subscribers_receive_notice() {
        let s = store();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        s.subscribe(move |n| sink.lock().unwrap().push(n.clone()));

        s.set("k", "v1");
        s.set("k", "v2");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].key, "k");
        assert_eq!(seen[1].new_value, json!("v2"));
        assert_eq!(seen[1].previous_value, Some(json!("v1")));
    }

    #[test]
    fn unsubscribe_leaves_other_subscribers() {
        let s = store();
        let a = Arc::new(AtomicU64::new(0));
        let b = Arc::new(AtomicU64::new(0));
        let (a2, b2) = (Arc::clone(&a), Arc::clone(&b));
        let sub_a = s.subscribe(move |_| {
            a2.fetch_add(1, Ordering::SeqCst);
        });
        s.subscribe(move |_| {
            b2.fetch_add(1, Ordering::SeqCst);
        });

        s.set("k", 1);
        sub_a.unsubscribe();
        s.set("k", 2);

        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 2);
        assert_eq!(s.subscriber_count(), 1);
    }

    #[test]
    fn unsubscribe_during_notify_keeps_current_delivery() {
        let s = store();
        let hits = Arc::new(Mutex::new(Vec::new()));
        let slot: Arc<Mutex<Option<StateSubscription>>> = Arc::new(Mutex::new(None));

        let (hits_a, slot_a) = (Arc::clone(&hits), Arc::clone(&slot));
        s.subscribe(move |_| {
            hits_a.lock().unwrap().push("a");
            if let Some(sub_b) = slot_a.lock().unwrap().take() {
                sub_b.unsubscribe();
            }
        });
        let hits_b = Arc::clone(&hits);
        let sub_b = s.subscribe(move |_| hits_b.lock().unwrap().push("b"));
        *slot.lock().unwrap() = Some(sub_b);

        s.set("k", 1);
        s.set("k", 2);

        assert_eq!(*hits.lock().unwrap(), vec!["a", "b", "a"]);
        assert_eq!(s.subscriber_count(), 1);
    }

    #[test]
    fn subscriber_may_mutate_store_reentrantly() {
        let s = Arc::new(store());
        let weak = Arc::downgrade(&s);
        s.subscribe(move |n| {
            if n.key != "input" {
                return;
            }
            if let Some(store) = weak.upgrade() {
                store.set("echo", n.new_value.clone());
            }
        });
        s.set("input", "hello");
        assert_eq!(s.get("echo"), Some(json!("hello")));
    }

    #[tokio::test]
    async fn load_and_flush_through_persistence() {
        let backend = Arc::new(MemoryPersistence::new());
        let app = AppId::from("notes");
        backend.insert(app.clone(), HashMap::from([("draft".to_string(), json!("hi"))]));

        let s = AppStateStore::new(app.clone(), backend.clone());
        assert_eq!(s.load_persisted_state().await.unwrap(), 1);
        assert_eq!(s.get("draft"), Some(json!("hi")));
        assert!(s.history().is_empty());

        s.set("draft", "bye");
        s.flush().await.unwrap();
        assert_eq!(backend.saved(&app).unwrap()["draft"], json!("bye"));
    }

    #[tokio::test]
    async fn noop_persistence_restores_nothing() {
        let s = store();
        assert_eq!(s.load_persisted_state().await.unwrap(), 0);
        s.flush().await.unwrap();
    }

    #[test]
    fn flush_outside_a_runtime() {
        let backend = Arc::new(MemoryPersistence::new());
        let s = AppStateStore::new(AppId::from("notes"), backend.clone());
        s.set("cursor", 12);
        tokio_test::block_on(s.flush()).unwrap();
        assert_eq!(backend.saved(&AppId::from("notes")).unwrap()["cursor"], json!(12));
    }

    #[test]
    fn clear_discards_everything() {
        let s = store();
        s.subscribe(|_| {});
        s.set("k", 1);
        s.clear();
        assert_eq!(s.get("k"), None);
        assert!(s.history().is_empty());
        assert_eq!(s.subscriber_count(), 0);
    }
}
