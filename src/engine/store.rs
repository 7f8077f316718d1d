use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use super::ids::{CollectionId, ItemId};
use super::notify::{Notifier, SignalReceiver};

#[derive(Debug, thiserror::Error)]
pub(crate) enum StoreError {
    #[error("storage backend failed: {0}")]
    Backend(String),
    #[error("storage task aborted: {0}")]
    Aborted(String),
}

/// Local key-value persistence. Keys are collection ids, values are the
/// JSON form of a [`ProgressRecord`].
#[async_trait]
pub(crate) trait KeyValueBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;
    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ProgressRecord {
    completed: BTreeSet<ItemId>,
}

impl ProgressRecord {
    pub(crate) fn contains(&self, item: &ItemId) -> bool {
        self.completed.contains(item)
    }

    pub(crate) fn len(&self) -> usize {
        self.completed.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.completed.is_empty()
    }

    pub(crate) fn insert(&mut self, item: ItemId) -> bool {
        self.completed.insert(item)
    }

    #[cfg(test)]
    pub(crate) fn items(&self) -> impl Iterator<Item = &ItemId> {
        self.completed.iter()
    }

    /// Any truthy value marks an id completed; anything that is not an
    /// object decodes as an empty record.
    pub(crate) fn from_value(value: &Value) -> Self {
        let Some(map) = value.as_object() else {
            return Self::default();
        };
        let completed = map
            .iter()
            .filter(|(_, flag)| is_truthy(flag))
            .filter_map(|(key, _)| ItemId::new(key))
            .collect();
        Self { completed }
    }

    pub(crate) fn to_value(&self) -> Value {
        let map = self
            .completed
            .iter()
            .map(|item| (item.as_str().to_string(), Value::Bool(true)))
            .collect::<Map<String, Value>>();
        Value::Object(map)
    }
}

impl FromIterator<ItemId> for ProgressRecord {
    fn from_iter<T: IntoIterator<Item = ItemId>>(iter: T) -> Self {
        Self {
            completed: iter.into_iter().collect(),
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(num) => num.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Single source of truth for completion state.
pub(crate) struct ProgressStore {
    backend: Arc<dyn KeyValueBackend>,
    notifier: Notifier,
    write_lock: AsyncMutex<()>,
}

impl ProgressStore {
    pub(crate) fn new(backend: Arc<dyn KeyValueBackend>, notifier: Notifier) -> Self {
        Self {
            backend,
            notifier,
            write_lock: AsyncMutex::new(()),
        }
    }

    pub(crate) fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub(crate) fn subscribe(&self) -> SignalReceiver {
        self.notifier.subscribe()
    }

    /// Never fails: unreadable state is reported as "no progress known".
    pub(crate) async fn get(&self, collection: &CollectionId) -> ProgressRecord {
        match self.backend.get(collection.as_str()).await {
            Ok(Some(value)) => ProgressRecord::from_value(&value),
            Ok(None) => ProgressRecord::default(),
            Err(err) => {
                warn!(%collection, "progress read failed, assuming none: {err}");
                ProgressRecord::default()
            }
        }
    }

    /// Returns `true` only when the item was newly recorded.
    pub(crate) async fn mark_complete(&self, collection: &CollectionId, item: &ItemId) -> bool {
        let _guard = self.write_lock.lock().await;

        let mut record = match self.backend.get(collection.as_str()).await {
            Ok(Some(value)) => ProgressRecord::from_value(&value),
            Ok(None) => ProgressRecord::default(),
            Err(err) => {
                // Writing over an unreadable record could wipe other items.
                warn!(%collection, %item, "progress read before write failed: {err}");
                return false;
            }
        };
        if !record.insert(item.clone()) {
            debug!(%collection, %item, "item already completed");
            return false;
        }

        match self
            .backend
            .set(collection.as_str(), record.to_value())
            .await
        {
            Ok(()) => {
                info!(%collection, %item, completed = record.len(), "marked item complete");
                self.notifier.store_changed(collection);
                true
            }
            Err(err) => {
                warn!(%collection, %item, "progress write failed: {err}");
                false
            }
        }
    }

    pub(crate) async fn clear(&self, collection: &CollectionId) -> bool {
        let _guard = self.write_lock.lock().await;
        match self.backend.remove(collection.as_str()).await {
            Ok(()) => {
                info!(%collection, "progress reset");
                self.notifier.store_changed(collection);
                true
            }
            Err(err) => {
                warn!(%collection, "progress reset failed: {err}");
                false
            }
        }
    }
}

/// In-process backend. Every call yields once so concurrent callers
/// interleave the way they would against real async storage.
#[derive(Default)]
pub(crate) struct MemoryBackend {
    values: Mutex<HashMap<String, Value>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub(crate) fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub(crate) fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub(crate) fn raw(&self, key: &str) -> Option<Value> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }
}

#[async_trait]
impl KeyValueBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        tokio::task::yield_now().await;
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("injected read failure".to_string()));
        }
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("injected write failure".to_string()));
        }
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("injected write failure".to_string()));
        }
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
