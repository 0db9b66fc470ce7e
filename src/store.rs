use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};
use tokio::{runtime::Handle, task::JoinHandle};

use crate::owned_url;

/// Prefix that marks a soft-deleted short ID in the forward map.
pub const DELETED_PREFIX: &str = "-";

/// Return the soft-deleted form of `key`.
pub fn deleted_key(key: &str) -> String {
    format!("{DELETED_PREFIX}{key}")
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("key {0} not found")]
    NotFound(String),

    #[error("key {key} does not belong to user {owner}")]
    NotOwned { key: String, owner: String },

    #[error("key {0} already deleted")]
    AlreadyDeleted(String),

    #[error("no async runtime available to dispatch deletions")]
    NoRuntime,

    #[error("deletion task for key {key} failed: {reason}")]
    TaskFailed { key: String, reason: String },
}

// ── Store ──────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Maps {
    key_to_value: HashMap<String, String>,
    value_to_key: HashMap<String, String>,
}

/// In-memory bidirectional map: short ID ⇄ stored value.
///
/// Both directions sit behind one mutex so that the dedup check and the
/// insert happen in a single critical section. Nothing under the lock does
/// I/O; persistence happens after the call returns.
///
/// Deleting a key renames it to `-key` in the forward map and leaves the
/// reverse entry in place, so re-shortening the same value after a delete
/// hands back the deleted ID.
#[derive(Debug, Default)]
pub struct UrlStore {
    maps: Mutex<Maps>,
}

impl UrlStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every entry from both maps.
    pub fn clear(&self) {
        *self.maps.lock() = Maps::default();
        tracing::info!("storage cleared");
    }

    /// Record `key -> value` unless `value` is already stored.
    ///
    /// Returns the key the value is stored under and whether this call
    /// created it. A value that is already present returns its existing key
    /// with `false`. A key that is already taken by a different value (a
    /// digest collision) is treated the same way and nothing is overwritten.
    pub fn set(&self, key: &str, value: &str) -> (String, bool) {
        let mut maps = self.maps.lock();

        if let Some(existing) = maps.value_to_key.get(value) {
            return (existing.clone(), false);
        }
        if maps.key_to_value.contains_key(key) {
            tracing::warn!(key, "short id collision, keeping the first value");
            return (key.to_owned(), false);
        }

        maps.value_to_key.insert(value.to_owned(), key.to_owned());
        maps.key_to_value.insert(key.to_owned(), value.to_owned());
        (key.to_owned(), true)
    }

    /// Look up the stored value for an active key.
    pub fn get(&self, key: &str) -> Option<String> {
        self.maps.lock().key_to_value.get(key).cloned()
    }

    /// Copy of the forward map, detached from the store.
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.maps.lock().key_to_value.clone()
    }

    /// Insert every pair through [`UrlStore::set`]. Returns how many were new.
    ///
    /// Two keys carrying the same value keep whichever is processed first;
    /// the order of a `HashMap` is unspecified.
    pub fn load(&self, data: HashMap<String, String>) -> usize {
        data.iter()
            .filter(|(key, value)| self.set(key, value).1)
            .count()
    }

    /// Soft-delete `key` on behalf of `owner`.
    pub fn delete(&self, owner: &str, key: &str) -> Result<(), StoreError> {
        let mut maps = self.maps.lock();

        let Some(value) = maps.key_to_value.get(key) else {
            return match maps.key_to_value.get(&deleted_key(key)) {
                Some(value) if owned_url::is_owned_by(value, owner) => {
                    Err(StoreError::AlreadyDeleted(key.to_owned()))
                }
                Some(_) => Err(not_owned(key, owner)),
                None => Err(StoreError::NotFound(key.to_owned())),
            };
        };

        if !owned_url::is_owned_by(value, owner) {
            return Err(not_owned(key, owner));
        }
        if key.starts_with(DELETED_PREFIX) {
            return Err(StoreError::AlreadyDeleted(key.to_owned()));
        }

        let value = value.clone();
        maps.key_to_value.remove(key);
        maps.key_to_value.insert(deleted_key(key), value);
        Ok(())
    }

    /// Dispatch one deletion task per key and return without waiting.
    ///
    /// Failures are logged by the tasks themselves. The returned
    /// [`DeleteTasks`] can be awaited to observe completion; dropping it
    /// leaves the tasks running.
    pub fn delete_keys(
        self: &Arc<Self>,
        owner: &str,
        keys: Vec<String>,
    ) -> Result<DeleteTasks, StoreError> {
        let runtime = Handle::try_current().map_err(|_| StoreError::NoRuntime)?;

        let handles = keys
            .into_iter()
            .map(|key| {
                let store = Arc::clone(self);
                let owner = owner.to_owned();
                let task_key = key.clone();
                let task = runtime.spawn(async move {
                    let result = store.delete(&owner, &task_key);
                    if let Err(e) = &result {
                        tracing::error!("delete_keys: {}", e);
                    }
                    result
                });
                (key, task)
            })
            .collect();

        Ok(DeleteTasks { handles })
    }

    /// True when `key` has been soft-deleted.
    pub fn is_deleted(&self, key: &str) -> bool {
        self.maps
            .lock()
            .key_to_value
            .contains_key(&deleted_key(key))
    }

    /// Number of entries in the forward map, deleted ones included.
    pub fn len(&self) -> usize {
        self.maps.lock().key_to_value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn not_owned(key: &str, owner: &str) -> StoreError {
    StoreError::NotOwned {
        key: key.to_owned(),
        owner: owner.to_owned(),
    }
}

// ── Deletion handles ───────────────────────────────────────────────────────

/// Handles for the tasks spawned by [`UrlStore::delete_keys`].
///
/// Plain `JoinHandle`s detach on drop, unlike a `JoinSet`, which would abort
/// its tasks.
#[derive(Debug)]
pub struct DeleteTasks {
    handles: Vec<(String, JoinHandle<Result<(), StoreError>>)>,
}

impl DeleteTasks {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every task and return the per-key outcomes in dispatch order.
    pub async fn wait(self) -> Vec<(String, Result<(), StoreError>)> {
        let mut outcomes = Vec::with_capacity(self.handles.len());
        for (key, handle) in self.handles {
            let outcome = match handle.await {
                Ok(result) => result,
                Err(e) => Err(StoreError::TaskFailed {
                    key: key.clone(),
                    reason: e.to_string(),
                }),
            };
            outcomes.push((key, outcome));
        }
        outcomes
    }
}
