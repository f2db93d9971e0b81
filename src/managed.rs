//! Reactive bindings over a [`KeyedStore`].
//!
//! A [`ValueCache`] is the lifetime scope of a set of consumers (a page, a
//! view tree). Within it, every [`ManagedValue`] for the same key shares
//! one cached slot: a write through any handle is visible to all others
//! before `set` returns, and is then persisted best-effort.
//!
//! ```rust
//! use std::sync::Arc;
//! use statekeep::{KeyedStore, MemoryBackend, ValueCache};
//!
//! let cache = ValueCache::new(KeyedStore::new(Arc::new(MemoryBackend::new())));
//!
//! let expanded = cache.managed("modules:user_7:expanded", false);
//! expanded.set(true);
//!
//! let other = cache.managed("modules:user_7:expanded", false);
//! assert!(other.get());
//! ```

use parking_lot::{Mutex, RwLock};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::store::{KeyedStore, Schema};
use crate::watch::{WatchEvent, WatchSender, WatchStream};

/// Freshness of a managed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The initial read has not completed yet; the value is the default.
    Pending,
    /// The value reflects storage or a later local write.
    Success,
    /// Reserved for backends that report failures asynchronously. The
    /// current persistence path never produces it.
    Error,
}

#[derive(Debug)]
struct Slot {
    value: Value,
    status: Status,
}

/// One cached key. `commit` serializes setters so that the order in which
/// values reach memory is the order in which they reach storage.
#[derive(Debug)]
struct SlotCell {
    slot: RwLock<Slot>,
    commit: Mutex<()>,
}

type SharedSlot = Arc<SlotCell>;

struct CacheInner {
    store: KeyedStore,
    slots: RwLock<HashMap<String, SharedSlot>>,
    watcher: WatchSender,
}

/// Shared key → value cache with subscriber notification.
///
/// Cloning is cheap and yields a handle to the same cache. The cache is
/// torn down when the last clone and the last [`ManagedValue`] are dropped;
/// the backing store is unaffected.
#[derive(Clone)]
pub struct ValueCache {
    inner: Arc<CacheInner>,
}

impl std::fmt::Debug for ValueCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueCache")
            .field("keys", &self.len())
            .finish_non_exhaustive()
    }
}

impl ValueCache {
    /// Create an empty cache over `store`.
    pub fn new(store: KeyedStore) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                store,
                slots: RwLock::new(HashMap::new()),
                watcher: WatchSender::default(),
            }),
        }
    }

    /// The store this cache persists to.
    pub fn store(&self) -> &KeyedStore {
        &self.inner.store
    }

    /// Bind to `key`, initializing from storage on first use.
    pub fn managed<T>(&self, key: &str, default: T) -> ManagedValue<T>
    where
        T: Serialize + DeserializeOwned + Clone,
    {
        self.attach(key, default, |store, key, default| store.read(key, default))
    }

    /// Bind to `key`; a stored value rejected by `schema` initializes the
    /// slot with `default` instead.
    pub fn managed_with<T, S>(&self, key: &str, default: T, schema: &S) -> ManagedValue<T>
    where
        T: Serialize + DeserializeOwned + Clone,
        S: Schema<T>,
    {
        self.attach(key, default, |store, key, default| {
            store.read_with(key, default, schema)
        })
    }

    fn attach<T, F>(&self, key: &str, default: T, load: F) -> ManagedValue<T>
    where
        T: Serialize + DeserializeOwned + Clone,
        F: FnOnce(&KeyedStore, &str, T) -> T,
    {
        let (slot, fresh) = {
            let mut slots = self.inner.slots.write();
            match slots.get(key) {
                Some(slot) => (slot.clone(), false),
                None => {
                    let slot = Arc::new(SlotCell {
                        slot: RwLock::new(Slot {
                            value: serde_json::to_value(&default).unwrap_or(Value::Null),
                            status: Status::Pending,
                        }),
                        commit: Mutex::new(()),
                    });
                    slots.insert(key.to_string(), slot.clone());
                    (slot, true)
                }
            }
        };

        if fresh {
            let loaded = load(&self.inner.store, key, default.clone());
            let value = serde_json::to_value(&loaded).unwrap_or(Value::Null);
            {
                let mut slot = slot.slot.write();
                // A consumer may already have written while the read ran.
                if slot.status == Status::Pending {
                    slot.value = value.clone();
                    slot.status = Status::Success;
                }
            }
            self.inner.watcher.send(WatchEvent::initialized(key, value));
        }

        ManagedValue {
            cache: self.clone(),
            key: key.to_string(),
            default,
            slot,
        }
    }

    /// Drop the cached slot for `key` so the next [`managed`](Self::managed)
    /// call re-reads from storage.
    ///
    /// A slot still referenced by a live [`ManagedValue`] is kept, so every
    /// consumer of a key keeps sharing one value. Returns whether the slot
    /// was removed.
    pub fn evict(&self, key: &str) -> bool {
        let mut slots = self.inner.slots.write();
        match slots.get(key) {
            Some(slot) if Arc::strong_count(slot) == 1 => {
                slots.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Check whether `key` is cached.
    pub fn contains(&self, key: &str) -> bool {
        self.inner.slots.read().contains_key(key)
    }

    /// Number of cached keys.
    pub fn len(&self) -> usize {
        self.inner.slots.read().len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.slots.read().is_empty()
    }

    /// Watch for changes matching a pattern (exact key or `prefix*`).
    pub fn subscribe(&self, pattern: &str) -> WatchStream {
        self.inner.watcher.subscribe(pattern)
    }
}

/// A typed handle to one cached key: current value, setter and status.
#[derive(Clone)]
pub struct ManagedValue<T> {
    cache: ValueCache,
    key: String,
    default: T,
    slot: SharedSlot,
}

impl<T> std::fmt::Debug for ManagedValue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedValue")
            .field("key", &self.key)
            .field("slot", &*self.slot.slot.read())
            .finish_non_exhaustive()
    }
}

impl<T> ManagedValue<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    /// The storage key this handle is bound to.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The current value.
    ///
    /// If another handle stored a value of a different shape under the same
    /// key, this handle sees its own default.
    pub fn get(&self) -> T {
        let slot = self.slot.slot.read();
        serde_json::from_value(slot.value.clone()).unwrap_or_else(|_| self.default.clone())
    }

    /// Freshness of the current value.
    pub fn status(&self) -> Status {
        self.slot.slot.read().status
    }

    /// Replace the value.
    ///
    /// Every handle on this key observes `next` once this returns, whether
    /// or not persisting it succeeds. The one exception is a value that
    /// cannot be represented as JSON: it is logged and the call does nothing,
    /// since the shared slot only holds JSON.
    ///
    /// The write to storage happens on the calling thread before `set`
    /// returns, and concurrent setters on one key commit one at a time. With
    /// a slow backend such as [`SqliteBackend`](crate::sqlite::SqliteBackend)
    /// this blocks; async callers should move the call onto
    /// `tokio::task::spawn_blocking`. Readers are never blocked by the write.
    pub fn set(&self, next: T) {
        let value = match serde_json::to_value(&next) {
            Ok(value) => value,
            Err(err) => {
                warn!(key = %self.key, error = %err, "value is not JSON-representable, set ignored");
                return;
            }
        };

        let _commit = self.slot.commit.lock();
        {
            let mut slot = self.slot.slot.write();
            slot.value = value.clone();
            slot.status = Status::Success;
        }
        self.cache.store().write(&self.key, &value);
        self.cache
            .inner
            .watcher
            .send(WatchEvent::updated(self.key.as_str(), value));
    }

    /// Replace the value with `f(current)`.
    pub fn update(&self, f: impl FnOnce(T) -> T) {
        self.set(f(self.get()));
    }

    /// Watch this key for changes made through any handle.
    pub fn subscribe(&self) -> WatchStream {
        self.cache.subscribe(&self.key)
    }
}
