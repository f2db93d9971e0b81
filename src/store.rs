//! Keyed value store over a synchronous storage backend.
//!
//! A [`KeyedStore`] wraps an optional [`StorageBackend`] (the shape of a
//! browser's `localStorage`: string keys, string values) and layers typed
//! JSON values and caller-supplied schemas on top of it.
//!
//! Every failure degrades to "the key is empty":
//!
//! - **No backend** or a disabled backend reads as empty and drops writes.
//! - **Corrupt JSON** or a value of the wrong shape reads as the default.
//! - **Schema rejection** reads as the default.
//! - **Backend errors** (quota, I/O) are logged and discarded.
//!
//! The `try_` variants expose the underlying [`StoreError`] for callers that
//! want to report it.

use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{Result, StoreError};

/// Maximum key length in bytes.
pub const MAX_KEY_LENGTH: usize = 1024;

/// Separator used by [`compose_key`].
pub const KEY_SEPARATOR: char = ':';

/// Object-safe string key/value backend (DOM's `Storage`).
///
/// Writes are whole-value overwrites; there is no partial update.
pub trait StorageBackend: Send + Sync {
    /// Whether the backend can currently serve requests.
    ///
    /// A backend that is present but disabled (private browsing, storage
    /// turned off) returns `false` and is treated exactly like a missing one.
    fn is_available(&self) -> bool {
        true
    }

    /// Retrieves the raw value stored under `key`, or `None` if absent.
    fn get_item(&self, key: &str) -> Result<Option<String>>;

    /// Stores `value` under `key`, overwriting any existing value.
    fn set_item(&self, key: &str, value: &str) -> Result<()>;
}

/// Accepts or rejects a decoded candidate value.
///
/// Shape checking is done by deserializing into `T`; a schema adds the
/// constraints a type cannot express (ranges, enumerations, invariants
/// across fields).
pub trait Schema<T> {
    fn accepts(&self, candidate: &T) -> bool;
}

impl<T, F> Schema<T> for F
where
    F: Fn(&T) -> bool,
{
    fn accepts(&self, candidate: &T) -> bool {
        self(candidate)
    }
}

/// Validate that a key is well-formed.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(StoreError::InvalidKey("key cannot be empty".to_string()));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(StoreError::InvalidKey(format!(
            "key exceeds maximum length of {} bytes",
            MAX_KEY_LENGTH
        )));
    }
    Ok(())
}

/// Joins identity parts into a single storage key.
///
/// `compose_key(&["sidebar", "user_7", "course_12"])` yields
/// `"sidebar:user_7:course_12"`, so the same logical value always maps to
/// the same key across reloads.
pub fn compose_key<S: AsRef<str>>(parts: &[S]) -> String {
    let mut key = String::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            key.push(KEY_SEPARATOR);
        }
        key.push_str(part.as_ref());
    }
    key
}

/// Typed, schema-validated access to a storage backend.
#[derive(Clone, Default)]
pub struct KeyedStore {
    backend: Option<Arc<dyn StorageBackend>>,
}

impl std::fmt::Debug for KeyedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedStore")
            .field("available", &self.is_available())
            .finish()
    }
}

impl KeyedStore {
    /// Create a store over the given backend.
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    /// Create a store with no backend; every key reads as empty.
    pub fn unavailable() -> Self {
        Self { backend: None }
    }

    /// Whether a usable backend is attached.
    pub fn is_available(&self) -> bool {
        self.backend
            .as_ref()
            .map(|b| b.is_available())
            .unwrap_or(false)
    }

    fn backend(&self) -> Result<&dyn StorageBackend> {
        match &self.backend {
            Some(backend) if backend.is_available() => Ok(backend.as_ref()),
            _ => Err(StoreError::BackendUnavailable),
        }
    }

    fn read_inner<T: DeserializeOwned>(
        &self,
        key: &str,
        schema: Option<&dyn Schema<T>>,
    ) -> Result<Option<T>> {
        validate_key(key)?;
        let backend = self.backend()?;

        let raw = match backend.get_item(key)? {
            Some(raw) => raw,
            None => return Ok(None),
        };

        let value: T =
            serde_json::from_str(&raw).map_err(|e| StoreError::DeserializationFailure {
                key: key.to_string(),
                reason: e.to_string(),
            })?;

        if let Some(schema) = schema {
            if !schema.accepts(&value) {
                return Err(StoreError::SchemaRejection(key.to_string()));
            }
        }

        Ok(Some(value))
    }

    /// Read and decode the value at `key`.
    ///
    /// Returns `Ok(None)` if the key was never written.
    pub fn try_read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.read_inner(key, None)
    }

    /// Read and decode the value at `key`, then check it against `schema`.
    pub fn try_read_with<T, S>(&self, key: &str, schema: &S) -> Result<Option<T>>
    where
        T: DeserializeOwned,
        S: Schema<T>,
    {
        self.read_inner(key, Some(schema as &dyn Schema<T>))
    }

    /// Read the value at `key`, falling back to `default` on any failure.
    pub fn read<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        Self::or_default(key, self.try_read(key), default)
    }

    /// Like [`read`](Self::read), but values rejected by `schema` also
    /// yield `default`.
    pub fn read_with<T, S>(&self, key: &str, default: T, schema: &S) -> T
    where
        T: DeserializeOwned,
        S: Schema<T>,
    {
        Self::or_default(key, self.try_read_with(key, schema), default)
    }

    fn or_default<T>(key: &str, result: Result<Option<T>>, default: T) -> T {
        match result {
            Ok(Some(value)) => value,
            Ok(None) => default,
            Err(err) => {
                debug!(key, error = %err, "read degraded to default");
                default
            }
        }
    }

    /// Encode `value` as JSON and persist it at `key`.
    pub fn try_write<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        validate_key(key)?;
        let backend = self.backend()?;
        let encoded = serde_json::to_string(value)
            .map_err(|e| StoreError::SerializationFailure(e.to_string()))?;
        backend.set_item(key, &encoded)
    }

    /// Persist `value` at `key`, discarding any failure.
    pub fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        match self.try_write(key, value) {
            Ok(()) => {}
            Err(StoreError::BackendUnavailable) => {
                debug!(key, "no storage backend, write dropped");
            }
            Err(err) => {
                warn!(key, error = %err, "write failed, value not persisted");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use serde::Deserialize;
    use std::collections::HashMap;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Layout {
        collapsed: bool,
        width: u32,
    }

    /// A backend whose every operation fails.
    struct ThrowingBackend;

    impl StorageBackend for ThrowingBackend {
        fn get_item(&self, _key: &str) -> Result<Option<String>> {
            Err(StoreError::Backend("getItem threw".to_string()))
        }

        fn set_item(&self, _key: &str, _value: &str) -> Result<()> {
            Err(StoreError::Backend("setItem threw".to_string()))
        }
    }

    fn memory_store() -> (Arc<MemoryBackend>, KeyedStore) {
        let backend = Arc::new(MemoryBackend::new());
        (backend.clone(), KeyedStore::new(backend))
    }

    fn narrow(layout: &Layout) -> bool {
        layout.width <= 400
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("k").is_ok());
        assert!(matches!(validate_key(""), Err(StoreError::InvalidKey(_))));
        let long = "a".repeat(MAX_KEY_LENGTH + 1);
        assert!(matches!(validate_key(&long), Err(StoreError::InvalidKey(_))));
    }

    #[test]
    fn test_compose_key() {
        assert_eq!(
            compose_key(&["modules", "user_7", "course_12"]),
            "modules:user_7:course_12"
        );
        assert_eq!(compose_key(&["solo"]), "solo");
        assert_eq!(compose_key::<&str>(&[]), "");
    }

    #[test]
    fn test_unwritten_key_reads_default() {
        let (_, store) = memory_store();
        assert_eq!(store.read("never", 17u32), 17);
        assert_eq!(store.read_with("never", 3u32, &|v: &u32| *v > 100), 3);
        assert!(store.try_read::<u32>("never").unwrap().is_none());
    }

    #[test]
    fn test_round_trip() {
        let (_, store) = memory_store();
        let layout = Layout {
            collapsed: true,
            width: 240,
        };
        store.write("layout", &layout);

        let default = Layout {
            collapsed: false,
            width: 0,
        };
        assert_eq!(store.read_with("layout", default, &narrow), layout);
    }

    #[test]
    fn test_schema_rejection_survives_round_trip() {
        let (_, store) = memory_store();
        let wide = Layout {
            collapsed: false,
            width: 900,
        };
        store.write("layout", &wide);

        let default = Layout {
            collapsed: true,
            width: 100,
        };
        assert_eq!(store.read_with("layout", default.clone(), &narrow), default);
        assert!(matches!(
            store.try_read_with("layout", &narrow),
            Err(StoreError::SchemaRejection(_))
        ));
        // Without the schema the stored value is still there.
        assert_eq!(store.read("layout", default), wide);
    }

    #[test]
    fn test_corrupt_json_reads_default() {
        let (backend, store) = memory_store();
        backend.set_item("broken", "{not json").unwrap();

        assert_eq!(store.read("broken", vec![1u8]), vec![1u8]);
        assert!(matches!(
            store.try_read::<Vec<u8>>("broken"),
            Err(StoreError::DeserializationFailure { .. })
        ));
    }

    #[test]
    fn test_wrong_shape_reads_default() {
        let (_, store) = memory_store();
        store.write("count", "not a number");
        assert_eq!(store.read("count", 5i64), 5);
    }

    #[test]
    fn test_missing_backend() {
        let store = KeyedStore::unavailable();
        assert!(!store.is_available());

        store.write("k", &1u8);
        assert_eq!(store.read("k", 9u8), 9);
        assert!(matches!(
            store.try_write("k", &1u8),
            Err(StoreError::BackendUnavailable)
        ));
    }

    #[test]
    fn test_disabled_backend_behaves_as_missing() {
        let (backend, store) = memory_store();
        store.write("k", &1u8);
        backend.set_available(false);

        assert!(!store.is_available());
        assert_eq!(store.read("k", 9u8), 9);
        store.write("k", &2u8);

        backend.set_available(true);
        assert_eq!(store.read("k", 9u8), 1);
    }

    #[test]
    fn test_throwing_backend_never_throws() {
        let store = KeyedStore::new(Arc::new(ThrowingBackend));
        store.write("k", &"value");
        assert_eq!(store.read("k", "fallback".to_string()), "fallback");
        assert!(store.try_write("k", &"value").unwrap_err().is_backend_fault());
    }

    #[test]
    fn test_serialization_failure_is_swallowed() {
        let (backend, store) = memory_store();
        let mut bad = HashMap::new();
        bad.insert((1u8, 2u8), "tuple keys are not JSON object keys");

        store.write("bad", &bad);
        assert!(backend.get_item("bad").unwrap().is_none());
        assert!(matches!(
            store.try_write("bad", &bad),
            Err(StoreError::SerializationFailure(_))
        ));
    }

    #[test]
    fn test_invalid_key_degrades() {
        let (_, store) = memory_store();
        store.write("", &1u8);
        assert_eq!(store.read("", 4u8), 4);
    }

    #[test]
    fn test_write_overwrites_whole_value() {
        let (_, store) = memory_store();
        store.write("layout", &Layout { collapsed: true, width: 10 });
        store.write("layout", &serde_json::json!({ "width": 20 }));

        // The partial object replaced the old one; it no longer decodes.
        let default = Layout {
            collapsed: false,
            width: 1,
        };
        assert_eq!(store.read("layout", default.clone()), default);
    }
}
