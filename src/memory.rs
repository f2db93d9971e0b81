//! In-memory storage backend.
//!
//! This implementation is NOT durable - data is lost on process exit.
//! It mirrors a browser storage area closely enough for tests: an optional
//! byte quota makes oversized writes fail, and the backend can be switched
//! off to emulate disabled storage.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Result, StoreError};
use crate::store::StorageBackend;

/// In-memory implementation of [`StorageBackend`].
///
/// Uses a BTreeMap for ordered key iteration and RwLock for concurrency.
pub struct MemoryBackend {
    data: RwLock<BTreeMap<String, String>>,
    quota: Option<usize>,
    available: AtomicBool,
}

impl MemoryBackend {
    /// Create a new empty backend with no quota.
    pub fn new() -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
            quota: None,
            available: AtomicBool::new(true),
        }
    }

    /// Create a backend that refuses writes once keys and values together
    /// exceed `bytes`.
    pub fn with_quota(bytes: usize) -> Self {
        Self {
            quota: Some(bytes),
            ..Self::new()
        }
    }

    /// Enable or disable the backend.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Get the number of entries.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Check if the backend is empty.
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// All keys in lexicographic order.
    pub fn keys(&self) -> Vec<String> {
        self.data.read().keys().cloned().collect()
    }

    /// Bytes currently used by keys and values.
    pub fn used_bytes(&self) -> usize {
        Self::usage(&self.data.read())
    }

    /// Clear all entries.
    pub fn clear(&self) {
        self.data.write().clear();
    }

    fn usage(data: &BTreeMap<String, String>) -> usize {
        data.iter().map(|(k, v)| k.len() + v.len()).sum()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBackend for MemoryBackend {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let mut data = self.data.write();

        if let Some(limit) = self.quota {
            let replaced = data.get(key).map(|v| key.len() + v.len()).unwrap_or(0);
            let used = Self::usage(&data) - replaced + key.len() + value.len();
            if used > limit {
                return Err(StoreError::QuotaExceeded { used, limit });
            }
        }

        data.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let backend = MemoryBackend::new();
        backend.set_item("a", "1").unwrap();
        backend.set_item("b", "2").unwrap();

        assert_eq!(backend.len(), 2);
        assert_eq!(backend.get_item("a").unwrap().as_deref(), Some("1"));
        assert!(backend.get_item("missing").unwrap().is_none());
    }

    #[test]
    fn test_overwrite_keeps_len() {
        let backend = MemoryBackend::new();
        backend.set_item("a", "1").unwrap();
        backend.set_item("a", "ONE").unwrap();

        assert_eq!(backend.len(), 1);
        assert_eq!(backend.get_item("a").unwrap().as_deref(), Some("ONE"));
    }

    #[test]
    fn test_keys_sorted() {
        let backend = MemoryBackend::new();
        backend.set_item("b", "").unwrap();
        backend.set_item("a", "").unwrap();
        assert_eq!(backend.keys(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_quota_rejects_oversized_write() {
        let backend = MemoryBackend::with_quota(10);
        backend.set_item("k", "12345").unwrap();
        assert_eq!(backend.used_bytes(), 6);

        let err = backend.set_item("other", "123456").unwrap_err();
        assert!(matches!(err, StoreError::QuotaExceeded { limit: 10, .. }));
        assert!(backend.get_item("other").unwrap().is_none());
    }

    #[test]
    fn test_quota_counts_replacement_not_addition() {
        let backend = MemoryBackend::with_quota(10);
        backend.set_item("k", "123456789").unwrap();
        // Overwriting frees the old value first.
        backend.set_item("k", "987654321").unwrap();
        assert_eq!(backend.get_item("k").unwrap().as_deref(), Some("987654321"));
    }

    #[test]
    fn test_availability_toggle() {
        let backend = MemoryBackend::new();
        assert!(backend.is_available());
        backend.set_available(false);
        assert!(!backend.is_available());
    }

    #[test]
    fn test_clear() {
        let backend = MemoryBackend::new();
        backend.set_item("a", "1").unwrap();
        backend.clear();
        assert!(backend.is_empty());
    }
}
