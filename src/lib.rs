//! # statekeep
//!
//! Best-effort persistence of UI state and backoff-driven polling.
//!
//! This crate provides two independent pieces that sit directly under
//! rendering code and therefore never fail loudly:
//!
//! - **Keyed values**: typed, schema-validated JSON values under string keys
//!   in a synchronous storage backend ([`KeyedStore`]), plus a shared cache
//!   with change notification for consumers ([`ValueCache`],
//!   [`ManagedValue`]). Missing storage, corrupt data, schema mismatches and
//!   quota errors all read as "the key is empty".
//! - **Polling**: a sequential [`Poller`] that checks a resource on an
//!   exponentially growing interval until an interpreter says stop, the
//!   attempt budget runs out, or the caller stops it.
//!
//! ## Backends
//!
//! - [`SqliteBackend`]: Embedded SQLite database (durable)
//! - [`MemoryBackend`]: In-memory backend (testing and development)
//!
//! ## Quick Start
//!
//! ```rust
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//! use statekeep::{compose_key, KeyedStore, MemoryBackend};
//!
//! #[derive(Debug, PartialEq, Serialize, Deserialize)]
//! struct Density {
//!     rows: u32,
//! }
//!
//! let store = KeyedStore::new(Arc::new(MemoryBackend::new()));
//! let key = compose_key(&["gradebook", "user_7", "course_12"]);
//!
//! // Never written: the default comes back.
//! assert_eq!(store.read(&key, Density { rows: 25 }), Density { rows: 25 });
//!
//! store.write(&key, &Density { rows: 500 });
//!
//! // The schema rejects the stored value, so the default wins again.
//! let sane = |d: &Density| d.rows <= 100;
//! assert_eq!(store.read_with(&key, Density { rows: 25 }, &sane), Density { rows: 25 });
//! ```
//!
//! ## Polling
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use statekeep::{CheckOutcome, FnCheck, Poller, PollerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let check = FnCheck::new(|_url: String| async { 200u16 });
//!     let poller = Poller::new(
//!         "/api/v1/jobs/3",
//!         check,
//!         |status: &u16| match status {
//!             202 => CheckOutcome::Continue,
//!             200 => CheckOutcome::Stop,
//!             _ => CheckOutcome::from("error"),
//!         },
//!         PollerConfig::new(Duration::from_millis(250), 2.0).with_max_attempts(8),
//!     )?;
//!
//!     poller.start()?.await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod managed;
pub mod memory;
pub mod poller;
pub mod sqlite;
pub mod store;
pub mod watch;

// Re-export main types
pub use config::PollerConfig;
pub use error::{ConfigError, PollerError, Result, StoreError};
pub use managed::{ManagedValue, Status, ValueCache};
pub use memory::MemoryBackend;
pub use poller::{
    AbortReason, CheckOutcome, Completion, FnCheck, Poller, PollerPhase, ResourceCheck,
};
pub use sqlite::SqliteBackend;
pub use store::{
    compose_key, validate_key, KeyedStore, Schema, StorageBackend, MAX_KEY_LENGTH,
};
pub use watch::{EventType, WatchEvent, WatchStream};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::PollerConfig;
    pub use crate::error::{Result, StoreError};
    pub use crate::managed::{ManagedValue, Status, ValueCache};
    pub use crate::memory::MemoryBackend;
    pub use crate::poller::{CheckOutcome, FnCheck, Poller, PollerPhase, ResourceCheck};
    pub use crate::sqlite::SqliteBackend;
    pub use crate::store::{KeyedStore, Schema, StorageBackend};
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_memory_store_basic() {
        let store = KeyedStore::new(Arc::new(MemoryBackend::new()));

        store.write("test", &"value");
        assert_eq!(store.read("test", String::new()), "value");
    }

    #[test]
    fn test_shared_types_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}

        assert_send_sync::<KeyedStore>();
        assert_send_sync::<ValueCache>();
        assert_send_sync::<MemoryBackend>();
        assert_send_sync::<SqliteBackend>();
    }

    #[test]
    fn test_sqlite_and_memory_agree() {
        let backends: Vec<Arc<dyn StorageBackend>> = vec![
            Arc::new(MemoryBackend::new()) as Arc<dyn StorageBackend>,
            Arc::new(SqliteBackend::in_memory().unwrap()),
        ];

        for backend in backends {
            let cache = ValueCache::new(KeyedStore::new(backend));
            let zoom = cache.managed("viewer:zoom", 100u16);
            zoom.set(150);

            assert_eq!(cache.store().read("viewer:zoom", 0u16), 150);
        }
    }
}
