//! Durable state for registry and estuary actors
//!
//! One `StateStore` trait, two backends: in-memory for development/tests and
//! SQLite for durable single-node deployments. The service wrapper owns
//! backend selection and lifecycle.

pub mod error;
pub mod memory;
pub mod sqlite;
pub mod store;

pub use error::StateError;
pub use memory::MemoryStateStore;
pub use sqlite::SqliteStateStore;
pub use store::{
    EstuaryIdentity, EstuaryRecord, EstuarySourceRow, SourceRecord, StateStore, SubscriberRow,
};

use std::sync::Arc;

use crate::core::config::StateBackendType;
use crate::core::storage::AppStorage;

enum StateBackend {
    Memory(Arc<MemoryStateStore>),
    Sqlite(Arc<SqliteStateStore>),
}

/// State backend selection and lifecycle
pub struct StateService {
    backend: StateBackend,
}

impl StateService {
    /// Initialize the configured backend
    pub async fn init(
        backend: StateBackendType,
        storage: &AppStorage,
    ) -> Result<Self, StateError> {
        let backend = match backend {
            StateBackendType::Memory => StateBackend::Memory(Arc::new(MemoryStateStore::new())),
            StateBackendType::Sqlite => {
                StateBackend::Sqlite(Arc::new(SqliteStateStore::init(storage).await?))
            }
        };
        Ok(Self { backend })
    }

    /// Purely in-memory service (tests)
    pub fn memory() -> Self {
        Self {
            backend: StateBackend::Memory(Arc::new(MemoryStateStore::new())),
        }
    }

    /// The shared store handle actors persist through
    pub fn store(&self) -> Arc<dyn StateStore> {
        match &self.backend {
            StateBackend::Memory(store) => Arc::clone(store) as Arc<dyn StateStore>,
            StateBackend::Sqlite(store) => Arc::clone(store) as Arc<dyn StateStore>,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match &self.backend {
            StateBackend::Memory(_) => "memory",
            StateBackend::Sqlite(_) => "sqlite",
        }
    }

    /// Close underlying resources
    pub async fn close(&self) {
        if let StateBackend::Sqlite(store) = &self.backend {
            store.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_service() {
        let service = StateService::memory();
        assert_eq!(service.backend_name(), "memory");

        let key = crate::domain::keys::StreamKey::new("p", "s").unwrap();
        let store = service.store();
        store.insert_subscriber(&key, "e1", 1).await.unwrap();
        assert_eq!(store.load_source(&key).await.unwrap().subscribers.len(), 1);
        service.close().await;
    }
}
