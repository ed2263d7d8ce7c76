//! In-memory state store
//!
//! HashMap-backed state for development and tests. Everything is lost on
//! restart, which also makes it the wrong backend anywhere fanout sequence
//! durability matters.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::error::StateError;
use super::store::{
    EstuaryIdentity, EstuaryRecord, EstuarySourceRow, SourceRecord, StateStore, SubscriberRow,
};
use crate::domain::keys::StreamKey;

#[derive(Default)]
struct SourceEntry {
    /// estuary id -> subscribed_at
    subscribers: HashMap<String, i64>,
    next_fanout_seq: u64,
}

#[derive(Default)]
struct EstuaryEntry {
    /// stream id -> subscribed_at
    sources: HashMap<String, i64>,
    identity: Option<EstuaryIdentity>,
}

/// In-memory state store
#[derive(Default)]
pub struct MemoryStateStore {
    sources: RwLock<HashMap<String, SourceEntry>>,
    estuaries: RwLock<HashMap<String, EstuaryEntry>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load_source(&self, key: &StreamKey) -> Result<SourceRecord, StateError> {
        let sources = self.sources.read();
        let Some(entry) = sources.get(&key.as_path()) else {
            return Ok(SourceRecord::default());
        };

        let mut subscribers: Vec<SubscriberRow> = entry
            .subscribers
            .iter()
            .map(|(id, &at)| SubscriberRow {
                estuary_id: id.clone(),
                subscribed_at: at,
            })
            .collect();
        subscribers.sort_by(|a, b| a.estuary_id.cmp(&b.estuary_id));

        Ok(SourceRecord {
            subscribers,
            next_fanout_seq: entry.next_fanout_seq,
        })
    }

    async fn insert_subscriber(
        &self,
        key: &StreamKey,
        estuary_id: &str,
        subscribed_at: i64,
    ) -> Result<bool, StateError> {
        let mut sources = self.sources.write();
        let entry = sources.entry(key.as_path()).or_default();
        if entry.subscribers.contains_key(estuary_id) {
            return Ok(false);
        }
        entry.subscribers.insert(estuary_id.to_string(), subscribed_at);
        Ok(true)
    }

    async fn delete_subscribers(
        &self,
        key: &StreamKey,
        estuary_ids: &[String],
    ) -> Result<u64, StateError> {
        let mut sources = self.sources.write();
        let Some(entry) = sources.get_mut(&key.as_path()) else {
            return Ok(0);
        };
        let mut removed = 0;
        for id in estuary_ids {
            if entry.subscribers.remove(id).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn save_next_fanout_seq(&self, key: &StreamKey, next: u64) -> Result<(), StateError> {
        let mut sources = self.sources.write();
        sources.entry(key.as_path()).or_default().next_fanout_seq = next;
        Ok(())
    }

    async fn load_estuary(&self, key: &StreamKey) -> Result<EstuaryRecord, StateError> {
        let estuaries = self.estuaries.read();
        let Some(entry) = estuaries.get(&key.as_path()) else {
            return Ok(EstuaryRecord::default());
        };

        let mut sources: Vec<EstuarySourceRow> = entry
            .sources
            .iter()
            .map(|(id, &at)| EstuarySourceRow {
                stream_id: id.clone(),
                subscribed_at: at,
            })
            .collect();
        // Most recent subscription first, ties broken by id for stable reads
        sources.sort_by(|a, b| {
            b.subscribed_at
                .cmp(&a.subscribed_at)
                .then_with(|| a.stream_id.cmp(&b.stream_id))
        });

        Ok(EstuaryRecord {
            sources,
            identity: entry.identity.clone(),
        })
    }

    async fn insert_estuary_source(
        &self,
        key: &StreamKey,
        stream_id: &str,
        subscribed_at: i64,
    ) -> Result<bool, StateError> {
        let mut estuaries = self.estuaries.write();
        let entry = estuaries.entry(key.as_path()).or_default();
        if entry.sources.contains_key(stream_id) {
            return Ok(false);
        }
        entry.sources.insert(stream_id.to_string(), subscribed_at);
        Ok(true)
    }

    async fn delete_estuary_source(
        &self,
        key: &StreamKey,
        stream_id: &str,
    ) -> Result<bool, StateError> {
        let mut estuaries = self.estuaries.write();
        let Some(entry) = estuaries.get_mut(&key.as_path()) else {
            return Ok(false);
        };
        Ok(entry.sources.remove(stream_id).is_some())
    }

    async fn save_estuary_identity(
        &self,
        key: &StreamKey,
        identity: &EstuaryIdentity,
    ) -> Result<(), StateError> {
        let mut estuaries = self.estuaries.write();
        estuaries.entry(key.as_path()).or_default().identity = Some(identity.clone());
        Ok(())
    }

    async fn clear_estuary(&self, key: &StreamKey) -> Result<(), StateError> {
        self.estuaries.write().remove(&key.as_path());
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> StreamKey {
        StreamKey::new("p", "s").unwrap()
    }

    #[tokio::test]
    async fn test_subscriber_insert_is_idempotent() {
        let store = MemoryStateStore::new();
        let k = key();

        assert!(store.insert_subscriber(&k, "e1", 100).await.unwrap());
        assert!(!store.insert_subscriber(&k, "e1", 200).await.unwrap());

        let record = store.load_source(&k).await.unwrap();
        assert_eq!(record.subscribers.len(), 1);
        // First write wins; the duplicate did not touch the timestamp
        assert_eq!(record.subscribers[0].subscribed_at, 100);
    }

    #[tokio::test]
    async fn test_delete_subscribers_counts_removed() {
        let store = MemoryStateStore::new();
        let k = key();
        store.insert_subscriber(&k, "e1", 1).await.unwrap();
        store.insert_subscriber(&k, "e2", 2).await.unwrap();

        let removed = store
            .delete_subscribers(&k, &["e1".into(), "missing".into()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.load_source(&k).await.unwrap().subscribers.len(), 1);
    }

    #[tokio::test]
    async fn test_next_fanout_seq_roundtrip() {
        let store = MemoryStateStore::new();
        let k = key();
        assert_eq!(store.load_source(&k).await.unwrap().next_fanout_seq, 0);

        store.save_next_fanout_seq(&k, 5).await.unwrap();
        assert_eq!(store.load_source(&k).await.unwrap().next_fanout_seq, 5);
    }

    #[tokio::test]
    async fn test_estuary_sources_ordered_recent_first() {
        let store = MemoryStateStore::new();
        let k = StreamKey::estuary("p", "3f2b8c1a-9d4e-4f6a-8b2c-1d3e5f7a9b0c").unwrap();

        store.insert_estuary_source(&k, "s1", 100).await.unwrap();
        store.insert_estuary_source(&k, "s2", 300).await.unwrap();
        store.insert_estuary_source(&k, "s3", 200).await.unwrap();

        let record = store.load_estuary(&k).await.unwrap();
        let ids: Vec<&str> = record.sources.iter().map(|s| s.stream_id.as_str()).collect();
        assert_eq!(ids, ["s2", "s3", "s1"]);
    }

    #[tokio::test]
    async fn test_clear_estuary_removes_everything() {
        let store = MemoryStateStore::new();
        let k = StreamKey::estuary("p", "3f2b8c1a-9d4e-4f6a-8b2c-1d3e5f7a9b0c").unwrap();

        store.insert_estuary_source(&k, "s1", 1).await.unwrap();
        store
            .save_estuary_identity(
                &k,
                &EstuaryIdentity {
                    project_id: "p".into(),
                    estuary_id: k.stream_id().into(),
                    expires_at: Some(9999),
                },
            )
            .await
            .unwrap();

        store.clear_estuary(&k).await.unwrap();
        let record = store.load_estuary(&k).await.unwrap();
        assert!(record.sources.is_empty());
        assert!(record.identity.is_none());
    }
}
