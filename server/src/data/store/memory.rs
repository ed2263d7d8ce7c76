//! In-memory stream store
//!
//! A process-local append log implementing the stream-core contract:
//! offset-addressed appends, create-or-touch with content-type conflict
//! detection, and producer-sequence dedup. Used for local development and
//! throughout the engine's tests; production points at the real service via
//! the HTTP client.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::client::{
    DeleteResponse, HeadResponse, PostResponse, ProducerHeaders, PutResponse, StreamStore,
};
use super::error::StoreError;
use crate::domain::keys::StreamKey;

/// One appended entry
#[derive(Debug, Clone)]
struct Entry {
    payload: Vec<u8>,
    producer: Option<ProducerHeaders>,
}

/// Backing record for one stream
#[derive(Debug, Clone)]
struct StreamRecord {
    content_type: String,
    meta: Option<Vec<u8>>,
    next_offset: u64,
    entries: Vec<Entry>,
    /// Last accepted seq per (producer_id, producer_epoch); duplicates are
    /// acknowledged without appending
    producer_seqs: HashMap<(String, String), u64>,
}

impl StreamRecord {
    fn new(content_type: &str, meta: Option<&[u8]>) -> Self {
        Self {
            content_type: content_type.to_string(),
            meta: meta.map(<[u8]>::to_vec),
            next_offset: 0,
            entries: Vec::new(),
            producer_seqs: HashMap::new(),
        }
    }
}

/// In-memory stream store
#[derive(Default)]
pub struct MemoryStreamStore {
    streams: RwLock<HashMap<String, StreamRecord>>,
    /// Keys whose appends are forced to fail with a 500 (tests)
    failing: RwLock<HashSet<String>>,
}

impl MemoryStreamStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a stream directly (test and dev seeding)
    pub fn create_stream(&self, key: &StreamKey, content_type: &str) {
        self.streams
            .write()
            .entry(key.as_path())
            .or_insert_with(|| StreamRecord::new(content_type, None));
    }

    /// Force subsequent appends to `key` to fail with a 500
    pub fn fail_posts(&self, key: &StreamKey, failing: bool) {
        let mut set = self.failing.write();
        if failing {
            set.insert(key.as_path());
        } else {
            set.remove(&key.as_path());
        }
    }

    /// Payloads appended to a stream, in offset order
    pub fn payloads(&self, key: &StreamKey) -> Vec<Vec<u8>> {
        self.streams
            .read()
            .get(&key.as_path())
            .map(|r| r.entries.iter().map(|e| e.payload.clone()).collect())
            .unwrap_or_default()
    }

    /// Producer headers recorded with each append, in offset order
    pub fn producers(&self, key: &StreamKey) -> Vec<Option<ProducerHeaders>> {
        self.streams
            .read()
            .get(&key.as_path())
            .map(|r| r.entries.iter().map(|e| e.producer.clone()).collect())
            .unwrap_or_default()
    }

    pub fn stream_exists(&self, key: &StreamKey) -> bool {
        self.streams.read().contains_key(&key.as_path())
    }
}

#[async_trait]
impl StreamStore for MemoryStreamStore {
    async fn head(&self, key: &StreamKey) -> Result<HeadResponse, StoreError> {
        let streams = self.streams.read();
        match streams.get(&key.as_path()) {
            Some(record) => Ok(HeadResponse {
                exists: true,
                content_type: Some(record.content_type.clone()),
            }),
            None => Ok(HeadResponse {
                exists: false,
                content_type: None,
            }),
        }
    }

    async fn put(
        &self,
        key: &StreamKey,
        content_type: &str,
        body: Option<&[u8]>,
    ) -> Result<PutResponse, StoreError> {
        let mut streams = self.streams.write();
        match streams.get_mut(&key.as_path()) {
            None => {
                streams.insert(key.as_path(), StreamRecord::new(content_type, body));
                Ok(PutResponse { status: 201 })
            }
            Some(record) if record.content_type == content_type => {
                record.meta = body.map(<[u8]>::to_vec);
                Ok(PutResponse { status: 200 })
            }
            Some(_) => Ok(PutResponse { status: 409 }),
        }
    }

    async fn post(
        &self,
        key: &StreamKey,
        bytes: &[u8],
        _content_type: &str,
        producer: Option<&ProducerHeaders>,
    ) -> Result<PostResponse, StoreError> {
        if self.failing.read().contains(&key.as_path()) {
            return Ok(PostResponse {
                status: 500,
                next_offset: None,
            });
        }

        let mut streams = self.streams.write();
        let Some(record) = streams.get_mut(&key.as_path()) else {
            return Ok(PostResponse {
                status: 404,
                next_offset: None,
            });
        };

        if let Some(headers) = producer {
            let dedup_key = (headers.producer_id.clone(), headers.producer_epoch.clone());
            if let Ok(seq) = headers.producer_seq.parse::<u64>() {
                match record.producer_seqs.get(&dedup_key) {
                    // Duplicate or out-of-order replay: acknowledge, don't append
                    Some(&last) if seq <= last => {
                        return Ok(PostResponse {
                            status: 204,
                            next_offset: Some(record.next_offset),
                        });
                    }
                    _ => {
                        record.producer_seqs.insert(dedup_key, seq);
                    }
                }
            }
        }

        record.entries.push(Entry {
            payload: bytes.to_vec(),
            producer: producer.cloned(),
        });
        record.next_offset += 1;
        Ok(PostResponse {
            status: 204,
            next_offset: Some(record.next_offset),
        })
    }

    async fn delete(&self, key: &StreamKey) -> Result<DeleteResponse, StoreError> {
        let removed = self.streams.write().remove(&key.as_path()).is_some();
        Ok(DeleteResponse {
            status: if removed { 204 } else { 404 },
        })
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> StreamKey {
        StreamKey::new("p", s).unwrap()
    }

    #[tokio::test]
    async fn test_head_put_lifecycle() {
        let store = MemoryStreamStore::new();
        let k = key("s");

        assert!(!store.head(&k).await.unwrap().exists);

        let created = store.put(&k, "text/plain", None).await.unwrap();
        assert!(created.is_created());

        let touched = store.put(&k, "text/plain", Some(b"{}")).await.unwrap();
        assert_eq!(touched.status, 200);

        let head = store.head(&k).await.unwrap();
        assert!(head.exists);
        assert_eq!(head.content_type.as_deref(), Some("text/plain"));
    }

    #[tokio::test]
    async fn test_put_content_type_conflict() {
        let store = MemoryStreamStore::new();
        let k = key("s");
        store.put(&k, "text/plain", None).await.unwrap();
        let conflict = store.put(&k, "application/json", None).await.unwrap();
        assert!(conflict.is_conflict());
    }

    #[tokio::test]
    async fn test_post_appends_and_offsets_advance() {
        let store = MemoryStreamStore::new();
        let k = key("s");
        store.create_stream(&k, "text/plain");

        let first = store.post(&k, b"a", "text/plain", None).await.unwrap();
        let second = store.post(&k, b"b", "text/plain", None).await.unwrap();
        assert_eq!(first.next_offset, Some(1));
        assert_eq!(second.next_offset, Some(2));
        assert_eq!(store.payloads(&k), vec![b"a".to_vec(), b"b".to_vec()]);
    }

    #[tokio::test]
    async fn test_post_missing_stream_is_stale() {
        let store = MemoryStreamStore::new();
        let resp = store
            .post(&key("gone"), b"x", "text/plain", None)
            .await
            .unwrap();
        assert!(resp.stale());
    }

    #[tokio::test]
    async fn test_producer_dedup() {
        let store = MemoryStreamStore::new();
        let k = key("s");
        store.create_stream(&k, "text/plain");

        let headers = ProducerHeaders::fanout("src", 4);
        let first = store
            .post(&k, b"m", "text/plain", Some(&headers))
            .await
            .unwrap();
        assert!(first.ok());

        // Same (id, epoch, seq) again: acknowledged but not appended
        let dup = store
            .post(&k, b"m", "text/plain", Some(&headers))
            .await
            .unwrap();
        assert!(dup.ok());
        assert_eq!(store.payloads(&k).len(), 1);

        // Lower seq from the same producer is also a replay
        let replay = ProducerHeaders::fanout("src", 3);
        store
            .post(&k, b"old", "text/plain", Some(&replay))
            .await
            .unwrap();
        assert_eq!(store.payloads(&k).len(), 1);

        // Higher seq appends
        let next = ProducerHeaders::fanout("src", 5);
        store
            .post(&k, b"n", "text/plain", Some(&next))
            .await
            .unwrap();
        assert_eq!(store.payloads(&k).len(), 2);
    }

    #[tokio::test]
    async fn test_delete_idempotent() {
        let store = MemoryStreamStore::new();
        let k = key("s");
        store.create_stream(&k, "text/plain");

        assert_eq!(store.delete(&k).await.unwrap().status, 204);
        let again = store.delete(&k).await.unwrap();
        assert_eq!(again.status, 404);
        assert!(again.ok());
    }

    #[tokio::test]
    async fn test_fail_posts_injection() {
        let store = MemoryStreamStore::new();
        let k = key("s");
        store.create_stream(&k, "text/plain");
        store.fail_posts(&k, true);

        let resp = store.post(&k, b"x", "text/plain", None).await.unwrap();
        assert_eq!(resp.status, 500);
        assert!(!resp.ok() && !resp.stale());

        store.fail_posts(&k, false);
        assert!(store.post(&k, b"x", "text/plain", None).await.unwrap().ok());
    }
}
