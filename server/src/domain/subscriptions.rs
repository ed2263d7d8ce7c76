//! Subscribe / unsubscribe orchestration
//!
//! Cross-entity operations spanning the stream store, the source registry,
//! and the estuary lifecycle actor. Subscribe is the only operation that
//! needs rollback: if the registry add fails after this call created the
//! estuary stream, the stream is deleted best-effort and the original error
//! re-raised.

use std::sync::Arc;

use serde_json::json;

use crate::core::config::FanoutConfig;
use crate::core::constants::{CONTENT_TYPE_CACHE_MAX_ENTRIES, CONTENT_TYPE_CACHE_TTL_SECS};
use crate::data::store::StreamStore;
use crate::domain::error::FanoutError;
use crate::domain::estuary::EstuaryRouter;
use crate::domain::keys::{StreamKey, validate_estuary_id, validate_project_id, validate_stream_id};
use crate::domain::registry::{PublishReceipt, PublishRequest, SourceRouter};
use crate::utils::time::now_ms;

/// Fallback when a source stream reports no content-type
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Result of a successful subscribe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeReceipt {
    pub estuary_id: String,
    pub stream_id: String,
    /// `projectId/estuaryId` path of the estuary stream
    pub estuary_stream_path: String,
    /// Expiry deadline in ms epoch
    pub expires_at: i64,
    pub is_new_estuary: bool,
}

/// Lifecycle and publish entry points
pub struct SubscriptionService {
    store: Arc<dyn StreamStore>,
    sources: Arc<SourceRouter>,
    estuaries: Arc<EstuaryRouter>,
    ttl_seconds: u64,
    /// Source content-type lookups are hot on the subscribe path; cache them
    /// briefly so repeated subscribes skip the head round-trip
    content_types: moka::future::Cache<String, String>,
}

impl SubscriptionService {
    pub fn new(
        store: Arc<dyn StreamStore>,
        sources: Arc<SourceRouter>,
        estuaries: Arc<EstuaryRouter>,
        config: &FanoutConfig,
    ) -> Self {
        let content_types = moka::future::Cache::builder()
            .max_capacity(CONTENT_TYPE_CACHE_MAX_ENTRIES)
            .time_to_live(std::time::Duration::from_secs(CONTENT_TYPE_CACHE_TTL_SECS))
            .build();
        Self {
            store,
            sources,
            estuaries,
            ttl_seconds: config.estuary_ttl_seconds,
            content_types,
        }
    }

    /// Publish a payload to a source stream
    pub async fn publish(
        &self,
        project_id: &str,
        stream_id: &str,
        request: PublishRequest,
    ) -> Result<PublishReceipt, FanoutError> {
        let source_key = StreamKey::new(project_id, stream_id)?;
        self.sources.handle(&source_key).publish(request).await
    }

    /// Subscribe an estuary to a source stream
    pub async fn subscribe(
        &self,
        project_id: &str,
        stream_id: &str,
        estuary_id: &str,
    ) -> Result<SubscribeReceipt, FanoutError> {
        let source_key = StreamKey::new(project_id, stream_id)?;
        let estuary_key = StreamKey::estuary(project_id, estuary_id)?;

        // 1. The source must exist; its content-type carries over
        let content_type = self.source_content_type(&source_key).await?;

        // 2. Create-or-touch the estuary stream
        let expires_at = now_ms() + (self.ttl_seconds as i64).saturating_mul(1000);
        let body = json!({ "expiresAt": expires_at }).to_string();
        let put = self
            .store
            .put(&estuary_key, &content_type, Some(body.as_bytes()))
            .await?;

        if put.is_conflict() {
            // Pre-existing estuary with different metadata; we did not create
            // it, so nothing to roll back
            let estuary_content_type = self
                .store
                .head(&estuary_key)
                .await
                .ok()
                .and_then(|head| head.content_type);
            return Err(FanoutError::ContentTypeMismatch {
                estuary_id: estuary_id.to_string(),
                estuary_content_type,
                source_content_type: content_type,
            });
        }
        if !put.ok() {
            return Err(FanoutError::Internal(format!(
                "estuary create failed with status {}",
                put.status
            )));
        }
        let is_new = put.is_created();

        // 3. Register with the source; roll back a stream we just created
        let now = now_ms();
        if let Err(e) = self
            .sources
            .handle(&source_key)
            .add_subscriber(estuary_id, now)
            .await
        {
            if is_new {
                match self.store.delete(&estuary_key).await {
                    Ok(resp) if resp.ok() => {
                        tracing::debug!(estuary = %estuary_key, "Rolled back estuary create");
                    }
                    Ok(resp) => {
                        tracing::warn!(
                            estuary = %estuary_key,
                            status = resp.status,
                            "Rollback delete refused; estuary stream orphaned until TTL"
                        );
                    }
                    Err(del) => {
                        tracing::warn!(
                            estuary = %estuary_key,
                            error = %del,
                            "Rollback delete failed; estuary stream orphaned until TTL"
                        );
                    }
                }
            }
            return Err(e);
        }

        // 4. Record the subscription and arm the TTL alarm
        let estuary = self.estuaries.handle(&estuary_key);
        estuary.add_subscription(stream_id, now).await?;
        let expires_at = estuary.set_expiry(self.ttl_seconds).await?;

        tracing::debug!(
            source = %source_key,
            estuary = %estuary_key,
            is_new,
            "Subscribed"
        );

        Ok(SubscribeReceipt {
            estuary_id: estuary_id.to_string(),
            stream_id: stream_id.to_string(),
            estuary_stream_path: estuary_key.as_path(),
            expires_at,
            is_new_estuary: is_new,
        })
    }

    /// Unsubscribe an estuary from a source stream; idempotent, no rollback
    pub async fn unsubscribe(
        &self,
        project_id: &str,
        stream_id: &str,
        estuary_id: &str,
    ) -> Result<(), FanoutError> {
        let source_key = StreamKey::new(project_id, stream_id)?;
        let estuary_key = StreamKey::estuary(project_id, estuary_id)?;

        self.sources
            .handle(&source_key)
            .remove_subscriber(estuary_id)
            .await?;
        self.estuaries
            .handle(&estuary_key)
            .remove_subscription(stream_id)
            .await?;

        tracing::debug!(source = %source_key, estuary = %estuary_key, "Unsubscribed");
        Ok(())
    }

    /// Refresh an estuary's metadata and push its expiry out; independent of
    /// any subscribe
    pub async fn touch(&self, project_id: &str, estuary_id: &str) -> Result<i64, FanoutError> {
        let estuary_key = StreamKey::estuary(project_id, estuary_id)?;

        let head = self.store.head(&estuary_key).await?;
        if !head.exists {
            return Err(FanoutError::SourceNotFound(estuary_key.as_path()));
        }
        let content_type = head
            .content_type
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

        let expires_at = now_ms() + (self.ttl_seconds as i64).saturating_mul(1000);
        let body = json!({ "expiresAt": expires_at }).to_string();
        let put = self
            .store
            .put(&estuary_key, &content_type, Some(body.as_bytes()))
            .await?;
        if !put.ok() {
            return Err(FanoutError::Internal(format!(
                "estuary touch failed with status {}",
                put.status
            )));
        }

        self.estuaries
            .handle(&estuary_key)
            .set_expiry(self.ttl_seconds)
            .await
    }

    /// Delete an estuary stream
    ///
    /// Does not walk sources: each source discovers the loss lazily via 404
    /// at its next fanout, and the lifecycle actor's state lives on until the
    /// alarm fires or a new subscribe re-anchors it.
    pub async fn delete_estuary(
        &self,
        project_id: &str,
        estuary_id: &str,
    ) -> Result<(), FanoutError> {
        let estuary_key = StreamKey::estuary(project_id, estuary_id)?;
        let resp = self.store.delete(&estuary_key).await?;
        if !resp.ok() {
            return Err(FanoutError::Internal(format!(
                "estuary delete failed with status {}",
                resp.status
            )));
        }
        tracing::debug!(estuary = %estuary_key, "Estuary stream deleted");
        Ok(())
    }

    /// Validated id triple check shared by transport layers
    pub fn validate_ids(
        project_id: &str,
        stream_id: &str,
        estuary_id: &str,
    ) -> Result<(), FanoutError> {
        validate_project_id(project_id)?;
        validate_stream_id(stream_id)?;
        validate_estuary_id(estuary_id)?;
        Ok(())
    }

    async fn source_content_type(&self, source_key: &StreamKey) -> Result<String, FanoutError> {
        let path = source_key.as_path();
        if let Some(content_type) = self.content_types.get(&path).await {
            return Ok(content_type);
        }

        let head = self.store.head(source_key).await?;
        if !head.exists {
            return Err(FanoutError::SourceNotFound(path));
        }
        let content_type = head
            .content_type
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
        self.content_types.insert(path, content_type.clone()).await;
        Ok(content_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::state::{
        EstuaryIdentity, EstuaryRecord, MemoryStateStore, SourceRecord, StateError, StateStore,
    };
    use crate::data::store::MemoryStreamStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    const ESTUARY: &str = "3f2b8c1a-9d4e-4f6a-8b2c-1d3e5f7a9b0c";

    /// State store that can be told to refuse subscriber inserts
    struct FlakyStateStore {
        inner: MemoryStateStore,
        fail_inserts: AtomicBool,
    }

    impl FlakyStateStore {
        fn new() -> Self {
            Self {
                inner: MemoryStateStore::new(),
                fail_inserts: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl StateStore for FlakyStateStore {
        async fn load_source(&self, key: &StreamKey) -> Result<SourceRecord, StateError> {
            self.inner.load_source(key).await
        }
        async fn insert_subscriber(
            &self,
            key: &StreamKey,
            estuary_id: &str,
            subscribed_at: i64,
        ) -> Result<bool, StateError> {
            if self.fail_inserts.load(Ordering::SeqCst) {
                return Err(StateError::Config("subscriber insert refused".into()));
            }
            self.inner.insert_subscriber(key, estuary_id, subscribed_at).await
        }
        async fn delete_subscribers(
            &self,
            key: &StreamKey,
            estuary_ids: &[String],
        ) -> Result<u64, StateError> {
            self.inner.delete_subscribers(key, estuary_ids).await
        }
        async fn save_next_fanout_seq(&self, key: &StreamKey, next: u64) -> Result<(), StateError> {
            self.inner.save_next_fanout_seq(key, next).await
        }
        async fn load_estuary(&self, key: &StreamKey) -> Result<EstuaryRecord, StateError> {
            self.inner.load_estuary(key).await
        }
        async fn insert_estuary_source(
            &self,
            key: &StreamKey,
            stream_id: &str,
            subscribed_at: i64,
        ) -> Result<bool, StateError> {
            self.inner.insert_estuary_source(key, stream_id, subscribed_at).await
        }
        async fn delete_estuary_source(
            &self,
            key: &StreamKey,
            stream_id: &str,
        ) -> Result<bool, StateError> {
            self.inner.delete_estuary_source(key, stream_id).await
        }
        async fn save_estuary_identity(
            &self,
            key: &StreamKey,
            identity: &EstuaryIdentity,
        ) -> Result<(), StateError> {
            self.inner.save_estuary_identity(key, identity).await
        }
        async fn clear_estuary(&self, key: &StreamKey) -> Result<(), StateError> {
            self.inner.clear_estuary(key).await
        }
        fn backend_name(&self) -> &'static str {
            "flaky"
        }
    }

    struct TestBed {
        store: Arc<MemoryStreamStore>,
        state: Arc<FlakyStateStore>,
        sources: Arc<SourceRouter>,
        service: SubscriptionService,
    }

    impl TestBed {
        fn new() -> Self {
            let store = Arc::new(MemoryStreamStore::new());
            let state = Arc::new(FlakyStateStore::new());
            let config = FanoutConfig::default();
            let sources = Arc::new(SourceRouter::new(
                Arc::clone(&store) as Arc<dyn StreamStore>,
                Arc::clone(&state) as Arc<dyn StateStore>,
                None,
                config.clone(),
            ));
            let estuaries = Arc::new(EstuaryRouter::new(
                Arc::clone(&store) as _,
                Arc::clone(&state) as _,
                Arc::clone(&sources),
            ));
            let service = SubscriptionService::new(
                Arc::clone(&store) as _,
                Arc::clone(&sources),
                estuaries,
                &config,
            );
            store.create_stream(&StreamKey::new("p", "s").unwrap(), "application/json");
            Self {
                store,
                state,
                sources,
                service,
            }
        }
    }

    #[tokio::test]
    async fn test_subscribe_happy_path() {
        let bed = TestBed::new();

        let receipt = bed.service.subscribe("p", "s", ESTUARY).await.unwrap();
        assert!(receipt.is_new_estuary);
        assert_eq!(receipt.estuary_id, ESTUARY);
        assert_eq!(receipt.stream_id, "s");
        assert_eq!(receipt.estuary_stream_path, format!("p/{ESTUARY}"));
        assert!(receipt.expires_at > now_ms());

        // Estuary stream created with the source's content-type
        let estuary_key = StreamKey::estuary("p", ESTUARY).unwrap();
        let head = bed.store.head(&estuary_key).await.unwrap();
        assert!(head.exists);
        assert_eq!(head.content_type.as_deref(), Some("application/json"));

        // Registered with the source
        let source_key = StreamKey::new("p", "s").unwrap();
        let listed = bed.sources.handle(&source_key).list_subscribers().await.unwrap();
        assert_eq!(listed, vec![ESTUARY.to_string()]);
    }

    #[tokio::test]
    async fn test_subscribe_existing_estuary_touches() {
        let bed = TestBed::new();

        let first = bed.service.subscribe("p", "s", ESTUARY).await.unwrap();
        assert!(first.is_new_estuary);

        let second = bed.service.subscribe("p", "s", ESTUARY).await.unwrap();
        assert!(!second.is_new_estuary);

        // Still a single registry entry
        let source_key = StreamKey::new("p", "s").unwrap();
        let listed = bed.sources.handle(&source_key).list_subscribers().await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_missing_source() {
        let bed = TestBed::new();
        let err = bed.service.subscribe("p", "nope", ESTUARY).await.unwrap_err();
        assert!(matches!(err, FanoutError::SourceNotFound(path) if path == "p/nope"));
    }

    #[tokio::test]
    async fn test_subscribe_validates_ids() {
        let bed = TestBed::new();
        assert!(matches!(
            bed.service.subscribe("p", "s", "not-a-uuid").await,
            Err(FanoutError::Validation(_))
        ));
        assert!(matches!(
            bed.service.subscribe("p:bad", "s", ESTUARY).await,
            Err(FanoutError::Validation(_))
        ));
        assert!(SubscriptionService::validate_ids("p", "s", ESTUARY).is_ok());
    }

    #[tokio::test]
    async fn test_subscribe_content_type_mismatch_no_rollback() {
        let bed = TestBed::new();
        let estuary_key = StreamKey::estuary("p", ESTUARY).unwrap();
        bed.store.create_stream(&estuary_key, "text/csv");

        let err = bed.service.subscribe("p", "s", ESTUARY).await.unwrap_err();
        match err {
            FanoutError::ContentTypeMismatch {
                estuary_content_type,
                source_content_type,
                ..
            } => {
                assert_eq!(estuary_content_type.as_deref(), Some("text/csv"));
                assert_eq!(source_content_type, "application/json");
            }
            other => panic!("unexpected error: {other}"),
        }

        // We did not create it, so it must survive
        assert!(bed.store.stream_exists(&estuary_key));
    }

    #[tokio::test]
    async fn test_subscribe_rolls_back_created_estuary_on_registry_failure() {
        let bed = TestBed::new();
        bed.state.fail_inserts.store(true, Ordering::SeqCst);

        let err = bed.service.subscribe("p", "s", ESTUARY).await.unwrap_err();
        assert!(matches!(err, FanoutError::Internal(_)));

        // The estuary stream created in step 2 was deleted again
        let estuary_key = StreamKey::estuary("p", ESTUARY).unwrap();
        assert!(!bed.store.stream_exists(&estuary_key));
    }

    #[tokio::test]
    async fn test_unsubscribe_clears_both_sides() {
        let bed = TestBed::new();
        bed.service.subscribe("p", "s", ESTUARY).await.unwrap();

        bed.service.unsubscribe("p", "s", ESTUARY).await.unwrap();
        // Idempotent
        bed.service.unsubscribe("p", "s", ESTUARY).await.unwrap();

        let source_key = StreamKey::new("p", "s").unwrap();
        assert!(bed.sources.handle(&source_key).list_subscribers().await.unwrap().is_empty());
        let record = bed
            .state
            .load_estuary(&StreamKey::estuary("p", ESTUARY).unwrap())
            .await
            .unwrap();
        assert!(record.sources.is_empty());
    }

    #[tokio::test]
    async fn test_touch_refreshes_and_requires_existing_estuary() {
        let bed = TestBed::new();

        let err = bed.service.touch("p", ESTUARY).await.unwrap_err();
        assert!(matches!(err, FanoutError::SourceNotFound(_)));

        bed.service.subscribe("p", "s", ESTUARY).await.unwrap();
        let expires_at = bed.service.touch("p", ESTUARY).await.unwrap();
        assert!(expires_at > now_ms());

        // Idempotent modulo the advancing deadline
        let again = bed.service.touch("p", ESTUARY).await.unwrap();
        assert!(again >= expires_at);
    }

    #[tokio::test]
    async fn test_delete_estuary_idempotent() {
        let bed = TestBed::new();
        bed.service.subscribe("p", "s", ESTUARY).await.unwrap();

        bed.service.delete_estuary("p", ESTUARY).await.unwrap();
        // 404 on the second delete still counts as success
        bed.service.delete_estuary("p", ESTUARY).await.unwrap();
        assert!(!bed.store.stream_exists(&StreamKey::estuary("p", ESTUARY).unwrap()));
    }

    #[tokio::test]
    async fn test_publish_through_service_validates_ids() {
        let bed = TestBed::new();
        let err = bed
            .service
            .publish(
                "p/bad",
                "s",
                PublishRequest {
                    payload: b"m".to_vec(),
                    content_type: "text/plain".into(),
                    producer: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FanoutError::Validation(_)));

        let receipt = bed
            .service
            .publish(
                "p",
                "s",
                PublishRequest {
                    payload: b"m".to_vec(),
                    content_type: "text/plain".into(),
                    producer: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(receipt.fanout_count, 0);
    }
}
