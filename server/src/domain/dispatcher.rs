//! Fanout dispatcher
//!
//! Writes one payload to a set of estuary streams with bounded concurrency:
//! ids are chunked, every call within a chunk runs concurrently under its own
//! deadline, and all outcomes are collected. One slow or failing sink never
//! cancels its peers; chunks run sequentially.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use crate::data::store::{ProducerHeaders, StreamStore};
use crate::domain::keys::StreamKey;

/// Aggregate result of one fanout dispatch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Writes the store acknowledged
    pub successes: usize,
    /// Everything else: 5xx, timeout, transport error, and stale 404s
    pub failures: usize,
    /// Estuary ids whose stream no longer exists (404); a subset of failures
    pub stale_estuary_ids: Vec<String>,
}

enum CallResult {
    Success,
    Stale(String),
    Failure,
}

/// Chunked, deadline-bounded fanout over the stream store
#[derive(Clone)]
pub struct FanoutDispatcher {
    store: Arc<dyn StreamStore>,
    batch_size: usize,
    per_call_timeout: Duration,
}

impl FanoutDispatcher {
    pub fn new(store: Arc<dyn StreamStore>, batch_size: usize, per_call_timeout: Duration) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
            per_call_timeout,
        }
    }

    /// Write `payload` to every estuary stream, classifying each outcome
    ///
    /// The payload is shared read-only across calls; backends clone before
    /// handing bytes to their transport.
    pub async fn dispatch(
        &self,
        project_id: &str,
        estuary_ids: &[String],
        payload: &[u8],
        content_type: &str,
        producer: &ProducerHeaders,
    ) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();

        for chunk in estuary_ids.chunks(self.batch_size) {
            let calls = chunk
                .iter()
                .map(|estuary_id| self.post_one(project_id, estuary_id, payload, content_type, producer));

            for result in join_all(calls).await {
                match result {
                    CallResult::Success => outcome.successes += 1,
                    CallResult::Stale(id) => {
                        outcome.failures += 1;
                        outcome.stale_estuary_ids.push(id);
                    }
                    CallResult::Failure => outcome.failures += 1,
                }
            }
        }

        outcome
    }

    async fn post_one(
        &self,
        project_id: &str,
        estuary_id: &str,
        payload: &[u8],
        content_type: &str,
        producer: &ProducerHeaders,
    ) -> CallResult {
        let key = match StreamKey::estuary(project_id, estuary_id) {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed estuary id in fanout");
                return CallResult::Failure;
            }
        };

        let post = self
            .store
            .post(&key, payload, content_type, Some(producer));

        match tokio::time::timeout(self.per_call_timeout, post).await {
            Ok(Ok(resp)) if resp.ok() => CallResult::Success,
            Ok(Ok(resp)) if resp.stale() => {
                tracing::debug!(estuary = %key, "Estuary stream gone, marking stale");
                CallResult::Stale(estuary_id.to_string())
            }
            Ok(Ok(resp)) => {
                tracing::warn!(estuary = %key, status = resp.status, "Fanout write refused");
                CallResult::Failure
            }
            Ok(Err(e)) => {
                tracing::warn!(estuary = %key, error = %e, "Fanout write failed");
                CallResult::Failure
            }
            Err(_) => {
                tracing::warn!(
                    estuary = %key,
                    timeout_ms = self.per_call_timeout.as_millis(),
                    "Fanout write timed out"
                );
                CallResult::Failure
            }
        }
    }
}
