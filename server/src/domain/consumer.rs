//! Async fanout queue consumer
//!
//! Drains queued fanout work: decode, dispatch, feed stale subscribers back
//! into the owning registry, then ack or retry. Pure-404 batches are
//! terminal (the stale ids were pruned; nothing is left to deliver); any
//! other failure retries the whole message. Duplicate delivery is fine
//! because sinks dedup on producer sequences.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::config::FanoutConfig;
use crate::data::queue::{FanoutJob, FanoutQueue, QueuedMessage};
use crate::data::store::StreamStore;
use crate::domain::dispatcher::FanoutDispatcher;
use crate::domain::keys::StreamKey;
use crate::domain::registry::SourceRouter;

/// Queue consumer for overflow fanout work
pub struct QueueConsumer {
    queue: Arc<dyn FanoutQueue>,
    sources: Arc<SourceRouter>,
    dispatcher: FanoutDispatcher,
}

impl QueueConsumer {
    pub fn new(
        queue: Arc<dyn FanoutQueue>,
        store: Arc<dyn StreamStore>,
        sources: Arc<SourceRouter>,
        config: &FanoutConfig,
    ) -> Self {
        Self {
            queue,
            sources,
            dispatcher: FanoutDispatcher::new(store, config.batch_size, config.rpc_timeout),
        }
    }

    /// Run the consumer until the shutdown signal flips
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let consumer_name = format!("{}:{}", uuid::Uuid::new_v4(), std::process::id());
        let mut subscription = match self.queue.subscribe(&consumer_name).await {
            Ok(subscription) => subscription,
            Err(e) => {
                tracing::error!(error = %e, "Failed to subscribe to the fanout queue");
                return;
            }
        };

        tracing::info!(consumer = %consumer_name, "Fanout queue consumer started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                next = subscription.receiver.next() => {
                    match next {
                        Some(Ok(message)) => self.process(message).await,
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "Fanout queue receive error");
                        }
                        None => {
                            tracing::warn!("Fanout queue subscription ended");
                            break;
                        }
                    }
                }
            }
        }

        tracing::debug!("Fanout queue consumer stopped");
    }

    /// Process one message independently of its batch peers
    async fn process(&self, message: QueuedMessage) {
        let job = match FanoutJob::from_bytes(&message.body) {
            Ok(job) => job,
            Err(e) => {
                tracing::warn!(
                    message_id = %message.id,
                    error = %e,
                    "Undecodable fanout message, retrying"
                );
                self.finish(&message, false).await;
                return;
            }
        };

        let outcome = self
            .dispatcher
            .dispatch(
                &job.project_id,
                &job.estuary_ids,
                &job.payload,
                &job.content_type,
                &job.producer_headers,
            )
            .await;

        // Stale ids feed back into the owning registry
        if !outcome.stale_estuary_ids.is_empty() {
            match StreamKey::new(&job.project_id, &job.stream_id) {
                Ok(source_key) => {
                    if let Err(e) = self
                        .sources
                        .handle(&source_key)
                        .remove_subscribers(outcome.stale_estuary_ids.clone())
                        .await
                    {
                        tracing::warn!(
                            source = %source_key,
                            error = %e,
                            "Stale subscriber prune failed; next publish converges"
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(message_id = %message.id, error = %e, "Malformed source key in message");
                }
            }
        }

        tracing::debug!(
            message_id = %message.id,
            source = %job.stream_id,
            targets = job.estuary_ids.len(),
            successes = outcome.successes,
            failures = outcome.failures,
            stale = outcome.stale_estuary_ids.len(),
            "Queued fanout dispatched"
        );

        // 404s were handled by pruning; only harder failures warrant a retry
        let done = outcome.failures <= outcome.stale_estuary_ids.len();
        self.finish(&message, done).await;
    }

    async fn finish(&self, message: &QueuedMessage, done: bool) {
        let result = if done {
            self.queue.ack(&message.id).await
        } else {
            self.queue.retry(&message.id).await
        };
        if let Err(e) = result {
            tracing::warn!(message_id = %message.id, error = %e, "Queue ack/retry failed");
        }
    }
}
