//! Registry actor and publish engine
//!
//! The actor loads its durable record once at spawn, then serves commands one
//! at a time: registry mutations, snapshots, and the full publish pipeline.
//! The fanout sequence is persisted before any outbound message carries the
//! allocated value, so a crash between dispatch and the next publish can only
//! produce a gap, never a reuse.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use super::handle::{SourceCommand, SourceDeps};
use super::{FanoutMode, PublishReceipt, PublishRequest};
use crate::data::queue::{FanoutJob, FanoutQueue, QueueError};
use crate::data::state::{StateError, SubscriberRow};
use crate::data::store::ProducerHeaders;
use crate::domain::circuit::CircuitBreaker;
use crate::domain::dispatcher::FanoutDispatcher;
use crate::domain::error::FanoutError;
use crate::domain::keys::StreamKey;
use crate::utils::retry::{DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_ATTEMPTS, retry_with_backoff};

pub(super) struct SourceActor {
    key: StreamKey,
    deps: Arc<SourceDeps>,
    dispatcher: FanoutDispatcher,
    /// estuary id -> subscribed_at (ms epoch)
    subscribers: HashMap<String, i64>,
    next_fanout_seq: u64,
    circuit: CircuitBreaker,
}

impl SourceActor {
    /// Actor task body: load state, then serve the mailbox until it closes
    pub(super) async fn run(
        key: StreamKey,
        mut rx: mpsc::Receiver<SourceCommand>,
        deps: Arc<SourceDeps>,
    ) {
        let record = match retry_with_backoff(DEFAULT_MAX_ATTEMPTS, DEFAULT_BASE_DELAY_MS, || {
            deps.state.load_source(&key)
        })
        .await
        {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(source = %key, error = %e, "Failed to load source state");
                // Dropping the replies signals every queued caller; closing the
                // mailbox makes the router respawn (and re-load) on next use.
                rx.close();
                while rx.recv().await.is_some() {}
                return;
            }
        };

        let dispatcher = FanoutDispatcher::new(
            Arc::clone(&deps.store),
            deps.config.batch_size,
            deps.config.rpc_timeout,
        );
        let circuit = CircuitBreaker::new(
            deps.config.breaker_failure_threshold,
            deps.config.breaker_recovery,
        );

        let mut actor = Self {
            subscribers: record
                .subscribers
                .into_iter()
                .map(|row| (row.estuary_id, row.subscribed_at))
                .collect(),
            next_fanout_seq: record.next_fanout_seq,
            circuit,
            dispatcher,
            key,
            deps,
        };

        tracing::debug!(
            source = %actor.key,
            subscribers = actor.subscribers.len(),
            next_fanout_seq = actor.next_fanout_seq,
            "Registry actor started"
        );

        while let Some(command) = rx.recv().await {
            actor.handle(command).await;
        }
        tracing::debug!(source = %actor.key, "Registry actor stopped");
    }

    async fn handle(&mut self, command: SourceCommand) {
        match command {
            SourceCommand::Publish { request, reply } => {
                let _ = reply.send(self.publish(request).await);
            }
            SourceCommand::AddSubscriber {
                estuary_id,
                subscribed_at,
                reply,
            } => {
                let _ = reply.send(self.add_subscriber(estuary_id, subscribed_at).await);
            }
            SourceCommand::RemoveSubscriber { estuary_id, reply } => {
                let result = self
                    .remove_many(std::slice::from_ref(&estuary_id))
                    .await
                    .map(|removed| removed > 0)
                    .map_err(FanoutError::from);
                let _ = reply.send(result);
            }
            SourceCommand::RemoveSubscribers { estuary_ids, reply } => {
                let result = self
                    .remove_many(&estuary_ids)
                    .await
                    .map_err(FanoutError::from);
                let _ = reply.send(result);
            }
            SourceCommand::ListSubscribers { reply } => {
                let _ = reply.send(self.subscribers.keys().cloned().collect());
            }
            SourceCommand::ListSubscribersWithTimestamps { reply } => {
                let mut rows: Vec<SubscriberRow> = self
                    .subscribers
                    .iter()
                    .map(|(id, &at)| SubscriberRow {
                        estuary_id: id.clone(),
                        subscribed_at: at,
                    })
                    .collect();
                rows.sort_by(|a, b| {
                    a.subscribed_at
                        .cmp(&b.subscribed_at)
                        .then_with(|| a.estuary_id.cmp(&b.estuary_id))
                });
                let _ = reply.send(rows);
            }
        }
    }

    async fn add_subscriber(
        &mut self,
        estuary_id: String,
        subscribed_at: i64,
    ) -> Result<bool, FanoutError> {
        let inserted = self
            .deps
            .state
            .insert_subscriber(&self.key, &estuary_id, subscribed_at)
            .await?;
        if inserted {
            self.subscribers.insert(estuary_id, subscribed_at);
        }
        Ok(inserted)
    }

    async fn remove_many(&mut self, estuary_ids: &[String]) -> Result<u64, StateError> {
        let removed = self
            .deps
            .state
            .delete_subscribers(&self.key, estuary_ids)
            .await?;
        for id in estuary_ids {
            self.subscribers.remove(id);
        }
        Ok(removed)
    }

    /// Hand out the current sequence, persisting its successor first
    async fn allocate_fanout_seq(&mut self) -> Result<u64, FanoutError> {
        let seq = self.next_fanout_seq;
        self.deps
            .state
            .save_next_fanout_seq(&self.key, seq + 1)
            .await?;
        self.next_fanout_seq = seq + 1;
        Ok(seq)
    }

    // =========================================================================
    // Publish engine
    // =========================================================================

    async fn publish(&mut self, request: PublishRequest) -> Result<PublishReceipt, FanoutError> {
        // Append to the source first; any refusal aborts the publish before a
        // sequence is allocated or the breaker is touched.
        let append = self
            .deps
            .store
            .post(
                &self.key,
                &request.payload,
                &request.content_type,
                request.producer.as_ref(),
            )
            .await?;
        if !append.ok() {
            tracing::warn!(source = %self.key, status = append.status, "Source append refused");
            return Err(FanoutError::UpstreamWriteFailed {
                status: append.status,
            });
        }
        let next_offset = append.next_offset;

        let ids: Vec<String> = self.subscribers.keys().cloned().collect();
        if ids.is_empty() {
            tracing::debug!(source = %self.key, "No subscribers, fanout skipped");
            return Ok(PublishReceipt {
                next_offset,
                fanout_count: 0,
                fanout_successes: 0,
                fanout_failures: 0,
                fanout_mode: FanoutMode::Skipped,
            });
        }

        let seq = self.allocate_fanout_seq().await?;
        let producer = ProducerHeaders::fanout(self.key.stream_id(), seq);

        // The only three cross-dispatch paths: overflow to the queue, enqueue
        // failure back to inline, and breaker-gated inline-or-queue.
        let mut queue_failed = false;

        if let Some(queue) = &self.deps.queue {
            if ids.len() > self.deps.config.queue_threshold {
                match self.enqueue_chunks(queue, &ids, &request, &producer).await {
                    Ok(()) => {
                        tracing::debug!(
                            source = %self.key,
                            subscribers = ids.len(),
                            seq,
                            "Fanout queued"
                        );
                        return Ok(PublishReceipt {
                            next_offset,
                            fanout_count: ids.len(),
                            fanout_successes: ids.len(),
                            fanout_failures: 0,
                            fanout_mode: FanoutMode::Queued,
                        });
                    }
                    Err(e) => {
                        tracing::warn!(
                            source = %self.key,
                            error = %e,
                            "Enqueue failed, falling back to inline fanout"
                        );
                        queue_failed = true;
                    }
                }
            }
        }

        if !self.circuit.should_attempt() {
            if !queue_failed && let Some(queue) = &self.deps.queue {
                match self.enqueue_chunks(queue, &ids, &request, &producer).await {
                    Ok(()) => {
                        tracing::debug!(source = %self.key, seq, "Circuit open, fanout queued");
                        return Ok(PublishReceipt {
                            next_offset,
                            fanout_count: ids.len(),
                            fanout_successes: ids.len(),
                            fanout_failures: 0,
                            fanout_mode: FanoutMode::CircuitOpen,
                        });
                    }
                    Err(e) => {
                        tracing::warn!(source = %self.key, error = %e, "Enqueue failed while circuit open");
                    }
                }
            }
            tracing::warn!(source = %self.key, "Circuit open, fanout not dispatched");
            return Ok(PublishReceipt {
                next_offset,
                fanout_count: ids.len(),
                fanout_successes: 0,
                fanout_failures: ids.len(),
                fanout_mode: FanoutMode::CircuitOpen,
            });
        }

        let outcome = self
            .dispatcher
            .dispatch(
                self.key.project_id(),
                &ids,
                &request.payload,
                &request.content_type,
                &producer,
            )
            .await;
        self.circuit.record(outcome.successes, outcome.failures);

        if !outcome.stale_estuary_ids.is_empty() {
            tracing::debug!(
                source = %self.key,
                stale = outcome.stale_estuary_ids.len(),
                "Pruning stale subscribers"
            );
            if let Err(e) = self.remove_many(&outcome.stale_estuary_ids).await {
                // Durable rows survive; the next publish prunes them again
                tracing::warn!(source = %self.key, error = %e, "Stale subscriber prune failed");
            }
        }

        Ok(PublishReceipt {
            next_offset,
            fanout_count: ids.len(),
            fanout_successes: outcome.successes,
            fanout_failures: outcome.failures,
            fanout_mode: FanoutMode::Inline,
        })
    }

    async fn enqueue_chunks(
        &self,
        queue: &Arc<dyn FanoutQueue>,
        ids: &[String],
        request: &PublishRequest,
        producer: &ProducerHeaders,
    ) -> Result<(), QueueError> {
        for chunk in ids.chunks(self.deps.config.queue_batch_size.max(1)) {
            let job = FanoutJob {
                project_id: self.key.project_id().to_string(),
                stream_id: self.key.stream_id().to_string(),
                estuary_ids: chunk.to_vec(),
                payload: request.payload.clone(),
                content_type: request.content_type.clone(),
                producer_headers: producer.clone(),
            };
            queue.enqueue(&job).await?;
        }
        Ok(())
    }
}
