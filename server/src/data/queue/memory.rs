//! In-memory fanout queue
//!
//! Process-local work queue with delivery tracking: a ready deque, a pending
//! map keyed by message id, and a notifier for immediate consumer wakeup.
//! Unacknowledged messages idle past the redelivery window return to the
//! ready deque; messages that exhaust their attempt budget are dropped with
//! a dead-letter log record.
//!
//! Suitable for single-process deployments; a crash loses queued work (the
//! next publish on each source re-converges subscribers).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_stream::stream;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::backend::{FanoutQueue, QueueStats, QueueSubscription, QueuedMessage};
use super::error::QueueError;
use super::message::FanoutJob;

/// One stored message
#[derive(Debug, Clone)]
struct QueueEntry {
    id: u64,
    body: Vec<u8>,
    /// Deliveries so far
    attempts: u32,
}

/// A delivered, not-yet-acknowledged message
#[derive(Debug, Clone)]
struct PendingEntry {
    entry: QueueEntry,
    delivered_at: Instant,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<QueueEntry>,
    pending: HashMap<u64, PendingEntry>,
    next_id: u64,
    dropped: u64,
}

/// In-memory fanout queue
pub struct MemoryFanoutQueue {
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
    max_attempts: u32,
    redeliver_idle: Duration,
}

impl MemoryFanoutQueue {
    pub fn new(max_attempts: u32, redeliver_idle: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            notify: Arc::new(Notify::new()),
            max_attempts,
            redeliver_idle,
        }
    }

    fn parse_id(id: &str) -> Result<u64, QueueError> {
        id.parse()
            .map_err(|_| QueueError::UnknownMessage(id.to_string()))
    }

    /// Move idle pending messages back to ready; drop exhausted ones
    fn reclaim_idle(state: &mut QueueState, max_attempts: u32, idle: Duration) {
        let now = Instant::now();
        let idle_ids: Vec<u64> = state
            .pending
            .iter()
            .filter(|(_, p)| now.duration_since(p.delivered_at) >= idle)
            .map(|(&id, _)| id)
            .collect();

        for id in idle_ids {
            let Some(pending) = state.pending.remove(&id) else {
                continue;
            };
            if pending.entry.attempts >= max_attempts {
                state.dropped += 1;
                tracing::warn!(
                    message_id = id,
                    attempts = pending.entry.attempts,
                    "Dropping idle fanout message after exhausting attempts"
                );
            } else {
                tracing::debug!(message_id = id, "Redelivering idle fanout message");
                state.ready.push_back(pending.entry);
            }
        }
    }
}

#[async_trait]
impl FanoutQueue for MemoryFanoutQueue {
    async fn enqueue(&self, job: &FanoutJob) -> Result<String, QueueError> {
        let body = job.to_bytes()?;
        let id = {
            let mut state = self.state.lock();
            let id = state.next_id;
            state.next_id += 1;
            state.ready.push_back(QueueEntry {
                id,
                body,
                attempts: 0,
            });
            id
        };
        self.notify.notify_one();
        Ok(id.to_string())
    }

    async fn subscribe(&self, consumer: &str) -> Result<QueueSubscription, QueueError> {
        let state = Arc::clone(&self.state);
        let notify = Arc::clone(&self.notify);
        let max_attempts = self.max_attempts;
        let redeliver_idle = self.redeliver_idle;
        let consumer = consumer.to_string();

        let receiver = stream! {
            loop {
                let next = {
                    let mut guard = state.lock();
                    Self::reclaim_idle(&mut guard, max_attempts, redeliver_idle);
                    let popped = guard.ready.pop_front();
                    popped.map(|mut entry| {
                        entry.attempts += 1;
                        guard.pending.insert(entry.id, PendingEntry {
                            entry: entry.clone(),
                            delivered_at: Instant::now(),
                        });
                        entry
                    })
                };

                match next {
                    Some(entry) => {
                        tracing::trace!(
                            message_id = entry.id,
                            attempts = entry.attempts,
                            consumer = %consumer,
                            "Delivering fanout message"
                        );
                        yield Ok(QueuedMessage {
                            id: entry.id.to_string(),
                            attempts: entry.attempts,
                            body: entry.body,
                        });
                    }
                    None => {
                        // Wake on enqueue, or poll the redelivery window
                        tokio::select! {
                            _ = notify.notified() => {}
                            _ = tokio::time::sleep(redeliver_idle) => {}
                        }
                    }
                }
            }
        };

        Ok(QueueSubscription {
            receiver: Box::pin(receiver),
        })
    }

    async fn ack(&self, id: &str) -> Result<(), QueueError> {
        let id = Self::parse_id(id)?;
        let removed = self.state.lock().pending.remove(&id);
        if removed.is_none() {
            return Err(QueueError::UnknownMessage(id.to_string()));
        }
        Ok(())
    }

    async fn retry(&self, id: &str) -> Result<(), QueueError> {
        let id = Self::parse_id(id)?;
        let mut state = self.state.lock();
        let Some(pending) = state.pending.remove(&id) else {
            return Err(QueueError::UnknownMessage(id.to_string()));
        };

        if pending.entry.attempts >= self.max_attempts {
            state.dropped += 1;
            tracing::warn!(
                message_id = id,
                attempts = pending.entry.attempts,
                "Dropping fanout message after exhausting attempts"
            );
        } else {
            state.ready.push_back(pending.entry);
            drop(state);
            self.notify.notify_one();
        }
        Ok(())
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let state = self.state.lock();
        Ok(QueueStats {
            ready: state.ready.len() as u64,
            pending: state.pending.len() as u64,
            dropped: state.dropped,
        })
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::store::ProducerHeaders;
    use futures::StreamExt;

    fn job(ids: &[&str]) -> FanoutJob {
        FanoutJob {
            project_id: "p".into(),
            stream_id: "s".into(),
            estuary_ids: ids.iter().map(|s| s.to_string()).collect(),
            payload: b"hello".to_vec(),
            content_type: "text/plain".into(),
            producer_headers: ProducerHeaders::fanout("s", 0),
        }
    }

    fn queue() -> MemoryFanoutQueue {
        MemoryFanoutQueue::new(3, Duration::from_secs(30))
    }

    #[tokio::test]
    async fn test_enqueue_deliver_ack() {
        let q = queue();
        q.enqueue(&job(&["e1"])).await.unwrap();

        let sub = q.subscribe("consumer-1").await.unwrap();
        let mut receiver = sub.receiver;
        let msg = tokio::time::timeout(Duration::from_millis(200), receiver.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert_eq!(msg.attempts, 1);
        let decoded = FanoutJob::from_bytes(&msg.body).unwrap();
        assert_eq!(decoded.estuary_ids, vec!["e1"]);

        q.ack(&msg.id).await.unwrap();
        let stats = q.stats().await.unwrap();
        assert_eq!(stats.ready, 0);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test]
    async fn test_retry_redelivers_with_attempt_count() {
        let q = queue();
        q.enqueue(&job(&["e1"])).await.unwrap();

        let mut receiver = q.subscribe("c").await.unwrap().receiver;
        let first = receiver.next().await.unwrap().unwrap();
        q.retry(&first.id).await.unwrap();

        let second = tokio::time::timeout(Duration::from_millis(200), receiver.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.attempts, 2);
    }

    #[tokio::test]
    async fn test_retry_drops_after_max_attempts() {
        let q = MemoryFanoutQueue::new(2, Duration::from_secs(30));
        q.enqueue(&job(&["e1"])).await.unwrap();

        let mut receiver = q.subscribe("c").await.unwrap().receiver;
        for _ in 0..2 {
            let msg = tokio::time::timeout(Duration::from_millis(200), receiver.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            q.retry(&msg.id).await.unwrap();
        }

        let stats = q.stats().await.unwrap();
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.ready, 0);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test]
    async fn test_ack_unknown_id() {
        let q = queue();
        assert!(matches!(
            q.ack("42").await,
            Err(QueueError::UnknownMessage(_))
        ));
        assert!(matches!(
            q.ack("not-a-number").await,
            Err(QueueError::UnknownMessage(_))
        ));
    }

    #[tokio::test]
    async fn test_idle_pending_is_redelivered() {
        let q = MemoryFanoutQueue::new(3, Duration::from_millis(10));
        q.enqueue(&job(&["e1"])).await.unwrap();

        let mut receiver = q.subscribe("c").await.unwrap().receiver;
        let first = receiver.next().await.unwrap().unwrap();
        // Never acked; after the idle window it comes around again
        tokio::time::sleep(Duration::from_millis(20)).await;

        let again = tokio::time::timeout(Duration::from_millis(200), receiver.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(again.id, first.id);
        assert_eq!(again.attempts, 2);
    }

    #[tokio::test]
    async fn test_fifo_delivery() {
        let q = queue();
        q.enqueue(&job(&["a"])).await.unwrap();
        q.enqueue(&job(&["b"])).await.unwrap();

        let mut receiver = q.subscribe("c").await.unwrap().receiver;
        let first = receiver.next().await.unwrap().unwrap();
        let second = receiver.next().await.unwrap().unwrap();
        assert_eq!(FanoutJob::from_bytes(&first.body).unwrap().estuary_ids, ["a"]);
        assert_eq!(FanoutJob::from_bytes(&second.body).unwrap().estuary_ids, ["b"]);
    }
}
