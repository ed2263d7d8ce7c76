//! Fanout queue backend trait
//!
//! At-least-once work queue for overflow fanout. The publish engine enqueues
//! encoded jobs; the consumer subscribes, decodes, dispatches, then acks or
//! retries per message. Duplicate delivery is acceptable because sinks dedup
//! on producer sequences.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use super::error::QueueError;
use super::message::FanoutJob;

/// A delivered queue message with its id for ack/retry
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    /// Backend message id
    pub id: String,
    /// Delivery attempts so far, including this one
    pub attempts: u32,
    /// Encoded job (see [`FanoutJob`] for the wire format)
    pub body: Vec<u8>,
}

/// Subscription yielding queued messages as they become available
pub struct QueueSubscription {
    pub receiver: Pin<Box<dyn Stream<Item = Result<QueuedMessage, QueueError>> + Send>>,
}

/// Queue statistics for logging
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Messages waiting for delivery
    pub ready: u64,
    /// Messages delivered but not yet acknowledged
    pub pending: u64,
    /// Messages dropped after exhausting delivery attempts
    pub dropped: u64,
}

/// Fanout queue operations
#[async_trait]
pub trait FanoutQueue: Send + Sync {
    /// Enqueue one job; returns the backend message id
    async fn enqueue(&self, job: &FanoutJob) -> Result<String, QueueError>;

    /// Subscribe as the named consumer
    ///
    /// Messages idle past the redelivery window are handed out again, so a
    /// crashed consumer cannot strand work.
    async fn subscribe(&self, consumer: &str) -> Result<QueueSubscription, QueueError>;

    /// Acknowledge successful processing; the message is gone for good
    async fn ack(&self, id: &str) -> Result<(), QueueError>;

    /// Return a message to the queue for another attempt
    ///
    /// Messages that exhaust their attempt budget are dropped with a
    /// dead-letter log record instead of being requeued.
    async fn retry(&self, id: &str) -> Result<(), QueueError>;

    /// Current queue statistics
    async fn stats(&self) -> Result<QueueStats, QueueError>;

    /// Backend name for debugging/logging
    fn backend_name(&self) -> &'static str;
}
