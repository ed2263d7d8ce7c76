//! Async fanout queue
//!
//! Durable-ish work queue for overflow fanout: batches of estuary ids plus
//! the payload, at-least-once delivery with retry/ack. The in-memory backend
//! serves single-process deployments; the trait is the seam for an external
//! broker.

pub mod backend;
pub mod error;
pub mod memory;
pub mod message;

pub use backend::{FanoutQueue, QueueStats, QueueSubscription, QueuedMessage};
pub use error::QueueError;
pub use memory::MemoryFanoutQueue;
pub use message::FanoutJob;
