//! Subscriber registry and publish engine
//!
//! One single-writer actor per source stream owns the durable subscriber set,
//! the fanout sequence counter, and the volatile circuit breaker. The publish
//! engine runs inside the actor, so every publish on a source is serialized
//! with the registry mutations it depends on; distinct sources run in
//! parallel.

mod actor;
mod handle;

pub use handle::{SourceHandle, SourceRouter};

use crate::data::store::ProducerHeaders;

/// A publish to a source stream
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub payload: Vec<u8>,
    pub content_type: String,
    /// Caller-supplied producer identity for the source append (not the
    /// fanout writes; those carry the engine's own headers)
    pub producer: Option<ProducerHeaders>,
}

/// How the fanout was dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanoutMode {
    /// Dispatched synchronously within the publish
    Inline,
    /// Chunked onto the async queue
    Queued,
    /// No subscribers; nothing dispatched
    Skipped,
    /// Breaker open: queued if possible, otherwise not dispatched
    CircuitOpen,
}

impl FanoutMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FanoutMode::Inline => "inline",
            FanoutMode::Queued => "queued",
            FanoutMode::Skipped => "skipped",
            FanoutMode::CircuitOpen => "circuit-open",
        }
    }
}

impl std::fmt::Display for FanoutMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a publish
///
/// Returned once the source append has committed; fanout-side failures are
/// reported here, never as errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    /// Offset after the source append
    pub next_offset: Option<u64>,
    /// Subscribers snapshotted for this publish
    pub fanout_count: usize,
    pub fanout_successes: usize,
    pub fanout_failures: usize,
    pub fanout_mode: FanoutMode,
}
