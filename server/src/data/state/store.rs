//! Durable state store trait
//!
//! Persistence seam under the per-key actors. A registry actor owns the
//! source records for its key; an estuary actor owns the estuary records for
//! its key; per-key actor serialization means no two writers ever race on
//! the same rows, so the store needs no cross-key transactions.

use async_trait::async_trait;

use super::error::StateError;
use crate::domain::keys::StreamKey;

/// One subscriber of a source stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberRow {
    pub estuary_id: String,
    /// ms epoch
    pub subscribed_at: i64,
}

/// Durable state of a source stream
#[derive(Debug, Clone, Default)]
pub struct SourceRecord {
    pub subscribers: Vec<SubscriberRow>,
    /// Next fanout sequence to hand out; persisted before exposure
    pub next_fanout_seq: u64,
}

/// One source subscription held by an estuary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EstuarySourceRow {
    pub stream_id: String,
    /// ms epoch
    pub subscribed_at: i64,
}

/// Identity singleton of an estuary, stored for the alarm handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EstuaryIdentity {
    pub project_id: String,
    pub estuary_id: String,
    /// Absolute expiry deadline in ms epoch; `None` when no alarm is armed
    pub expires_at: Option<i64>,
}

/// Durable state of an estuary
#[derive(Debug, Clone, Default)]
pub struct EstuaryRecord {
    /// Ordered by subscribed-at descending
    pub sources: Vec<EstuarySourceRow>,
    pub identity: Option<EstuaryIdentity>,
}

/// Durable state operations
#[async_trait]
pub trait StateStore: Send + Sync {
    // =========================================================================
    // Source streams
    // =========================================================================

    /// Load a source record; unknown keys yield the empty record
    async fn load_source(&self, key: &StreamKey) -> Result<SourceRecord, StateError>;

    /// Insert a subscriber; returns false if it was already present
    async fn insert_subscriber(
        &self,
        key: &StreamKey,
        estuary_id: &str,
        subscribed_at: i64,
    ) -> Result<bool, StateError>;

    /// Delete subscribers; returns the number actually removed
    async fn delete_subscribers(
        &self,
        key: &StreamKey,
        estuary_ids: &[String],
    ) -> Result<u64, StateError>;

    /// Persist the next fanout sequence for a source
    ///
    /// Must be durable when this returns; the previous value may already be
    /// attached to outbound messages.
    async fn save_next_fanout_seq(&self, key: &StreamKey, next: u64) -> Result<(), StateError>;

    // =========================================================================
    // Estuaries
    // =========================================================================

    /// Load an estuary record; unknown keys yield the empty record
    async fn load_estuary(&self, key: &StreamKey) -> Result<EstuaryRecord, StateError>;

    /// Insert a source subscription; returns false if already present
    async fn insert_estuary_source(
        &self,
        key: &StreamKey,
        stream_id: &str,
        subscribed_at: i64,
    ) -> Result<bool, StateError>;

    /// Delete a source subscription; returns false if it was not present
    async fn delete_estuary_source(
        &self,
        key: &StreamKey,
        stream_id: &str,
    ) -> Result<bool, StateError>;

    /// Upsert the identity singleton (including the expiry deadline)
    async fn save_estuary_identity(
        &self,
        key: &StreamKey,
        identity: &EstuaryIdentity,
    ) -> Result<(), StateError>;

    /// Remove all estuary state for the key (sources and identity)
    async fn clear_estuary(&self, key: &StreamKey) -> Result<(), StateError>;

    /// Backend name for debugging/logging
    fn backend_name(&self) -> &'static str;
}
