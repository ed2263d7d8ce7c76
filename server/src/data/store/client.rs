//! Stream store client trait
//!
//! Narrow facade over the append-log storage engine ("stream core"). The
//! engine consumes exactly four operations on a stream key; everything else
//! the storage service does is invisible here.
//!
//! Status codes carry domain meaning: 201 created, 200 touched, 204 appended,
//! 404 stale/absent, 409 exists-with-conflict.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::StoreError;
use crate::core::constants::{FANOUT_PRODUCER_EPOCH, FANOUT_PRODUCER_ID_PREFIX};
use crate::domain::keys::StreamKey;

/// Producer identity attached to appends for sink-side dedup
///
/// Sinks that implement dedup use `(producer_id, producer_epoch, producer_seq)`
/// as the dedup key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerHeaders {
    pub producer_id: String,
    pub producer_epoch: String,
    pub producer_seq: String,
}

impl ProducerHeaders {
    /// Headers for a fanout write from a source stream with an allocated seq
    pub fn fanout(source_stream_id: &str, seq: u64) -> Self {
        Self {
            producer_id: format!("{FANOUT_PRODUCER_ID_PREFIX}{source_stream_id}"),
            producer_epoch: FANOUT_PRODUCER_EPOCH.to_string(),
            producer_seq: seq.to_string(),
        }
    }
}

/// Result of `head`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadResponse {
    pub exists: bool,
    pub content_type: Option<String>,
}

/// Result of `put` (create-or-touch)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutResponse {
    pub status: u16,
}

impl PutResponse {
    /// 201: the stream was created by this call
    pub fn is_created(&self) -> bool {
        self.status == 201
    }

    /// 409: the stream exists with different metadata
    pub fn is_conflict(&self) -> bool {
        self.status == 409
    }

    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Result of `post` (append)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostResponse {
    pub status: u16,
    pub next_offset: Option<u64>,
}

impl PostResponse {
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 404: the target stream no longer exists (stale subscriber signal)
    pub fn stale(&self) -> bool {
        self.status == 404
    }
}

/// Result of `delete`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteResponse {
    pub status: u16,
}

impl DeleteResponse {
    /// Deletes are idempotent; 404 counts as success
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status) || self.status == 404
    }
}

/// Stream store operations consumed by the fanout engine
///
/// Every call can fail with a transient transport error; callers on the
/// fanout path wrap `post` with their own per-call deadline.
#[async_trait]
pub trait StreamStore: Send + Sync {
    /// Existence and content-type lookup
    async fn head(&self, key: &StreamKey) -> Result<HeadResponse, StoreError>;

    /// Create-or-touch a stream with a content-type and optional metadata body
    async fn put(
        &self,
        key: &StreamKey,
        content_type: &str,
        body: Option<&[u8]>,
    ) -> Result<PutResponse, StoreError>;

    /// Append bytes to a stream
    async fn post(
        &self,
        key: &StreamKey,
        bytes: &[u8],
        content_type: &str,
        producer: Option<&ProducerHeaders>,
    ) -> Result<PostResponse, StoreError>;

    /// Delete a stream; absent streams report 404, which callers treat as done
    async fn delete(&self, key: &StreamKey) -> Result<DeleteResponse, StoreError>;

    /// Backend name for debugging/logging
    fn backend_name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fanout_producer_headers() {
        let headers = ProducerHeaders::fanout("orders", 17);
        assert_eq!(headers.producer_id, "fanout:orders");
        assert_eq!(headers.producer_epoch, "1");
        assert_eq!(headers.producer_seq, "17");
    }

    #[test]
    fn test_producer_headers_wire_shape() {
        let headers = ProducerHeaders::fanout("s", 0);
        let json = serde_json::to_value(&headers).unwrap();
        assert_eq!(json["producerId"], "fanout:s");
        assert_eq!(json["producerEpoch"], "1");
        assert_eq!(json["producerSeq"], "0");
    }

    #[test]
    fn test_status_classification() {
        assert!(PutResponse { status: 201 }.is_created());
        assert!(PutResponse { status: 200 }.ok());
        assert!(PutResponse { status: 409 }.is_conflict());
        assert!(!PutResponse { status: 409 }.ok());

        let appended = PostResponse {
            status: 204,
            next_offset: Some(3),
        };
        assert!(appended.ok() && !appended.stale());
        let gone = PostResponse {
            status: 404,
            next_offset: None,
        };
        assert!(gone.stale() && !gone.ok());

        assert!(DeleteResponse { status: 404 }.ok());
        assert!(DeleteResponse { status: 204 }.ok());
        assert!(!DeleteResponse { status: 500 }.ok());
    }
}
