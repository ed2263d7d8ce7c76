//! HTTP stream store client
//!
//! Talks to the external stream-core service. Domain-meaningful statuses
//! (404, 409, 5xx) are returned in the response types; only transport
//! failures surface as errors. Fanout callers apply their own per-call
//! deadline on top of the client's overall request timeout.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;

use super::client::{
    DeleteResponse, HeadResponse, PostResponse, ProducerHeaders, PutResponse, StreamStore,
};
use super::error::StoreError;
use crate::core::constants::{
    HEADER_NEXT_OFFSET, HEADER_PRODUCER_EPOCH, HEADER_PRODUCER_ID, HEADER_PRODUCER_SEQ,
};
use crate::domain::keys::StreamKey;

/// Overall request timeout; fanout writes get a tighter per-call deadline
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// HTTP client for the stream-core service
pub struct HttpStreamStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpStreamStore {
    pub fn new(base_url: &str) -> Result<Self, StoreError> {
        if base_url.is_empty() {
            return Err(StoreError::Config("stream core URL is empty".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| StoreError::Config(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, key: &StreamKey) -> String {
        format!(
            "{}/{}/{}",
            self.base_url,
            key.project_id(),
            key.stream_id()
        )
    }
}

#[async_trait]
impl StreamStore for HttpStreamStore {
    async fn head(&self, key: &StreamKey) -> Result<HeadResponse, StoreError> {
        let resp = self.client.head(self.url(key)).send().await?;
        let status = resp.status().as_u16();

        if resp.status().is_success() {
            let content_type = resp
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            Ok(HeadResponse {
                exists: true,
                content_type,
            })
        } else if status == 404 {
            Ok(HeadResponse {
                exists: false,
                content_type: None,
            })
        } else {
            Err(StoreError::UnexpectedStatus(status))
        }
    }

    async fn put(
        &self,
        key: &StreamKey,
        content_type: &str,
        body: Option<&[u8]>,
    ) -> Result<PutResponse, StoreError> {
        let mut request = self
            .client
            .put(self.url(key))
            .header(CONTENT_TYPE, content_type);
        if let Some(bytes) = body {
            request = request.body(bytes.to_vec());
        }

        let resp = request.send().await?;
        Ok(PutResponse {
            status: resp.status().as_u16(),
        })
    }

    async fn post(
        &self,
        key: &StreamKey,
        bytes: &[u8],
        content_type: &str,
        producer: Option<&ProducerHeaders>,
    ) -> Result<PostResponse, StoreError> {
        let mut request = self
            .client
            .post(self.url(key))
            .header(CONTENT_TYPE, content_type)
            .body(bytes.to_vec());

        if let Some(headers) = producer {
            request = request
                .header(HEADER_PRODUCER_ID, &headers.producer_id)
                .header(HEADER_PRODUCER_EPOCH, &headers.producer_epoch)
                .header(HEADER_PRODUCER_SEQ, &headers.producer_seq);
        }

        let resp = request.send().await?;
        let next_offset = resp
            .headers()
            .get(HEADER_NEXT_OFFSET)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());

        Ok(PostResponse {
            status: resp.status().as_u16(),
            next_offset,
        })
    }

    async fn delete(&self, key: &StreamKey) -> Result<DeleteResponse, StoreError> {
        let resp = self.client.delete(self.url(key)).send().await?;
        Ok(DeleteResponse {
            status: resp.status().as_u16(),
        })
    }

    fn backend_name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_building() {
        let store = HttpStreamStore::new("http://streams.internal:8080/").unwrap();
        let key = StreamKey::new("proj", "orders").unwrap();
        assert_eq!(store.url(&key), "http://streams.internal:8080/proj/orders");
    }

    #[test]
    fn test_empty_base_url_rejected() {
        assert!(HttpStreamStore::new("").is_err());
    }
}
