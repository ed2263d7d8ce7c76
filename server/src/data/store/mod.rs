//! Stream store: the append-log storage facade
//!
//! The storage engine that persists stream payloads and assigns offsets is an
//! external collaborator; this module is the narrow client the fanout engine
//! consumes. Two backends: the HTTP client for the real service, and an
//! in-memory append log for development and tests.

pub mod client;
pub mod error;
pub mod http;
pub mod memory;

pub use client::{
    DeleteResponse, HeadResponse, PostResponse, ProducerHeaders, PutResponse, StreamStore,
};
pub use error::StoreError;
pub use http::HttpStreamStore;
pub use memory::MemoryStreamStore;
