//! Confluence server
//!
//! Multi-tenant publish/subscribe fanout over append-only streams: producers
//! append to a source stream, and every subscribed estuary stream receives an
//! idempotent copy of each message.

mod app;
pub mod core;
pub mod data;
pub mod domain;
pub mod utils;
