//! Fanout engine: registries, dispatch, lifecycle, and the queue consumer

pub mod circuit;
pub mod consumer;
pub mod dispatcher;
pub mod error;
pub mod estuary;
pub mod keys;
pub mod registry;
pub mod subscriptions;

pub use consumer::QueueConsumer;
pub use error::FanoutError;
pub use estuary::EstuaryRouter;
pub use keys::StreamKey;
pub use registry::{FanoutMode, PublishReceipt, PublishRequest, SourceRouter};
pub use subscriptions::{SubscribeReceipt, SubscriptionService};
