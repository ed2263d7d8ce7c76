//! Source actor handles and routing
//!
//! `SourceRouter` is the address-keyed map of running registry actors: one
//! mailbox per source key, spawned on first use, respawned (with a fresh
//! state load) if a previous incarnation died. `SourceHandle` is the typed
//! sender side of a mailbox.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};

use super::actor::SourceActor;
use super::{PublishReceipt, PublishRequest};
use crate::core::config::FanoutConfig;
use crate::data::queue::FanoutQueue;
use crate::data::state::{StateStore, SubscriberRow};
use crate::data::store::StreamStore;
use crate::domain::error::FanoutError;
use crate::domain::keys::StreamKey;

/// Mailbox depth per source actor
const MAILBOX_CAPACITY: usize = 64;

/// Commands processed by a registry actor, one at a time
pub(super) enum SourceCommand {
    Publish {
        request: PublishRequest,
        reply: oneshot::Sender<Result<PublishReceipt, FanoutError>>,
    },
    AddSubscriber {
        estuary_id: String,
        subscribed_at: i64,
        reply: oneshot::Sender<Result<bool, FanoutError>>,
    },
    RemoveSubscriber {
        estuary_id: String,
        reply: oneshot::Sender<Result<bool, FanoutError>>,
    },
    RemoveSubscribers {
        estuary_ids: Vec<String>,
        reply: oneshot::Sender<Result<u64, FanoutError>>,
    },
    ListSubscribers {
        reply: oneshot::Sender<Vec<String>>,
    },
    ListSubscribersWithTimestamps {
        reply: oneshot::Sender<Vec<SubscriberRow>>,
    },
}

/// Typed handle to one source's registry actor
#[derive(Clone)]
pub struct SourceHandle {
    tx: mpsc::Sender<SourceCommand>,
}

impl SourceHandle {
    /// Publish a payload to the source and fan it out
    pub async fn publish(&self, request: PublishRequest) -> Result<PublishReceipt, FanoutError> {
        let (reply, rx) = oneshot::channel();
        self.send(SourceCommand::Publish { request, reply }).await?;
        Self::receive(rx).await?
    }

    /// Add a subscriber; returns false if it was already present
    pub async fn add_subscriber(
        &self,
        estuary_id: &str,
        subscribed_at: i64,
    ) -> Result<bool, FanoutError> {
        let (reply, rx) = oneshot::channel();
        self.send(SourceCommand::AddSubscriber {
            estuary_id: estuary_id.to_string(),
            subscribed_at,
            reply,
        })
        .await?;
        Self::receive(rx).await?
    }

    /// Remove a subscriber; returns false if it was not present
    pub async fn remove_subscriber(&self, estuary_id: &str) -> Result<bool, FanoutError> {
        let (reply, rx) = oneshot::channel();
        self.send(SourceCommand::RemoveSubscriber {
            estuary_id: estuary_id.to_string(),
            reply,
        })
        .await?;
        Self::receive(rx).await?
    }

    /// Remove a batch of subscribers; returns the number actually removed
    pub async fn remove_subscribers(&self, estuary_ids: Vec<String>) -> Result<u64, FanoutError> {
        let (reply, rx) = oneshot::channel();
        self.send(SourceCommand::RemoveSubscribers { estuary_ids, reply })
            .await?;
        Self::receive(rx).await?
    }

    /// Snapshot of subscriber ids
    pub async fn list_subscribers(&self) -> Result<Vec<String>, FanoutError> {
        let (reply, rx) = oneshot::channel();
        self.send(SourceCommand::ListSubscribers { reply }).await?;
        Self::receive(rx).await
    }

    /// Snapshot of subscribers with their subscription timestamps
    pub async fn list_subscribers_with_timestamps(
        &self,
    ) -> Result<Vec<SubscriberRow>, FanoutError> {
        let (reply, rx) = oneshot::channel();
        self.send(SourceCommand::ListSubscribersWithTimestamps { reply })
            .await?;
        Self::receive(rx).await
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn send(&self, command: SourceCommand) -> Result<(), FanoutError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| FanoutError::Internal("registry actor unavailable".into()))
    }

    async fn receive<T>(rx: oneshot::Receiver<T>) -> Result<T, FanoutError> {
        rx.await
            .map_err(|_| FanoutError::Internal("registry actor dropped the request".into()))
    }
}

/// Shared dependencies injected into every registry actor
pub(super) struct SourceDeps {
    pub store: Arc<dyn StreamStore>,
    pub state: Arc<dyn StateStore>,
    pub queue: Option<Arc<dyn FanoutQueue>>,
    pub config: FanoutConfig,
}

/// Address-keyed map of registry actors
pub struct SourceRouter {
    handles: DashMap<String, SourceHandle>,
    deps: Arc<SourceDeps>,
}

impl SourceRouter {
    pub fn new(
        store: Arc<dyn StreamStore>,
        state: Arc<dyn StateStore>,
        queue: Option<Arc<dyn FanoutQueue>>,
        config: FanoutConfig,
    ) -> Self {
        Self {
            handles: DashMap::new(),
            deps: Arc::new(SourceDeps {
                store,
                state,
                queue,
                config,
            }),
        }
    }

    /// Handle for the source's actor, spawning it on first use
    ///
    /// A dead incarnation (state load failed and the mailbox closed) is
    /// replaced, which retries the load on the next operation.
    pub fn handle(&self, key: &StreamKey) -> SourceHandle {
        let mut entry = self
            .handles
            .entry(key.as_path())
            .or_insert_with(|| Self::spawn(key, &self.deps));
        if entry.is_closed() {
            *entry = Self::spawn(key, &self.deps);
        }
        entry.clone()
    }

    fn spawn(key: &StreamKey, deps: &Arc<SourceDeps>) -> SourceHandle {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        tokio::spawn(SourceActor::run(key.clone(), rx, Arc::clone(deps)));
        SourceHandle { tx }
    }
}
