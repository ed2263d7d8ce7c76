//! Estuary actor handles and routing

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};

use super::actor::EstuaryActor;
use crate::data::state::StateStore;
use crate::data::store::StreamStore;
use crate::domain::error::FanoutError;
use crate::domain::keys::StreamKey;
use crate::domain::registry::SourceRouter;

/// Mailbox depth per estuary actor
const MAILBOX_CAPACITY: usize = 32;

/// Commands processed by an estuary actor, one at a time
pub(super) enum EstuaryCommand {
    AddSubscription {
        stream_id: String,
        subscribed_at: i64,
        reply: oneshot::Sender<Result<(), FanoutError>>,
    },
    RemoveSubscription {
        stream_id: String,
        reply: oneshot::Sender<Result<(), FanoutError>>,
    },
    GetSubscriptions {
        reply: oneshot::Sender<Vec<String>>,
    },
    SetExpiry {
        ttl_seconds: u64,
        reply: oneshot::Sender<Result<i64, FanoutError>>,
    },
    /// Internal: the armed alarm reached its deadline
    AlarmFired { deadline: i64 },
}

/// Typed handle to one estuary's lifecycle actor
#[derive(Clone)]
pub struct EstuaryHandle {
    tx: mpsc::Sender<EstuaryCommand>,
}

impl EstuaryHandle {
    /// Record a subscription to a source stream (idempotent)
    pub async fn add_subscription(
        &self,
        stream_id: &str,
        subscribed_at: i64,
    ) -> Result<(), FanoutError> {
        let (reply, rx) = oneshot::channel();
        self.send(EstuaryCommand::AddSubscription {
            stream_id: stream_id.to_string(),
            subscribed_at,
            reply,
        })
        .await?;
        Self::receive(rx).await?
    }

    /// Drop a subscription to a source stream (idempotent)
    pub async fn remove_subscription(&self, stream_id: &str) -> Result<(), FanoutError> {
        let (reply, rx) = oneshot::channel();
        self.send(EstuaryCommand::RemoveSubscription {
            stream_id: stream_id.to_string(),
            reply,
        })
        .await?;
        Self::receive(rx).await?
    }

    /// Source stream ids, most recently subscribed first
    pub async fn get_subscriptions(&self) -> Result<Vec<String>, FanoutError> {
        let (reply, rx) = oneshot::channel();
        self.send(EstuaryCommand::GetSubscriptions { reply }).await?;
        Self::receive(rx).await
    }

    /// Persist identity and (re)arm the expiry alarm; returns the deadline in
    /// ms epoch
    pub async fn set_expiry(&self, ttl_seconds: u64) -> Result<i64, FanoutError> {
        let (reply, rx) = oneshot::channel();
        self.send(EstuaryCommand::SetExpiry { ttl_seconds, reply })
            .await?;
        Self::receive(rx).await?
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn send(&self, command: EstuaryCommand) -> Result<(), FanoutError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| FanoutError::Internal("estuary actor unavailable".into()))
    }

    async fn receive<T>(rx: oneshot::Receiver<T>) -> Result<T, FanoutError> {
        rx.await
            .map_err(|_| FanoutError::Internal("estuary actor dropped the request".into()))
    }
}

/// Shared dependencies injected into every estuary actor
pub(super) struct EstuaryDeps {
    pub store: Arc<dyn StreamStore>,
    pub state: Arc<dyn StateStore>,
    pub sources: Arc<SourceRouter>,
}

/// Address-keyed map of estuary actors
pub struct EstuaryRouter {
    handles: DashMap<String, EstuaryHandle>,
    deps: Arc<EstuaryDeps>,
}

impl EstuaryRouter {
    pub fn new(
        store: Arc<dyn StreamStore>,
        state: Arc<dyn StateStore>,
        sources: Arc<SourceRouter>,
    ) -> Self {
        Self {
            handles: DashMap::new(),
            deps: Arc::new(EstuaryDeps {
                store,
                state,
                sources,
            }),
        }
    }

    /// Handle for the estuary's actor, spawning it on first use
    pub fn handle(&self, key: &StreamKey) -> EstuaryHandle {
        let mut entry = self
            .handles
            .entry(key.as_path())
            .or_insert_with(|| Self::spawn(key, &self.deps));
        if entry.is_closed() {
            *entry = Self::spawn(key, &self.deps);
        }
        entry.clone()
    }

    fn spawn(key: &StreamKey, deps: &Arc<EstuaryDeps>) -> EstuaryHandle {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        tokio::spawn(EstuaryActor::run(
            key.clone(),
            tx.clone(),
            rx,
            Arc::clone(deps),
        ));
        EstuaryHandle { tx }
    }
}
