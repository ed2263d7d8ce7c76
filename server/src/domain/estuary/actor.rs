//! Estuary lifecycle actor
//!
//! Owns the estuary's source list, identity row, and TTL alarm. At most one
//! alarm is armed at a time; re-arming replaces the pending one, and a fire
//! for a superseded deadline is ignored. A pending deadline found in durable
//! state at spawn is re-armed, so expiry survives restart.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::handle::{EstuaryCommand, EstuaryDeps};
use crate::core::constants::EXPIRY_SWEEP_CHUNK;
use crate::data::state::EstuaryIdentity;
use crate::domain::error::FanoutError;
use crate::domain::keys::StreamKey;
use crate::utils::retry::{DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_ATTEMPTS, retry_with_backoff};
use crate::utils::time::now_ms;

pub(super) struct EstuaryActor {
    key: StreamKey,
    deps: Arc<EstuaryDeps>,
    self_tx: mpsc::Sender<EstuaryCommand>,
    /// stream id -> subscribed_at (ms epoch)
    sources: HashMap<String, i64>,
    has_identity: bool,
    expires_at: Option<i64>,
    alarm: Option<JoinHandle<()>>,
}

impl EstuaryActor {
    pub(super) async fn run(
        key: StreamKey,
        self_tx: mpsc::Sender<EstuaryCommand>,
        mut rx: mpsc::Receiver<EstuaryCommand>,
        deps: Arc<EstuaryDeps>,
    ) {
        let record = match retry_with_backoff(DEFAULT_MAX_ATTEMPTS, DEFAULT_BASE_DELAY_MS, || {
            deps.state.load_estuary(&key)
        })
        .await
        {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(estuary = %key, error = %e, "Failed to load estuary state");
                rx.close();
                while rx.recv().await.is_some() {}
                return;
            }
        };

        let expires_at = record.identity.as_ref().and_then(|i| i.expires_at);
        let mut actor = Self {
            sources: record
                .sources
                .into_iter()
                .map(|row| (row.stream_id, row.subscribed_at))
                .collect(),
            has_identity: record.identity.is_some(),
            expires_at,
            alarm: None,
            key,
            deps,
            self_tx,
        };

        // A deadline persisted before a restart is still binding
        if let Some(deadline) = expires_at {
            actor.arm_alarm(deadline);
        }

        tracing::debug!(
            estuary = %actor.key,
            sources = actor.sources.len(),
            expires_at = ?actor.expires_at,
            "Estuary actor started"
        );

        while let Some(command) = rx.recv().await {
            actor.handle(command).await;
        }
    }

    async fn handle(&mut self, command: EstuaryCommand) {
        match command {
            EstuaryCommand::AddSubscription {
                stream_id,
                subscribed_at,
                reply,
            } => {
                let _ = reply.send(self.add_subscription(stream_id, subscribed_at).await);
            }
            EstuaryCommand::RemoveSubscription { stream_id, reply } => {
                let _ = reply.send(self.remove_subscription(&stream_id).await);
            }
            EstuaryCommand::GetSubscriptions { reply } => {
                let mut ids: Vec<(String, i64)> = self
                    .sources
                    .iter()
                    .map(|(id, &at)| (id.clone(), at))
                    .collect();
                ids.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
                let _ = reply.send(ids.into_iter().map(|(id, _)| id).collect());
            }
            EstuaryCommand::SetExpiry { ttl_seconds, reply } => {
                let _ = reply.send(self.set_expiry(ttl_seconds).await);
            }
            EstuaryCommand::AlarmFired { deadline } => {
                self.alarm_fired(deadline).await;
            }
        }
    }

    async fn add_subscription(
        &mut self,
        stream_id: String,
        subscribed_at: i64,
    ) -> Result<(), FanoutError> {
        let inserted = self
            .deps
            .state
            .insert_estuary_source(&self.key, &stream_id, subscribed_at)
            .await?;
        if inserted {
            self.sources.insert(stream_id, subscribed_at);
        }
        Ok(())
    }

    async fn remove_subscription(&mut self, stream_id: &str) -> Result<(), FanoutError> {
        self.deps
            .state
            .delete_estuary_source(&self.key, stream_id)
            .await?;
        self.sources.remove(stream_id);
        Ok(())
    }

    /// Persist identity with the new deadline and replace the armed alarm
    async fn set_expiry(&mut self, ttl_seconds: u64) -> Result<i64, FanoutError> {
        let expires_at = now_ms() + (ttl_seconds as i64).saturating_mul(1000);
        let identity = EstuaryIdentity {
            project_id: self.key.project_id().to_string(),
            estuary_id: self.key.stream_id().to_string(),
            expires_at: Some(expires_at),
        };
        self.deps
            .state
            .save_estuary_identity(&self.key, &identity)
            .await?;

        self.has_identity = true;
        self.expires_at = Some(expires_at);
        self.arm_alarm(expires_at);
        Ok(expires_at)
    }

    fn arm_alarm(&mut self, deadline: i64) {
        if let Some(pending) = self.alarm.take() {
            pending.abort();
        }
        let delay = Duration::from_millis(deadline.saturating_sub(now_ms()).max(0) as u64);
        let tx = self.self_tx.clone();
        self.alarm = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(EstuaryCommand::AlarmFired { deadline }).await;
        }));
    }

    /// Expiry teardown: detach from every source, delete the stream, clear
    /// state. Failures are logged per entry and never retried here; the
    /// registries' own stale pruning converges anything missed.
    async fn alarm_fired(&mut self, deadline: i64) {
        if self.expires_at != Some(deadline) {
            tracing::trace!(estuary = %self.key, deadline, "Ignoring superseded alarm");
            return;
        }
        if !self.has_identity {
            // Re-fire after teardown: nothing to do
            return;
        }

        tracing::info!(
            estuary = %self.key,
            sources = self.sources.len(),
            "Estuary TTL expired, tearing down"
        );

        let mut stream_ids: Vec<(String, i64)> = self
            .sources
            .iter()
            .map(|(id, &at)| (id.clone(), at))
            .collect();
        stream_ids.sort_by(|a, b| b.1.cmp(&a.1));
        let stream_ids: Vec<String> = stream_ids.into_iter().map(|(id, _)| id).collect();

        let deps = Arc::clone(&self.deps);
        let project_id = self.key.project_id().to_string();
        let estuary_id = self.key.stream_id().to_string();
        for chunk in stream_ids.chunks(EXPIRY_SWEEP_CHUNK) {
            let removals = chunk.iter().map(|stream_id| {
                let deps = Arc::clone(&deps);
                let project_id = project_id.clone();
                let estuary_id = estuary_id.clone();
                async move {
                    let source_key = StreamKey::new(&project_id, stream_id)?;
                    deps.sources
                        .handle(&source_key)
                        .remove_subscriber(&estuary_id)
                        .await?;
                    Ok::<_, FanoutError>(())
                }
            });

            for (stream_id, result) in chunk.iter().zip(join_all(removals).await) {
                if let Err(e) = result {
                    tracing::warn!(
                        estuary = %self.key,
                        source = %stream_id,
                        error = %e,
                        "Failed to detach expired estuary; source will prune lazily"
                    );
                }
            }
        }

        match self.deps.store.delete(&self.key).await {
            Ok(resp) if resp.ok() => {}
            Ok(resp) => {
                tracing::warn!(estuary = %self.key, status = resp.status, "Estuary stream delete refused");
            }
            Err(e) => {
                tracing::warn!(estuary = %self.key, error = %e, "Estuary stream delete failed");
            }
        }

        if let Err(e) = self.deps.state.clear_estuary(&self.key).await {
            tracing::warn!(estuary = %self.key, error = %e, "Failed to clear estuary state");
        }

        // Cleared unconditionally; the next subscribe re-initializes
        self.sources.clear();
        self.has_identity = false;
        self.expires_at = None;
        self.alarm = None;
    }
}

#[cfg(test)]
mod tests {
    use super::super::EstuaryRouter;
    use super::*;
    use crate::core::config::FanoutConfig;
    use crate::data::state::{MemoryStateStore, StateStore};
    use crate::data::store::{MemoryStreamStore, StreamStore};
    use crate::domain::registry::SourceRouter;

    const ESTUARY: &str = "3f2b8c1a-9d4e-4f6a-8b2c-1d3e5f7a9b0c";

    struct TestBed {
        store: Arc<MemoryStreamStore>,
        state: Arc<MemoryStateStore>,
        sources: Arc<SourceRouter>,
        estuaries: EstuaryRouter,
    }

    impl TestBed {
        fn new() -> Self {
            let store = Arc::new(MemoryStreamStore::new());
            let state = Arc::new(MemoryStateStore::new());
            let sources = Arc::new(SourceRouter::new(
                Arc::clone(&store) as Arc<dyn StreamStore>,
                Arc::clone(&state) as Arc<dyn StateStore>,
                None,
                FanoutConfig::default(),
            ));
            let estuaries = EstuaryRouter::new(
                Arc::clone(&store) as _,
                Arc::clone(&state) as _,
                Arc::clone(&sources),
            );
            Self {
                store,
                state,
                sources,
                estuaries,
            }
        }

        fn estuary_key(&self) -> StreamKey {
            StreamKey::estuary("p", ESTUARY).unwrap()
        }

        /// Wire the estuary into `n` sources the way subscribe does
        async fn subscribe_to_sources(&self, n: usize) -> Vec<String> {
            let estuary_key = self.estuary_key();
            self.store.create_stream(&estuary_key, "text/plain");
            let handle = self.estuaries.handle(&estuary_key);

            let mut stream_ids = Vec::new();
            for i in 0..n {
                let stream_id = format!("s{i}");
                let source_key = StreamKey::new("p", &stream_id).unwrap();
                self.store.create_stream(&source_key, "text/plain");
                self.sources
                    .handle(&source_key)
                    .add_subscriber(ESTUARY, i as i64)
                    .await
                    .unwrap();
                handle
                    .add_subscription(&stream_id, i as i64)
                    .await
                    .unwrap();
                stream_ids.push(stream_id);
            }
            stream_ids
        }
    }

    #[tokio::test]
    async fn test_subscriptions_ordered_recent_first() {
        let bed = TestBed::new();
        let handle = bed.estuaries.handle(&bed.estuary_key());

        handle.add_subscription("old", 100).await.unwrap();
        handle.add_subscription("new", 300).await.unwrap();
        handle.add_subscription("mid", 200).await.unwrap();

        assert_eq!(
            handle.get_subscriptions().await.unwrap(),
            vec!["new", "mid", "old"]
        );

        // Idempotent re-add keeps the original timestamp
        handle.add_subscription("old", 999).await.unwrap();
        assert_eq!(
            handle.get_subscriptions().await.unwrap(),
            vec!["new", "mid", "old"]
        );
    }

    #[tokio::test]
    async fn test_remove_subscription_idempotent() {
        let bed = TestBed::new();
        let handle = bed.estuaries.handle(&bed.estuary_key());

        handle.add_subscription("s1", 1).await.unwrap();
        handle.remove_subscription("s1").await.unwrap();
        handle.remove_subscription("s1").await.unwrap();
        assert!(handle.get_subscriptions().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_tears_down_everything() {
        let bed = TestBed::new();
        let stream_ids = bed.subscribe_to_sources(3).await;
        let handle = bed.estuaries.handle(&bed.estuary_key());

        handle.set_expiry(1).await.unwrap();
        // Paused clock: sleeping past the deadline auto-advances through the
        // alarm, and the extra yield lets the teardown run
        tokio::time::sleep(Duration::from_millis(1100)).await;
        tokio::task::yield_now().await;

        for stream_id in &stream_ids {
            let source_key = StreamKey::new("p", stream_id).unwrap();
            let listed = bed.sources.handle(&source_key).list_subscribers().await.unwrap();
            assert!(listed.is_empty(), "estuary still subscribed to {stream_id}");
        }
        assert!(!bed.store.stream_exists(&bed.estuary_key()));
        assert!(handle.get_subscriptions().await.unwrap().is_empty());

        let record = bed.state.load_estuary(&bed.estuary_key()).await.unwrap();
        assert!(record.identity.is_none());
        assert!(record.sources.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_sweeps_more_sources_than_one_chunk() {
        let bed = TestBed::new();
        let stream_ids = bed.subscribe_to_sources(EXPIRY_SWEEP_CHUNK + 5).await;
        let handle = bed.estuaries.handle(&bed.estuary_key());

        handle.set_expiry(1).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        tokio::task::yield_now().await;

        for stream_id in &stream_ids {
            let source_key = StreamKey::new("p", stream_id).unwrap();
            let listed = bed.sources.handle(&source_key).list_subscribers().await.unwrap();
            assert!(listed.is_empty());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_pending_alarm() {
        let bed = TestBed::new();
        bed.subscribe_to_sources(1).await;
        let handle = bed.estuaries.handle(&bed.estuary_key());

        handle.set_expiry(1).await.unwrap();
        // Touch before the first deadline: pushes expiry out
        tokio::time::sleep(Duration::from_millis(500)).await;
        handle.set_expiry(10).await.unwrap();

        // Past the first (superseded) deadline: still alive
        tokio::time::sleep(Duration::from_millis(1000)).await;
        tokio::task::yield_now().await;
        assert!(bed.store.stream_exists(&bed.estuary_key()));
        assert_eq!(handle.get_subscriptions().await.unwrap().len(), 1);

        // Past the second deadline: gone
        tokio::time::sleep(Duration::from_secs(10)).await;
        tokio::task::yield_now().await;
        assert!(!bed.store.stream_exists(&bed.estuary_key()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_persisted_deadline_rearms_on_restart() {
        let bed = TestBed::new();
        let estuary_key = bed.estuary_key();
        bed.store.create_stream(&estuary_key, "text/plain");

        // State left behind by a previous process: identity with a deadline
        // already in the past
        bed.state
            .insert_estuary_source(&estuary_key, "s1", 1)
            .await
            .unwrap();
        bed.state
            .save_estuary_identity(
                &estuary_key,
                &EstuaryIdentity {
                    project_id: "p".into(),
                    estuary_id: ESTUARY.into(),
                    expires_at: Some(now_ms() - 1),
                },
            )
            .await
            .unwrap();

        // First contact spawns the actor, which re-arms and fires immediately
        let handle = bed.estuaries.handle(&estuary_key);
        tokio::time::sleep(Duration::from_millis(50)).await;
        tokio::task::yield_now().await;

        assert!(handle.get_subscriptions().await.unwrap().is_empty());
        assert!(!bed.store.stream_exists(&estuary_key));
    }
}
