//! Core application

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::core::config::AppConfig;
use crate::core::constants::{APP_NAME_LOWER, ENV_LOG};
use crate::core::shutdown::ShutdownService;
use crate::core::storage::AppStorage;
use crate::data::queue::{FanoutQueue, MemoryFanoutQueue};
use crate::data::state::StateService;
use crate::data::store::{HttpStreamStore, MemoryStreamStore, StreamStore};
use crate::domain::consumer::QueueConsumer;
use crate::domain::estuary::EstuaryRouter;
use crate::domain::registry::SourceRouter;
use crate::domain::subscriptions::SubscriptionService;

/// Fully wired fanout engine
pub struct CoreApp {
    pub config: AppConfig,
    pub storage: AppStorage,
    pub state: Arc<StateService>,
    pub store: Arc<dyn StreamStore>,
    pub queue: Option<Arc<dyn FanoutQueue>>,
    pub sources: Arc<SourceRouter>,
    pub estuaries: Arc<EstuaryRouter>,
    pub subscriptions: Arc<SubscriptionService>,
    pub shutdown: ShutdownService,
}

impl CoreApp {
    /// Run the engine until interrupted
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();
        Self::init_logging();

        tracing::debug!("Application starting");

        let app = Self::init().await?;
        app.start().await
    }

    /// Build every service from configuration
    pub async fn init() -> Result<Self> {
        let config = AppConfig::load();
        let storage = AppStorage::init().await?;

        let state = Arc::new(
            StateService::init(config.state_backend, &storage)
                .await
                .context("Failed to initialize state backend")?,
        );
        tracing::debug!(backend = state.backend_name(), "State initialized");

        let store: Arc<dyn StreamStore> = match &config.stream_core_url {
            Some(url) => Arc::new(
                HttpStreamStore::new(url).context("Failed to initialize stream core client")?,
            ),
            None => {
                tracing::warn!("No stream core URL configured, using the in-memory stream store");
                Arc::new(MemoryStreamStore::new())
            }
        };
        tracing::debug!(backend = store.backend_name(), "Stream store initialized");

        let queue: Option<Arc<dyn FanoutQueue>> = config.queue_enabled.then(|| {
            Arc::new(MemoryFanoutQueue::new(
                config.fanout.queue_max_attempts,
                config.fanout.queue_redeliver_idle,
            )) as Arc<dyn FanoutQueue>
        });

        let sources = Arc::new(SourceRouter::new(
            Arc::clone(&store),
            state.store(),
            queue.clone(),
            config.fanout.clone(),
        ));
        let estuaries = Arc::new(EstuaryRouter::new(
            Arc::clone(&store),
            state.store(),
            Arc::clone(&sources),
        ));
        let subscriptions = Arc::new(SubscriptionService::new(
            Arc::clone(&store),
            Arc::clone(&sources),
            Arc::clone(&estuaries),
            &config.fanout,
        ));
        let shutdown = ShutdownService::new(Arc::clone(&state));

        Ok(Self {
            config,
            storage,
            state,
            store,
            queue,
            sources,
            estuaries,
            subscriptions,
            shutdown,
        })
    }

    async fn start(self) -> Result<()> {
        if let Some(queue) = &self.queue {
            let consumer = QueueConsumer::new(
                Arc::clone(queue),
                Arc::clone(&self.store),
                Arc::clone(&self.sources),
                &self.config.fanout,
            );
            let handle = consumer.spawn(self.shutdown.subscribe());
            self.shutdown.register(handle).await;
        }

        tracing::info!(
            state = self.state.backend_name(),
            store = self.store.backend_name(),
            queue = self.queue.is_some(),
            "Fanout engine running"
        );

        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        self.shutdown.shutdown().await;
        Ok(())
    }

    fn init_logging() {
        let default_filter = format!("info,{}=info", APP_NAME_LOWER);

        let filter = std::env::var(ENV_LOG)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or(default_filter);

        tracing_subscriber::fmt()
            .with_target(false)
            .with_thread_ids(false)
            .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
            .init();
    }
}
