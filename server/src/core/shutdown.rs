//! Centralized shutdown management

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use super::constants::SHUTDOWN_TIMEOUT_SECS;
use crate::data::state::StateService;

/// Centralized shutdown service for coordinating graceful shutdown
///
/// Background tasks (the queue consumer, estuary alarms) subscribe to the
/// signal; `shutdown` flips it, waits for registered handles, then closes the
/// durable state backend.
#[derive(Clone)]
pub struct ShutdownService {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
    state: Arc<StateService>,
}

impl ShutdownService {
    pub fn new(state: Arc<StateService>) -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
            handles: Arc::new(Mutex::new(Vec::new())),
            state,
        }
    }

    /// Register a background task handle to be awaited during shutdown
    pub async fn register(&self, handle: JoinHandle<()>) {
        self.handles.lock().await.push(handle);
    }

    /// Subscribe to the shutdown signal
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.rx.clone()
    }

    /// Signal shutdown and wait for registered tasks, bounded by a timeout
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down");
        let _ = self.tx.send(true);

        let handles: Vec<JoinHandle<()>> = self.handles.lock().await.drain(..).collect();
        let drain = async {
            for handle in handles {
                if let Err(e) = handle.await {
                    tracing::warn!(error = %e, "Background task ended abnormally");
                }
            }
        };

        if tokio::time::timeout(Duration::from_secs(SHUTDOWN_TIMEOUT_SECS), drain)
            .await
            .is_err()
        {
            tracing::warn!("Timed out waiting for background tasks");
        }

        self.state.close().await;
        tracing::debug!("Shutdown complete");
    }
}
