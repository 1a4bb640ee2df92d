//! Pipeline assembly and lifecycle.
//!
//! `Pipeline::start` wires the entity store, status broadcaster, dispatcher,
//! and worker pool together and spawns the executor loop. `shutdown` closes
//! the broadcaster (tearing down all subscriber channels), stops the
//! executor, and waits for in-flight work to record its outcome.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::broadcast::{StatusBroadcaster, StatusDelta};
use crate::collaborators::Collaborators;
use crate::core::config::PipelineConfig;
use crate::core::errors::{PipelineError, Result};
use crate::dispatcher::{Dispatcher, TriggerAccepted};
use crate::exchange::ExchangeManager;
use crate::model::{EntityId, Exchange, Job};
use crate::steps::Step;
use crate::store::EntityStore;
use crate::worker::Executor;

pub struct Pipeline {
    store: Arc<EntityStore>,
    broadcaster: StatusBroadcaster,
    dispatcher: Dispatcher,
    exchanges: ExchangeManager,
    shutdown_tx: Option<oneshot::Sender<()>>,
    executor_handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Builds and starts the pipeline: broadcaster registry created, worker
    /// pool spawned, ready to accept triggers.
    pub fn start(config: PipelineConfig, collaborators: Arc<dyn Collaborators>) -> Result<Self> {
        config
            .validate()
            .map_err(PipelineError::validation)?;

        let store = Arc::new(EntityStore::new());
        let broadcaster = StatusBroadcaster::new(config.broadcast_capacity);
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let exchanges = ExchangeManager::new(store.clone(), collaborators.clone());
        let dispatcher = Dispatcher::new(store.clone(), queue_tx, broadcaster.clone());
        let executor = Executor::new(
            store.clone(),
            collaborators,
            broadcaster.clone(),
            exchanges.clone(),
            config.clone(),
        );
        let executor_handle = tokio::spawn(executor.run(queue_rx, shutdown_rx));

        info!(workers = config.max_workers, "Pipeline started");
        Ok(Self {
            store,
            broadcaster,
            dispatcher,
            exchanges,
            shutdown_tx: Some(shutdown_tx),
            executor_handle: Some(executor_handle),
        })
    }

    /// Creates a job with every step record Pending. Url and resolution are
    /// immutable afterwards.
    pub fn submit_job(&self, url: impl Into<String>, resolution: impl Into<String>) -> Job {
        self.store.insert_job(Job::new(url, resolution))
    }

    /// Triggers a job-level step or exchange-level substep. See
    /// [`Dispatcher::trigger`] for the contract.
    pub async fn trigger(&self, entity: &EntityId, step: Step) -> Result<TriggerAccepted> {
        self.dispatcher.trigger(entity, step).await
    }

    /// Marks a manual exchange on a job; requires `0 <= start < end`.
    pub fn mark_manual(&self, job_id: &str, start: f64, end: f64) -> Result<Exchange> {
        self.exchanges.mark_manual(job_id, start, end)
    }

    /// Deletes a job, cascading to its exchanges. Refused while anything is
    /// Queued or Running.
    pub fn delete_job(&self, job_id: &str) -> Result<()> {
        self.store.delete_job(job_id)
    }

    /// Opens a live status subscription. Connecting subscribers receive only
    /// deltas published after this call; query the store for full state.
    pub fn subscribe(&self) -> async_broadcast::Receiver<StatusDelta> {
        self.broadcaster.subscribe()
    }

    pub fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    /// Graceful teardown: close subscriber channels, stop the executor, and
    /// wait for in-flight steps to record their outcomes.
    pub async fn shutdown(mut self) {
        self.broadcaster.close();
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.executor_handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Executor task ended abnormally");
            }
        }
        info!("Pipeline shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::StubCollaborators;

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let pipeline =
            Pipeline::start(PipelineConfig::development(), Arc::new(StubCollaborators::new()))
                .unwrap();
        let job = pipeline.submit_job("https://example.com/v", "720p");
        assert!(pipeline.store().job(&job.id).is_some());

        let mut rx = pipeline.subscribe();
        pipeline.shutdown().await;
        // Teardown closes subscriber channels.
        assert!(rx.recv().await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let config = PipelineConfig {
            max_workers: 0,
            ..PipelineConfig::default()
        };
        let err = Pipeline::start(config, Arc::new(StubCollaborators::new())).unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }
}
