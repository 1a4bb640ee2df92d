//! Dispatcher: validates a trigger and atomically moves the step to Queued.
//!
//! No work happens synchronously inside `trigger`; it only mutates status and
//! enqueues an execution request for the worker pool. Rejections never mutate
//! state.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::broadcast::StatusBroadcaster;
use crate::core::errors::{PipelineError, Result};
use crate::model::{EntityId, StepState};
use crate::resolver::{self, Resolution};
use crate::steps::Step;
use crate::store::EntityStore;

/// A queued unit of work carried to the worker pool. The generation pins the
/// trigger cycle this request belongs to.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub entity: EntityId,
    pub step: Step,
    pub generation: u64,
}

/// Returned to the caller on a successful trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerAccepted {
    pub state: StepState,
    pub generation: u64,
}

#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<EntityStore>,
    queue: mpsc::Sender<ExecRequest>,
    broadcaster: StatusBroadcaster,
}

impl Dispatcher {
    pub fn new(
        store: Arc<EntityStore>,
        queue: mpsc::Sender<ExecRequest>,
        broadcaster: StatusBroadcaster,
    ) -> Self {
        Self {
            store,
            queue,
            broadcaster,
        }
    }

    /// Trigger `step` on `entity`.
    ///
    /// Lookup → prerequisite check → atomic check-and-set to Queued → enqueue.
    /// The in-flight check and the Queued transition are a single atomic
    /// operation against the store, so concurrent triggers for the same
    /// (entity, step) cannot both pass.
    pub async fn trigger(&self, entity: &EntityId, step: Step) -> Result<TriggerAccepted> {
        self.store
            .step_record(entity, step)
            .ok_or_else(|| PipelineError::not_found(format!("{} step {}", entity, step)))?;

        match resolver::resolve(&self.store, entity, step)? {
            Resolution::Satisfied => {}
            Resolution::Unsatisfied(reason) => {
                debug!(entity = %entity, step = %step, %reason, "Trigger rejected");
                return Err(PipelineError::PrerequisiteNotMet { step, reason });
            }
        }

        let queued = self.store.queue_step(entity, step)?;
        self.broadcaster.publish(queued.delta);

        let request = ExecRequest {
            entity: entity.clone(),
            step,
            generation: queued.generation,
        };
        if self.queue.send(request).await.is_err() {
            // Workers are gone; the record stays Queued for an operator to
            // re-trigger after restart.
            return Err(PipelineError::Shutdown);
        }
        info!(entity = %entity, step = %step, generation = queued.generation, "Trigger accepted");
        Ok(TriggerAccepted {
            state: StepState::Queued,
            generation: queued.generation,
        })
    }
}
