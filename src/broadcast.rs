//! Status broadcaster: fans out step-status deltas to live subscribers.
//!
//! Delivery is at-most-once with no replay buffer. Publishing never blocks:
//! the channel runs in overflow mode, so a subscriber that falls behind loses
//! its oldest deltas instead of stalling the publisher or its peers. A
//! subscriber that connects after a change sees nothing for it and should
//! query the store for full state on connect.

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::model::{EntityId, StepRecord, StepState};
use crate::steps::Step;

/// One status change for one (entity, step).
#[derive(Debug, Clone, PartialEq)]
pub struct StatusDelta {
    pub entity: EntityId,
    pub step: Step,
    pub state: StepState,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl StatusDelta {
    pub fn from_record(entity: &EntityId, step: Step, record: &StepRecord) -> Self {
        Self {
            entity: entity.clone(),
            step,
            state: record.state,
            error: record.error.clone(),
            updated_at: record.updated_at,
        }
    }

    /// Wire shape: `{entityId: {"<step>_status": state, "error"?: msg,
    /// "updated_at": ts}}`.
    pub fn to_event_json(&self) -> serde_json::Value {
        let mut fields = serde_json::Map::new();
        fields.insert(
            format!("{}_status", self.step.name()),
            json!(self.state.as_str()),
        );
        fields.insert("updated_at".into(), json!(self.updated_at.to_rfc3339()));
        if let Some(err) = &self.error {
            fields.insert("error".into(), json!(err));
        }
        let mut event = serde_json::Map::new();
        event.insert(
            self.entity.as_str().to_owned(),
            serde_json::Value::Object(fields),
        );
        serde_json::Value::Object(event)
    }
}

/// Process-wide subscriber registry, created at pipeline start and closed at
/// shutdown. Cloning shares the underlying channel.
#[derive(Clone)]
pub struct StatusBroadcaster {
    tx: async_broadcast::Sender<StatusDelta>,
    // Keeps the channel alive while no subscriber is connected.
    _keepalive: async_broadcast::InactiveReceiver<StatusDelta>,
}

impl StatusBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (mut tx, rx) = async_broadcast::broadcast(capacity);
        tx.set_overflow(true);
        tx.set_await_active(false);
        info!(capacity, "Status broadcaster initialized");
        Self {
            tx,
            _keepalive: rx.deactivate(),
        }
    }

    /// Publishes a delta to all current subscribers without blocking. Deltas
    /// for a given step record arrive in mutation order; an overflowing
    /// subscriber silently loses its oldest buffered deltas.
    pub fn publish(&self, delta: StatusDelta) {
        match self.tx.try_broadcast(delta) {
            Ok(Some(dropped)) => {
                debug!(entity = %dropped.entity, step = %dropped.step, "Delta dropped on overflow");
            }
            Ok(None) => {}
            Err(async_broadcast::TrySendError::Closed(delta)) => {
                warn!(entity = %delta.entity, step = %delta.step, "Broadcaster closed, delta dropped");
            }
            Err(async_broadcast::TrySendError::Inactive(_)) => {}
            // Unreachable with overflow enabled.
            Err(async_broadcast::TrySendError::Full(delta)) => {
                warn!(entity = %delta.entity, step = %delta.step, "Broadcast buffer full, delta dropped");
            }
        }
    }

    pub fn subscribe(&self) -> async_broadcast::Receiver<StatusDelta> {
        self.tx.new_receiver()
    }

    pub fn subscriber_count(&self) -> usize {
        // The keepalive receiver is inactive and not counted.
        self.tx.receiver_count()
    }

    /// Tears down the registry, closing every subscriber channel.
    pub fn close(&self) {
        if self.tx.close() {
            info!("Status broadcaster closed");
        }
    }
}
