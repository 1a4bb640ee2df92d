// Core infrastructure modules
pub mod core {
    pub mod config;
    pub mod errors;
}

// Orchestration building blocks, leaves first
pub mod model; // jobs, exchanges, step records
pub mod steps; // static step registry and prerequisite table
pub mod broadcast; // status delta fan-out
pub mod store; // entity store with atomic transitions
pub mod resolver; // prerequisite resolution
pub mod collaborators; // external media-processing boundary
pub mod exchange; // exchange creation (auto + manual)
pub mod dispatcher; // trigger validation and queueing
pub mod worker; // worker execution context
pub mod pipeline; // assembly and lifecycle

// Re-exports for convenience
pub use crate::core::config::PipelineConfig;
pub use crate::core::errors::{PipelineError, Result};

pub use broadcast::{StatusBroadcaster, StatusDelta};
pub use collaborators::{CollaboratorError, Collaborators, StubCollaborators};
pub use dispatcher::{Dispatcher, ExecRequest, TriggerAccepted};
pub use exchange::ExchangeManager;
pub use model::{EntityId, Exchange, ExchangeKind, Job, StepRecord, StepState};
pub use pipeline::Pipeline;
pub use steps::{ExchangeStep, JobStep, Scope, Step};
pub use store::{EntityStore, StepArtifact, StepOutcome};
pub use worker::Executor;
