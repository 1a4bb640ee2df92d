use thiserror::Error;

use crate::model::EntityId;
use crate::steps::Step;

/// Unified error type for the pipeline core.
///
/// Dispatcher-level errors are returned synchronously and never mutate state.
/// The variants partition onto the external interface's status codes:
/// `NotFound` → 404, `PrerequisiteNotMet` / `AlreadyInProgress` → 409,
/// `Validation` → 400. Stale completions are never surfaced as errors; they
/// are discarded silently inside the store.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Entity not found: {entity}")]
    NotFound { entity: String },

    #[error("Prerequisite not met for {step}: {reason}")]
    PrerequisiteNotMet { step: Step, reason: String },

    #[error("Step {step} is already in progress for {entity}")]
    AlreadyInProgress { entity: EntityId, step: Step },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("External execution failed for {step}: {message}")]
    ExternalExecution { step: Step, message: String },

    #[error("Invalid transition for {step} on {entity}: {from} -> {to}")]
    InvalidTransition {
        entity: EntityId,
        step: Step,
        from: crate::model::StepState,
        to: crate::model::StepState,
    },

    #[error("Pipeline is shutting down")]
    Shutdown,

    #[error("Channel send error: {0}")]
    ChannelSend(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn not_found(entity: impl std::fmt::Display) -> Self {
        Self::NotFound {
            entity: entity.to_string(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// True for errors the dispatcher reports to the caller as a rejection,
    /// as opposed to internal faults.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::PrerequisiteNotMet { .. }
                | Self::AlreadyInProgress { .. }
                | Self::Validation(_)
        )
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for PipelineError {
    fn from(e: tokio::sync::mpsc::error::SendError<T>) -> Self {
        PipelineError::ChannelSend(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
