//! Exchange manager: creates exchange records under a job.
//!
//! Auto-detection runs the boundary-detection collaborator and replaces the
//! job's previous auto set; manual marking validates the time range and
//! inserts directly. Both paths create exchanges with all substeps Pending,
//! tracked by the same step-record machinery as job-level steps.

use std::sync::Arc;
use tracing::warn;

use crate::collaborators::Collaborators;
use crate::core::errors::{PipelineError, Result};
use crate::model::{Exchange, SpeakerTurn, TranscriptSegment};
use crate::store::EntityStore;

#[derive(Clone)]
pub struct ExchangeManager {
    store: Arc<EntityStore>,
    collaborators: Arc<dyn Collaborators>,
}

impl ExchangeManager {
    pub fn new(store: Arc<EntityStore>, collaborators: Arc<dyn Collaborators>) -> Self {
        Self {
            store,
            collaborators,
        }
    }

    /// Runs boundary detection over the job's transcript and speaker turns
    /// and replaces its auto-detected exchanges with the fresh candidates.
    /// Manual exchanges are left alone.
    pub async fn auto_detect(
        &self,
        job_id: &str,
        transcript: &[TranscriptSegment],
        turns: &[SpeakerTurn],
    ) -> Result<Vec<Exchange>> {
        let candidates = self
            .collaborators
            .identify_exchanges(transcript, turns)
            .await
            .map_err(|e| PipelineError::ExternalExecution {
                step: crate::steps::Step::Job(crate::steps::JobStep::ExchangeId),
                message: e.0,
            })?;
        for candidate in &candidates {
            if !(candidate.start >= 0.0 && candidate.end > candidate.start) {
                warn!(
                    job_id,
                    label = %candidate.label,
                    start = candidate.start,
                    end = candidate.end,
                    "Dropping candidate with invalid time range"
                );
            }
        }
        let valid = candidates
            .into_iter()
            .filter(|c| c.start >= 0.0 && c.end > c.start)
            .collect();
        self.store.replace_auto_exchanges(job_id, valid)
    }

    /// Marks a manually defined exchange. Requires `0 <= start < end`.
    pub fn mark_manual(&self, job_id: &str, start: f64, end: f64) -> Result<Exchange> {
        if !start.is_finite() || !end.is_finite() {
            return Err(PipelineError::validation(
                "start and end must be finite numbers",
            ));
        }
        if start < 0.0 {
            return Err(PipelineError::validation(format!(
                "start must be non-negative, got {}",
                start
            )));
        }
        if end <= start {
            return Err(PipelineError::validation(format!(
                "end ({}) must be greater than start ({})",
                end, start
            )));
        }
        self.store.insert_manual_exchange(job_id, start, end)
    }
}
