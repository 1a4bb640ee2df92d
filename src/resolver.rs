//! Prerequisite resolver: a pure check over current step states.
//!
//! Reads the store, never writes it. For exchange-level steps a job-level
//! prerequisite resolves against the owning job.

use crate::core::errors::{PipelineError, Result};
use crate::model::{EntityId, StepState};
use crate::steps::{Prerequisite, Step};
use crate::store::EntityStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Satisfied,
    Unsatisfied(String),
}

impl Resolution {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Resolution::Satisfied)
    }
}

/// Computes whether `step` may be queued on `entity` given current sibling
/// statuses. `NotFound` if the entity (or an exchange's owning job) is gone.
pub fn resolve(store: &EntityStore, entity: &EntityId, step: Step) -> Result<Resolution> {
    let Some(prereq) = step.prerequisite() else {
        return Ok(Resolution::Satisfied);
    };

    let (target, prereq_step) = match (entity, prereq) {
        (EntityId::Job(_), Prerequisite::Job(s)) => (entity.clone(), Step::Job(s)),
        (EntityId::Exchange(id), Prerequisite::Job(s)) => {
            let exchange = store
                .exchange(id)
                .ok_or_else(|| PipelineError::not_found(entity))?;
            (EntityId::Job(exchange.job_id), Step::Job(s))
        }
        (EntityId::Exchange(_), Prerequisite::SameExchange(s)) => {
            (entity.clone(), Step::Exchange(s))
        }
        (EntityId::Job(_), Prerequisite::SameExchange(_)) => {
            return Err(PipelineError::not_found(format!("{} step {}", entity, step)));
        }
    };

    let record = store
        .step_record(&target, prereq_step)
        .ok_or_else(|| PipelineError::not_found(&target))?;

    if record.state == StepState::Complete {
        Ok(Resolution::Satisfied)
    } else {
        Ok(Resolution::Unsatisfied(format!(
            "{} on {} is {}, requires Complete",
            prereq_step, target, record.state
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Job;
    use crate::steps::{ExchangeStep, JobStep};
    use crate::store::{force_exchange_step, force_job_step};

    fn setup() -> (EntityStore, String) {
        let store = EntityStore::new();
        let job = store.insert_job(Job::new("https://example.com/v", "720p"));
        (store, job.id)
    }

    #[test]
    fn test_download_has_no_prerequisite() {
        let (store, job_id) = setup();
        let res = resolve(&store, &EntityId::Job(job_id), Step::Job(JobStep::Download)).unwrap();
        assert!(res.is_satisfied());
    }

    #[test]
    fn test_audio_gates_on_download() {
        let (store, job_id) = setup();
        let entity = EntityId::Job(job_id.clone());

        let res = resolve(&store, &entity, Step::Job(JobStep::Audio)).unwrap();
        assert_eq!(
            res,
            Resolution::Unsatisfied(format!(
                "download on job:{} is Pending, requires Complete",
                job_id
            ))
        );

        force_job_step(&store, &job_id, JobStep::Download, StepState::Complete);
        let res = resolve(&store, &entity, Step::Job(JobStep::Audio)).unwrap();
        assert!(res.is_satisfied());
    }

    #[test]
    fn test_exchange_diarization_gates_on_owning_job() {
        let (store, job_id) = setup();
        let exchange = store.insert_manual_exchange(&job_id, 1.0, 5.0).unwrap();
        let entity = EntityId::Exchange(exchange.id.clone());

        let res = resolve(&store, &entity, Step::Exchange(ExchangeStep::Diarization)).unwrap();
        assert!(!res.is_satisfied());

        force_job_step(&store, &job_id, JobStep::Diarization, StepState::Complete);
        let res = resolve(&store, &entity, Step::Exchange(ExchangeStep::Diarization)).unwrap();
        assert!(res.is_satisfied());
    }

    #[test]
    fn test_clip_definition_gates_on_exchange_diarization_not_job() {
        let (store, job_id) = setup();
        let exchange = store.insert_manual_exchange(&job_id, 1.0, 5.0).unwrap();
        let entity = EntityId::Exchange(exchange.id.clone());

        // Job-level diarization Complete is not enough.
        force_job_step(&store, &job_id, JobStep::Diarization, StepState::Complete);
        let res = resolve(&store, &entity, Step::Exchange(ExchangeStep::ClipDefinition)).unwrap();
        assert!(!res.is_satisfied());

        force_exchange_step(
            &store,
            &exchange.id,
            ExchangeStep::Diarization,
            StepState::Complete,
        );
        let res = resolve(&store, &entity, Step::Exchange(ExchangeStep::ClipDefinition)).unwrap();
        assert!(res.is_satisfied());
    }

    #[test]
    fn test_unknown_entity() {
        let store = EntityStore::new();
        let err = resolve(
            &store,
            &EntityId::Exchange("missing".into()),
            Step::Exchange(ExchangeStep::Diarization),
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::NotFound { .. }));
    }
}
