//! Entity store: single source of truth for jobs, exchanges, and their
//! step records.
//!
//! All status mutations go through the generation-checked transition methods
//! below. Each method does its check-and-set while holding the DashMap shard
//! guard for the record's entity, so two concurrent triggers for the same
//! (entity, step) cannot both pass the in-flight check.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

use crate::broadcast::StatusDelta;
use crate::core::errors::{PipelineError, Result};
use crate::model::{
    ClipDefinition, EntityId, Exchange, ExchangeCandidate, ExchangeKind, Job, SpeakerTurn,
    StepRecord, StepState, TranscriptSegment,
};
use crate::steps::{ExchangeStep, JobStep, Step};

/// Outcome a worker reports for a finished step, with the artifact to attach.
#[derive(Debug, Clone)]
pub enum StepOutcome {
    Complete(StepArtifact),
    Skipped,
    Error(String),
}

/// Collaborator output attached to the entity on completion.
#[derive(Debug, Clone)]
pub enum StepArtifact {
    FilePath(String),
    AudioPath(String),
    Transcript(Vec<TranscriptSegment>),
    SpeakerTurns(Vec<SpeakerTurn>),
    ExchangeTurns(Vec<SpeakerTurn>),
    ClipDefinitions(Vec<ClipDefinition>),
    ClipPaths(Vec<String>),
    None,
}

/// Result of a successful queue transition.
#[derive(Debug, Clone)]
pub struct QueuedStep {
    pub generation: u64,
    pub delta: StatusDelta,
}

#[derive(Debug, Default)]
pub struct EntityStore {
    jobs: DashMap<String, Job>,
    exchanges: DashMap<String, Exchange>,
    /// job id → owned exchange ids. Id-only index; no object back-pointers.
    exchanges_by_job: DashMap<String, Vec<String>>,
    manual_seq: AtomicU64,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    // --- creation / lookup ---

    pub fn insert_job(&self, job: Job) -> Job {
        self.exchanges_by_job.entry(job.id.clone()).or_default();
        self.jobs.insert(job.id.clone(), job.clone());
        info!(job_id = %job.id, url = %job.url, "Job created");
        job
    }

    pub fn job(&self, id: &str) -> Option<Job> {
        self.jobs.get(id).map(|j| j.clone())
    }

    pub fn exchange(&self, id: &str) -> Option<Exchange> {
        self.exchanges.get(id).map(|e| e.clone())
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.jobs.iter().map(|j| j.clone()).collect()
    }

    pub fn exchanges_for_job(&self, job_id: &str) -> Vec<Exchange> {
        let ids = match self.exchanges_by_job.get(job_id) {
            Some(ids) => ids.clone(),
            None => return Vec::new(),
        };
        ids.iter()
            .filter_map(|id| self.exchange(id))
            .collect()
    }

    /// Jobs with any step in Error, or owning an exchange with an errored
    /// substep.
    pub fn jobs_with_errors(&self) -> Vec<Job> {
        self.jobs
            .iter()
            .filter(|j| {
                j.has_error()
                    || self
                        .exchanges_for_job(&j.id)
                        .iter()
                        .any(|e| e.has_error())
            })
            .map(|j| j.clone())
            .collect()
    }

    /// Current state of a single step record, if the entity and step exist.
    pub fn step_record(&self, entity: &EntityId, step: Step) -> Option<StepRecord> {
        match (entity, step) {
            (EntityId::Job(id), Step::Job(s)) => {
                self.jobs.get(id.as_str()).map(|j| j.steps.record(s).clone())
            }
            (EntityId::Exchange(id), Step::Exchange(s)) => self
                .exchanges
                .get(id.as_str())
                .map(|e| e.steps.record(s).clone()),
            _ => None,
        }
    }

    // --- atomic step transitions ---

    /// Dispatcher-side transition to Queued. Fails with `AlreadyInProgress`
    /// if the record is Queued or Running; otherwise bumps the generation,
    /// clears any error, and returns the new generation.
    pub fn queue_step(&self, entity: &EntityId, step: Step) -> Result<QueuedStep> {
        self.with_record(entity, step, |record| {
            if record.state.is_in_flight() {
                return Err(PipelineError::AlreadyInProgress {
                    entity: entity.clone(),
                    step,
                });
            }
            if !record.state.can_transition_to(StepState::Queued) {
                return Err(PipelineError::InvalidTransition {
                    entity: entity.clone(),
                    step,
                    from: record.state,
                    to: StepState::Queued,
                });
            }
            record.generation += 1;
            record.state = StepState::Queued;
            record.error = None;
            record.updated_at = Utc::now();
            Ok(Some(QueuedStep {
                generation: record.generation,
                delta: StatusDelta::from_record(entity, step, record),
            }))
        })?
        .ok_or_else(|| PipelineError::internal("queue transition yielded no record"))
    }

    /// Worker-side transition Queued → Running. Returns `Ok(None)` when the
    /// request's generation is stale (superseded); the caller discards it.
    pub fn start_step(
        &self,
        entity: &EntityId,
        step: Step,
        generation: u64,
    ) -> Result<Option<StatusDelta>> {
        self.with_record(entity, step, |record| {
            if record.generation != generation || record.state != StepState::Queued {
                debug!(
                    entity = %entity, step = %step, generation,
                    current = record.generation,
                    "Discarding superseded execution request"
                );
                return Ok(None);
            }
            record.state = StepState::Running;
            record.updated_at = Utc::now();
            Ok(Some(StatusDelta::from_record(entity, step, record)))
        })
    }

    /// Worker-side terminal transition, generation-checked. A late result
    /// whose generation no longer matches is discarded silently and the
    /// current record is left untouched.
    pub fn finish_step(
        &self,
        entity: &EntityId,
        step: Step,
        generation: u64,
        outcome: StepOutcome,
    ) -> Result<Option<StatusDelta>> {
        let delta = match entity {
            EntityId::Job(id) => {
                let Step::Job(job_step) = step else {
                    return Err(PipelineError::not_found(format!("{} step {}", entity, step)));
                };
                let mut job = self
                    .jobs
                    .get_mut(id.as_str())
                    .ok_or_else(|| PipelineError::not_found(entity))?;
                let Some(delta) =
                    apply_finish(entity, step, job.steps.record_mut(job_step), generation, &outcome)?
                else {
                    return Ok(None);
                };
                if let StepOutcome::Complete(artifact) = outcome {
                    attach_job_artifact(&mut job, artifact);
                }
                job.updated_at = Utc::now();
                delta
            }
            EntityId::Exchange(id) => {
                let Step::Exchange(ex_step) = step else {
                    return Err(PipelineError::not_found(format!("{} step {}", entity, step)));
                };
                let mut exchange = self
                    .exchanges
                    .get_mut(id.as_str())
                    .ok_or_else(|| PipelineError::not_found(entity))?;
                let Some(delta) = apply_finish(
                    entity,
                    step,
                    exchange.steps.record_mut(ex_step),
                    generation,
                    &outcome,
                )?
                else {
                    return Ok(None);
                };
                if let StepOutcome::Complete(artifact) = outcome {
                    attach_exchange_artifact(&mut exchange, artifact);
                }
                exchange.updated_at = Utc::now();
                delta
            }
        };
        Ok(Some(delta))
    }

    /// Runs `f` against the record while holding the entity's map guard.
    /// The entity-level timestamp is refreshed only when `f` reports an
    /// actual mutation (`Ok(Some(_))`); rejections leave the entity as-is.
    fn with_record<T>(
        &self,
        entity: &EntityId,
        step: Step,
        f: impl FnOnce(&mut StepRecord) -> Result<Option<T>>,
    ) -> Result<Option<T>> {
        match (entity, step) {
            (EntityId::Job(id), Step::Job(s)) => {
                let mut job = self
                    .jobs
                    .get_mut(id.as_str())
                    .ok_or_else(|| PipelineError::not_found(entity))?;
                let out = f(job.steps.record_mut(s));
                if matches!(out, Ok(Some(_))) {
                    job.updated_at = Utc::now();
                }
                out
            }
            (EntityId::Exchange(id), Step::Exchange(s)) => {
                let mut exchange = self
                    .exchanges
                    .get_mut(id.as_str())
                    .ok_or_else(|| PipelineError::not_found(entity))?;
                let out = f(exchange.steps.record_mut(s));
                if matches!(out, Ok(Some(_))) {
                    exchange.updated_at = Utc::now();
                }
                out
            }
            _ => Err(PipelineError::not_found(format!(
                "{} step {}",
                entity, step
            ))),
        }
    }

    // --- exchange management ---

    /// Replaces the job's auto-detected exchanges with a fresh candidate set.
    /// Manual exchanges survive. Returns the inserted exchanges.
    pub fn replace_auto_exchanges(
        &self,
        job_id: &str,
        candidates: Vec<ExchangeCandidate>,
    ) -> Result<Vec<Exchange>> {
        if !self.jobs.contains_key(job_id) {
            return Err(PipelineError::not_found(format!("job:{}", job_id)));
        }
        let mut ids = self.exchanges_by_job.entry(job_id.to_string()).or_default();
        ids.retain(|id| {
            let is_auto = self
                .exchanges
                .get(id)
                .map(|e| e.kind == ExchangeKind::Auto)
                .unwrap_or(false);
            if is_auto {
                self.exchanges.remove(id);
            }
            !is_auto
        });

        let mut inserted = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let exchange = Exchange::new(
                job_id,
                ExchangeKind::Auto,
                candidate.label,
                candidate.start,
                candidate.end,
            );
            ids.push(exchange.id.clone());
            self.exchanges.insert(exchange.id.clone(), exchange.clone());
            inserted.push(exchange);
        }
        info!(job_id, count = inserted.len(), "Replaced auto-detected exchanges");
        Ok(inserted)
    }

    /// Inserts a manually marked exchange. Time range is validated by the
    /// exchange manager before this point.
    pub fn insert_manual_exchange(&self, job_id: &str, start: f64, end: f64) -> Result<Exchange> {
        if !self.jobs.contains_key(job_id) {
            return Err(PipelineError::not_found(format!("job:{}", job_id)));
        }
        let seq = self.manual_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let exchange = Exchange::new(
            job_id,
            ExchangeKind::Manual,
            format!("man_{}", seq),
            start,
            end,
        );
        self.exchanges_by_job
            .entry(job_id.to_string())
            .or_default()
            .push(exchange.id.clone());
        self.exchanges.insert(exchange.id.clone(), exchange.clone());
        info!(job_id, exchange_id = %exchange.id, label = %exchange.label, "Manual exchange marked");
        Ok(exchange)
    }

    /// Deletes a job and cascades to all owned exchanges. Refused while any
    /// step of the job or its exchanges is in flight.
    pub fn delete_job(&self, job_id: &str) -> Result<()> {
        let entity = EntityId::Job(job_id.to_string());
        {
            let job = self
                .jobs
                .get(job_id)
                .ok_or_else(|| PipelineError::not_found(&entity))?;
            if let Some((step, _)) = job.steps.iter().find(|(_, r)| r.state.is_in_flight()) {
                return Err(PipelineError::AlreadyInProgress {
                    entity,
                    step: Step::Job(step),
                });
            };
        }
        for exchange in self.exchanges_for_job(job_id) {
            if let Some((step, _)) = exchange.steps.iter().find(|(_, r)| r.state.is_in_flight()) {
                return Err(PipelineError::AlreadyInProgress {
                    entity: EntityId::Exchange(exchange.id),
                    step: Step::Exchange(step),
                });
            }
        }

        if let Some((_, ids)) = self.exchanges_by_job.remove(job_id) {
            for id in ids {
                self.exchanges.remove(&id);
            }
        }
        self.jobs.remove(job_id);
        info!(job_id, "Job deleted with owned exchanges");
        Ok(())
    }
}

fn apply_finish(
    entity: &EntityId,
    step: Step,
    record: &mut StepRecord,
    generation: u64,
    outcome: &StepOutcome,
) -> Result<Option<StatusDelta>> {
    if record.generation != generation {
        warn!(
            entity = %entity, step = %step, generation,
            current = record.generation,
            "Discarding stale completion"
        );
        return Ok(None);
    }
    let next = match outcome {
        StepOutcome::Complete(_) => StepState::Complete,
        StepOutcome::Skipped => StepState::Skipped,
        StepOutcome::Error(_) => StepState::Error,
    };
    if !record.state.can_transition_to(next) {
        return Err(PipelineError::InvalidTransition {
            entity: entity.clone(),
            step,
            from: record.state,
            to: next,
        });
    }
    record.state = next;
    record.error = match outcome {
        StepOutcome::Error(msg) => Some(msg.clone()),
        _ => None,
    };
    record.updated_at = Utc::now();
    Ok(Some(StatusDelta::from_record(entity, step, record)))
}

fn attach_job_artifact(job: &mut Job, artifact: StepArtifact) {
    match artifact {
        StepArtifact::FilePath(path) => job.artifacts.file_path = Some(path),
        StepArtifact::AudioPath(path) => job.artifacts.audio_path = Some(path),
        StepArtifact::Transcript(segments) => job.artifacts.transcript = Some(segments),
        StepArtifact::SpeakerTurns(turns) => job.artifacts.speaker_turns = Some(turns),
        StepArtifact::ClipPaths(paths) => job.artifacts.clip_paths.extend(paths),
        StepArtifact::None => {}
        other => warn!(job_id = %job.id, ?other, "Artifact does not apply to a job"),
    }
}

fn attach_exchange_artifact(exchange: &mut Exchange, artifact: StepArtifact) {
    match artifact {
        StepArtifact::ExchangeTurns(turns) => exchange.artifacts.speaker_turns = Some(turns),
        StepArtifact::ClipDefinitions(defs) => exchange.artifacts.clip_definitions = Some(defs),
        StepArtifact::ClipPaths(paths) => exchange.artifacts.clip_paths.extend(paths),
        StepArtifact::None => {}
        other => {
            warn!(exchange_id = %exchange.id, ?other, "Artifact does not apply to an exchange")
        }
    }
}

/// Force a job step directly to a state, bypassing the transition graph.
/// Test-only scaffolding for arranging preconditions.
#[cfg(test)]
pub(crate) fn force_job_step(store: &EntityStore, job_id: &str, step: JobStep, state: StepState) {
    let mut job = store.jobs.get_mut(job_id).unwrap();
    let record = job.steps.record_mut(step);
    record.state = state;
    record.updated_at = Utc::now();
}

#[cfg(test)]
pub(crate) fn force_exchange_step(
    store: &EntityStore,
    exchange_id: &str,
    step: ExchangeStep,
    state: StepState,
) {
    let mut exchange = store.exchanges.get_mut(exchange_id).unwrap();
    let record = exchange.steps.record_mut(step);
    record.state = state;
    record.updated_at = Utc::now();
}
