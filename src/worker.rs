//! Worker execution context: consumes queued execution requests and runs the
//! external collaborators.
//!
//! Requests execute concurrently up to the configured pool size. Every
//! transition is generation-checked against the store, so a request or a
//! result that was superseded by a re-trigger is discarded without touching
//! the current record. Collaborator failures become Error records and never
//! terminate the worker; only wiring faults end the loop.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tracing::{debug, error, info};

use crate::broadcast::StatusBroadcaster;
use crate::collaborators::Collaborators;
use crate::core::config::PipelineConfig;
use crate::dispatcher::ExecRequest;
use crate::exchange::ExchangeManager;
use crate::model::EntityId;
use crate::steps::{ExchangeStep, JobStep, Step};
use crate::store::{EntityStore, StepArtifact, StepOutcome};

#[derive(Clone)]
pub struct Executor {
    store: Arc<EntityStore>,
    collaborators: Arc<dyn Collaborators>,
    broadcaster: StatusBroadcaster,
    exchanges: ExchangeManager,
    config: PipelineConfig,
}

impl Executor {
    pub fn new(
        store: Arc<EntityStore>,
        collaborators: Arc<dyn Collaborators>,
        broadcaster: StatusBroadcaster,
        exchanges: ExchangeManager,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            collaborators,
            broadcaster,
            exchanges,
            config,
        }
    }

    /// Consumes execution requests until the queue closes or shutdown is
    /// signaled, then drains in-flight work before returning.
    pub async fn run(
        self,
        mut queue: mpsc::Receiver<ExecRequest>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        let semaphore = Arc::new(Semaphore::new(self.config.max_workers));

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("Executor shutting down");
                    break;
                }
                request = queue.recv() => {
                    let Some(request) = request else {
                        info!("Execution queue closed");
                        break;
                    };
                    let permit = match semaphore.clone().acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => break,
                    };
                    let ctx = self.clone();
                    tokio::spawn(async move {
                        ctx.run_one(request).await;
                        drop(permit);
                    });
                }
            }
        }

        // Wait for in-flight workers to finish recording their outcomes.
        let _ = semaphore
            .acquire_many(self.config.max_workers as u32)
            .await;
    }

    async fn run_one(&self, request: ExecRequest) {
        let ExecRequest {
            entity,
            step,
            generation,
        } = request;

        match self.store.start_step(&entity, step, generation) {
            Ok(Some(delta)) => self.broadcaster.publish(delta),
            // Superseded before it started; discard silently.
            Ok(None) => return,
            Err(e) => {
                error!(entity = %entity, step = %step, error = %e, "Worker could not start step");
                return;
            }
        }
        debug!(entity = %entity, step = %step, generation, "Step running");

        let outcome = match self.execute(&entity, step).await {
            Ok(outcome) => outcome,
            Err(message) => StepOutcome::Error(message),
        };

        match self.store.finish_step(&entity, step, generation, outcome) {
            Ok(Some(delta)) => {
                info!(entity = %entity, step = %step, state = %delta.state, "Step finished");
                self.broadcaster.publish(delta);
            }
            Ok(None) => {
                debug!(entity = %entity, step = %step, generation, "Stale result discarded");
            }
            Err(e) => {
                // Store unreachable or record gone; this worker slot gives up.
                error!(entity = %entity, step = %step, error = %e, "Failed to record step outcome");
            }
        }
    }

    async fn execute(&self, entity: &EntityId, step: Step) -> Result<StepOutcome, String> {
        match (entity, step) {
            (EntityId::Job(id), Step::Job(job_step)) => self.execute_job_step(id, job_step).await,
            (EntityId::Exchange(id), Step::Exchange(ex_step)) => {
                self.execute_exchange_step(id, ex_step).await
            }
            _ => Err(format!("step {} does not apply to {}", step, entity)),
        }
    }

    async fn execute_job_step(&self, job_id: &str, step: JobStep) -> Result<StepOutcome, String> {
        let job = self
            .store
            .job(job_id)
            .ok_or_else(|| format!("job record {} not found", job_id))?;

        match step {
            JobStep::Download => {
                let path = self
                    .collaborators
                    .download(&job.url, &job.resolution)
                    .await
                    .map_err(|e| e.0)?;
                Ok(StepOutcome::Complete(StepArtifact::FilePath(path)))
            }
            JobStep::Audio => {
                let file_path = job
                    .artifacts
                    .file_path
                    .ok_or("video file path missing; download has not produced one")?;
                let audio = self
                    .collaborators
                    .extract_audio(&file_path)
                    .await
                    .map_err(|e| e.0)?;
                Ok(StepOutcome::Complete(StepArtifact::AudioPath(audio)))
            }
            JobStep::Transcript => {
                let audio = job
                    .artifacts
                    .audio_path
                    .ok_or("audio path missing; audio extraction has not produced one")?;
                let segments = self
                    .collaborators
                    .transcribe(&audio)
                    .await
                    .map_err(|e| e.0)?;
                Ok(StepOutcome::Complete(StepArtifact::Transcript(segments)))
            }
            JobStep::Diarization => {
                let audio = job
                    .artifacts
                    .audio_path
                    .ok_or("audio path missing; audio extraction has not produced one")?;
                let turns = self.collaborators.diarize(&audio).await.map_err(|e| e.0)?;
                Ok(StepOutcome::Complete(StepArtifact::SpeakerTurns(turns)))
            }
            JobStep::ExchangeId => {
                let transcript = job
                    .artifacts
                    .transcript
                    .ok_or("transcript missing; transcription has not produced one")?;
                let turns = job.artifacts.speaker_turns.unwrap_or_default();
                let inserted = self
                    .exchanges
                    .auto_detect(job_id, &transcript, &turns)
                    .await
                    .map_err(|e| e.to_string())?;
                debug!(job_id, count = inserted.len(), "Exchange candidates inserted");
                Ok(StepOutcome::Complete(StepArtifact::None))
            }
        }
    }

    async fn execute_exchange_step(
        &self,
        exchange_id: &str,
        step: ExchangeStep,
    ) -> Result<StepOutcome, String> {
        let exchange = self
            .store
            .exchange(exchange_id)
            .ok_or_else(|| format!("exchange record {} not found", exchange_id))?;
        let job = self
            .store
            .job(&exchange.job_id)
            .ok_or_else(|| format!("owning job {} not found", exchange.job_id))?;

        match step {
            ExchangeStep::Diarization => {
                let audio = job
                    .artifacts
                    .audio_path
                    .ok_or("audio path missing on owning job")?;
                let turns = self
                    .collaborators
                    .diarize_range(&audio, exchange.start, exchange.end)
                    .await
                    .map_err(|e| e.0)?;
                Ok(StepOutcome::Complete(StepArtifact::ExchangeTurns(turns)))
            }
            ExchangeStep::ClipDefinition => {
                let turns = exchange
                    .artifacts
                    .speaker_turns
                    .ok_or("exchange diarization result missing")?;
                let transcript = job.artifacts.transcript.unwrap_or_default();
                let candidates = self
                    .collaborators
                    .define_clips(&transcript, &turns)
                    .await
                    .map_err(|e| e.0)?;
                // Keep only clips inside the configured duration window.
                let definitions: Vec<_> = candidates
                    .into_iter()
                    .filter(|c| {
                        c.duration() >= self.config.clip_min_secs
                            && c.duration() <= self.config.clip_max_secs
                    })
                    .collect();
                Ok(StepOutcome::Complete(StepArtifact::ClipDefinitions(
                    definitions,
                )))
            }
            ExchangeStep::ClipCutting => {
                let definitions = exchange
                    .artifacts
                    .clip_definitions
                    .ok_or("clip definitions missing; clip definition has not run")?;
                if definitions.is_empty() {
                    // Nothing to cut; intentionally bypassed.
                    return Ok(StepOutcome::Skipped);
                }
                let file_path = job
                    .artifacts
                    .file_path
                    .ok_or("video file path missing on owning job")?;

                let mut clip_paths = Vec::with_capacity(definitions.len());
                let mut failures = Vec::new();
                for definition in &definitions {
                    match self
                        .collaborators
                        .cut_clip(&file_path, definition.start, definition.end)
                        .await
                    {
                        Ok(path) => clip_paths.push(path),
                        Err(e) => failures.push(e.0),
                    }
                }
                if failures.is_empty() {
                    Ok(StepOutcome::Complete(StepArtifact::ClipPaths(clip_paths)))
                } else {
                    let mut summary = failures[..failures.len().min(3)].join("; ");
                    if failures.len() > 3 {
                        summary.push_str("...");
                    }
                    Err(format!(
                        "{} of {} clips failed: {}",
                        failures.len(),
                        definitions.len(),
                        summary
                    ))
                }
            }
        }
    }
}
