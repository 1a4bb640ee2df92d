use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::steps::{ExchangeStep, JobStep};

pub type JobId = String;
pub type ExchangeId = String;

/// Identifies either a job or one of its exchanges.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityId {
    Job(JobId),
    Exchange(ExchangeId),
}

impl EntityId {
    pub fn as_str(&self) -> &str {
        match self {
            EntityId::Job(id) => id,
            EntityId::Exchange(id) => id,
        }
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityId::Job(id) => write!(f, "job:{}", id),
            EntityId::Exchange(id) => write!(f, "exchange:{}", id),
        }
    }
}

/// Closed set of step states. The transition graph is enforced through
/// `can_transition_to`; illegal states are unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepState {
    Pending,
    Queued,
    Running,
    Complete,
    Error,
    Skipped,
}

impl StepState {
    /// Valid edges: Pending→Queued, Queued→Running, Running→{Complete, Error,
    /// Skipped}, and any terminal state back to Queued on a fresh trigger.
    pub fn can_transition_to(self, next: StepState) -> bool {
        use StepState::*;
        matches!(
            (self, next),
            (Pending, Queued)
                | (Queued, Running)
                | (Running, Complete)
                | (Running, Error)
                | (Running, Skipped)
                | (Complete, Queued)
                | (Error, Queued)
                | (Skipped, Queued)
        )
    }

    /// States that count against the single-flight invariant.
    pub fn is_in_flight(self) -> bool {
        matches!(self, StepState::Queued | StepState::Running)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, StepState::Complete | StepState::Error | StepState::Skipped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StepState::Pending => "Pending",
            StepState::Queued => "Queued",
            StepState::Running => "Running",
            StepState::Complete => "Complete",
            StepState::Error => "Error",
            StepState::Skipped => "Skipped",
        }
    }
}

impl std::fmt::Display for StepState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-(entity, step) status record. The generation counter is bumped on
/// every trigger; a worker result carrying an older generation is discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub state: StepState,
    pub error: Option<String>,
    pub generation: u64,
    pub updated_at: DateTime<Utc>,
}

impl StepRecord {
    pub fn new() -> Self {
        Self {
            state: StepState::Pending,
            error: None,
            generation: 0,
            updated_at: Utc::now(),
        }
    }
}

impl Default for StepRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// One timed text segment of a transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// One speaker turn from diarization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakerTurn {
    pub start: f64,
    pub end: f64,
    pub speaker: String,
}

impl SpeakerTurn {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// A candidate exchange range returned by boundary detection. Labels follow
/// the `spkchg_N` scheme.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeCandidate {
    pub label: String,
    pub start: f64,
    pub end: f64,
}

/// A defined short clip inside an exchange, in absolute source time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipDefinition {
    pub start: f64,
    pub end: f64,
    pub speaker: String,
}

impl ClipDefinition {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Job-level step records, one per pipeline phase.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobSteps {
    pub download: StepRecord,
    pub audio: StepRecord,
    pub transcript: StepRecord,
    pub diarization: StepRecord,
    pub exchange_id: StepRecord,
}

impl JobSteps {
    pub fn record(&self, step: JobStep) -> &StepRecord {
        match step {
            JobStep::Download => &self.download,
            JobStep::Audio => &self.audio,
            JobStep::Transcript => &self.transcript,
            JobStep::Diarization => &self.diarization,
            JobStep::ExchangeId => &self.exchange_id,
        }
    }

    pub fn record_mut(&mut self, step: JobStep) -> &mut StepRecord {
        match step {
            JobStep::Download => &mut self.download,
            JobStep::Audio => &mut self.audio,
            JobStep::Transcript => &mut self.transcript,
            JobStep::Diarization => &mut self.diarization,
            JobStep::ExchangeId => &mut self.exchange_id,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (JobStep, &StepRecord)> {
        JobStep::ALL.iter().map(move |&s| (s, self.record(s)))
    }
}

/// Produced artifacts attached to a job as its steps complete.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobArtifacts {
    pub file_path: Option<String>,
    pub audio_path: Option<String>,
    pub transcript: Option<Vec<TranscriptSegment>>,
    pub speaker_turns: Option<Vec<SpeakerTurn>>,
    pub clip_paths: Vec<String>,
}

/// A submitted media item tracked through the five job-level steps. Owned
/// exclusively by the entity store; url and resolution are immutable after
/// creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub url: String,
    pub resolution: String,
    pub steps: JobSteps,
    pub artifacts: JobArtifacts,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(url: impl Into<String>, resolution: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: cuid2::create_id(),
            url: url.into(),
            resolution: resolution.into(),
            steps: JobSteps::default(),
            artifacts: JobArtifacts::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// A job is fully processed when every job-level step is Complete.
    pub fn is_fully_processed(&self) -> bool {
        self.steps.iter().all(|(_, r)| r.state == StepState::Complete)
    }

    pub fn has_error(&self) -> bool {
        self.steps.iter().any(|(_, r)| r.state == StepState::Error)
    }
}

/// How an exchange came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    Auto,
    Manual,
}

/// Exchange-level substep records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExchangeSteps {
    pub diarization: StepRecord,
    pub clip_definition: StepRecord,
    pub clip_cutting: StepRecord,
}

impl ExchangeSteps {
    pub fn record(&self, step: ExchangeStep) -> &StepRecord {
        match step {
            ExchangeStep::Diarization => &self.diarization,
            ExchangeStep::ClipDefinition => &self.clip_definition,
            ExchangeStep::ClipCutting => &self.clip_cutting,
        }
    }

    pub fn record_mut(&mut self, step: ExchangeStep) -> &mut StepRecord {
        match step {
            ExchangeStep::Diarization => &mut self.diarization,
            ExchangeStep::ClipDefinition => &mut self.clip_definition,
            ExchangeStep::ClipCutting => &mut self.clip_cutting,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ExchangeStep, &StepRecord)> {
        ExchangeStep::ALL.iter().map(move |&s| (s, self.record(s)))
    }
}

/// Produced artifacts attached to an exchange as its substeps complete.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExchangeArtifacts {
    pub speaker_turns: Option<Vec<SpeakerTurn>>,
    pub clip_definitions: Option<Vec<ClipDefinition>>,
    pub clip_paths: Vec<String>,
}

/// A child time-range item of a job. References its owning job by id only;
/// jobs never hold exchange pointers (the store keeps a job→exchange index).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exchange {
    pub id: ExchangeId,
    pub job_id: JobId,
    pub kind: ExchangeKind,
    pub label: String,
    pub start: f64,
    pub end: f64,
    pub steps: ExchangeSteps,
    pub artifacts: ExchangeArtifacts,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Exchange {
    pub fn new(
        job_id: impl Into<String>,
        kind: ExchangeKind,
        label: impl Into<String>,
        start: f64,
        end: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: cuid2::create_id(),
            job_id: job_id.into(),
            kind,
            label: label.into(),
            start,
            end,
            steps: ExchangeSteps::default(),
            artifacts: ExchangeArtifacts::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_error(&self) -> bool {
        self.steps.iter().any(|(_, r)| r.state == StepState::Error)
    }
}
