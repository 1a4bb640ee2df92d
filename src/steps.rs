//! Static step registry: step names, scope, and prerequisite edges.
//!
//! Each step declares zero or one prerequisite. Exchange-level steps may
//! depend on a step of the owning job (exchange diarization requires the
//! job's full diarization) or on a prior substep of the same exchange.

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Job-level pipeline steps, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStep {
    Download,
    Audio,
    Transcript,
    Diarization,
    ExchangeId,
}

impl JobStep {
    pub const ALL: [JobStep; 5] = [
        JobStep::Download,
        JobStep::Audio,
        JobStep::Transcript,
        JobStep::Diarization,
        JobStep::ExchangeId,
    ];

    pub fn name(self) -> &'static str {
        match self {
            JobStep::Download => "download",
            JobStep::Audio => "audio",
            JobStep::Transcript => "transcript",
            JobStep::Diarization => "diarization",
            JobStep::ExchangeId => "exchange_id",
        }
    }
}

/// Exchange-level substeps, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeStep {
    Diarization,
    ClipDefinition,
    ClipCutting,
}

impl ExchangeStep {
    pub const ALL: [ExchangeStep; 3] = [
        ExchangeStep::Diarization,
        ExchangeStep::ClipDefinition,
        ExchangeStep::ClipCutting,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ExchangeStep::Diarization => "diarization",
            ExchangeStep::ClipDefinition => "clip_definition",
            ExchangeStep::ClipCutting => "clip_cutting",
        }
    }
}

/// A step of either scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Step {
    Job(JobStep),
    Exchange(ExchangeStep),
}

impl Step {
    pub fn scope(self) -> Scope {
        match self {
            Step::Job(_) => Scope::Job,
            Step::Exchange(_) => Scope::Exchange,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Step::Job(s) => s.name(),
            Step::Exchange(s) => s.name(),
        }
    }

    pub fn prerequisite(self) -> Option<Prerequisite> {
        REGISTRY.get(&self).copied().flatten()
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scope {
    Job,
    Exchange,
}

/// Where a prerequisite step lives relative to the triggered entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prerequisite {
    /// A job-level step; for exchange-scope steps this refers to the owning job.
    Job(JobStep),
    /// A prior substep of the same exchange.
    SameExchange(ExchangeStep),
}

lazy_static! {
    static ref REGISTRY: HashMap<Step, Option<Prerequisite>> = {
        let mut m = HashMap::new();
        m.insert(Step::Job(JobStep::Download), None);
        m.insert(
            Step::Job(JobStep::Audio),
            Some(Prerequisite::Job(JobStep::Download)),
        );
        m.insert(
            Step::Job(JobStep::Transcript),
            Some(Prerequisite::Job(JobStep::Audio)),
        );
        m.insert(
            Step::Job(JobStep::Diarization),
            Some(Prerequisite::Job(JobStep::Audio)),
        );
        m.insert(
            Step::Job(JobStep::ExchangeId),
            Some(Prerequisite::Job(JobStep::Transcript)),
        );
        m.insert(
            Step::Exchange(ExchangeStep::Diarization),
            Some(Prerequisite::Job(JobStep::Diarization)),
        );
        m.insert(
            Step::Exchange(ExchangeStep::ClipDefinition),
            Some(Prerequisite::SameExchange(ExchangeStep::Diarization)),
        );
        m.insert(
            Step::Exchange(ExchangeStep::ClipCutting),
            Some(Prerequisite::SameExchange(ExchangeStep::ClipDefinition)),
        );
        m
    };
}
