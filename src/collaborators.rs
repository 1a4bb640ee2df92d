//! External collaborator boundary.
//!
//! The core treats all media processing as opaque: each operation is a single
//! async call returning a result or an error message. Implementations wrap
//! yt-dlp, ffmpeg, ASR and diarization models, or whatever else; the core
//! only orchestrates.

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::Duration;
use thiserror::Error;

use crate::model::{ClipDefinition, ExchangeCandidate, SpeakerTurn, TranscriptSegment};

/// A collaborator failure. The message is preserved verbatim in the step
/// record.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct CollaboratorError(pub String);

impl CollaboratorError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

pub type CollabResult<T> = std::result::Result<T, CollaboratorError>;

/// The external operations consumed by the worker execution context, one per
/// pipeline step. Calls may block on I/O or inference; that blocking is
/// confined to the invoking worker slot.
#[async_trait]
pub trait Collaborators: Send + Sync + 'static {
    /// Download the source media; returns the produced file path.
    async fn download(&self, url: &str, resolution: &str) -> CollabResult<String>;

    /// Extract a normalized audio track; returns the audio path.
    async fn extract_audio(&self, file_path: &str) -> CollabResult<String>;

    /// Transcribe audio into ordered timed text segments.
    async fn transcribe(&self, audio_path: &str) -> CollabResult<Vec<TranscriptSegment>>;

    /// Diarize the full audio into ordered speaker turns.
    async fn diarize(&self, audio_path: &str) -> CollabResult<Vec<SpeakerTurn>>;

    /// Boundary detection: speaker-change plus question heuristics over the
    /// transcript and speaker turns, yielding labeled candidate ranges.
    async fn identify_exchanges(
        &self,
        transcript: &[TranscriptSegment],
        turns: &[SpeakerTurn],
    ) -> CollabResult<Vec<ExchangeCandidate>>;

    /// Speaker turns within one exchange's time range.
    async fn diarize_range(
        &self,
        audio_path: &str,
        start: f64,
        end: f64,
    ) -> CollabResult<Vec<SpeakerTurn>>;

    /// Candidate short-clip ranges for an exchange.
    async fn define_clips(
        &self,
        transcript: &[TranscriptSegment],
        turns: &[SpeakerTurn],
    ) -> CollabResult<Vec<ClipDefinition>>;

    /// Cut one clip from the source file; returns the clip file path.
    async fn cut_clip(&self, file_path: &str, start: f64, end: f64) -> CollabResult<String>;
}

/// Deterministic in-memory collaborators for tests and demos.
///
/// Produces a small fixed transcript with two alternating speakers, detects
/// one exchange per speaker change, and "cuts" clips by fabricating paths.
/// Individual operations can be scripted to fail or to stall.
#[derive(Debug, Default)]
pub struct StubCollaborators {
    /// Operation name → error message for the next invocation onward.
    failures: DashMap<String, String>,
    /// Operation name → artificial delay before returning.
    delays: DashMap<String, Duration>,
}

impl StubCollaborators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, operation: &str, message: impl Into<String>) {
        self.failures.insert(operation.to_string(), message.into());
    }

    pub fn clear_failure(&self, operation: &str) {
        self.failures.remove(operation);
    }

    pub fn delay(&self, operation: &str, delay: Duration) {
        self.delays.insert(operation.to_string(), delay);
    }

    async fn gate(&self, operation: &str) -> CollabResult<()> {
        if let Some(delay) = self.delays.get(operation).map(|d| *d) {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = self.failures.get(operation) {
            return Err(CollaboratorError::new(message.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl Collaborators for StubCollaborators {
    async fn download(&self, url: &str, resolution: &str) -> CollabResult<String> {
        self.gate("download").await?;
        Ok(format!("/media/{}_{}.mp4", short_hash(url), resolution))
    }

    async fn extract_audio(&self, file_path: &str) -> CollabResult<String> {
        self.gate("audio").await?;
        Ok(format!("{}.wav", file_path.trim_end_matches(".mp4")))
    }

    async fn transcribe(&self, _audio_path: &str) -> CollabResult<Vec<TranscriptSegment>> {
        self.gate("transcript").await?;
        Ok(vec![
            TranscriptSegment {
                start: 0.0,
                end: 4.0,
                text: "What got you started?".into(),
            },
            TranscriptSegment {
                start: 4.0,
                end: 14.0,
                text: "It began with a garage project.".into(),
            },
            TranscriptSegment {
                start: 14.0,
                end: 18.0,
                text: "And where did it go from there?".into(),
            },
            TranscriptSegment {
                start: 18.0,
                end: 30.0,
                text: "We shipped, then everything changed.".into(),
            },
        ])
    }

    async fn diarize(&self, _audio_path: &str) -> CollabResult<Vec<SpeakerTurn>> {
        self.gate("diarization").await?;
        Ok(vec![
            SpeakerTurn { start: 0.0, end: 4.0, speaker: "SPEAKER_00".into() },
            SpeakerTurn { start: 4.0, end: 14.0, speaker: "SPEAKER_01".into() },
            SpeakerTurn { start: 14.0, end: 18.0, speaker: "SPEAKER_00".into() },
            SpeakerTurn { start: 18.0, end: 30.0, speaker: "SPEAKER_01".into() },
        ])
    }

    async fn identify_exchanges(
        &self,
        _transcript: &[TranscriptSegment],
        turns: &[SpeakerTurn],
    ) -> CollabResult<Vec<ExchangeCandidate>> {
        self.gate("exchange_id").await?;
        // One candidate per change to a new speaker, running to the end of
        // the following turn.
        let mut candidates = Vec::new();
        for (i, pair) in turns.windows(2).enumerate() {
            if pair[0].speaker != pair[1].speaker && i % 2 == 0 {
                candidates.push(ExchangeCandidate {
                    label: format!("spkchg_{}", candidates.len()),
                    start: pair[0].start,
                    end: pair[1].end,
                });
            }
        }
        Ok(candidates)
    }

    async fn diarize_range(
        &self,
        audio_path: &str,
        start: f64,
        end: f64,
    ) -> CollabResult<Vec<SpeakerTurn>> {
        self.gate("exchange_diarization").await?;
        // Clip the full-audio turns to the requested range, as the real
        // pipeline filters its full diarization result.
        let turns = self.diarize(audio_path).await?;
        Ok(turns
            .into_iter()
            .filter(|t| t.start < end && t.end > start)
            .map(|t| SpeakerTurn {
                start: t.start.max(start),
                end: t.end.min(end),
                speaker: t.speaker,
            })
            .filter(|t| t.duration() > 0.0)
            .collect())
    }

    async fn define_clips(
        &self,
        _transcript: &[TranscriptSegment],
        turns: &[SpeakerTurn],
    ) -> CollabResult<Vec<ClipDefinition>> {
        self.gate("clip_definition").await?;
        Ok(turns
            .iter()
            .map(|t| ClipDefinition {
                start: t.start,
                end: t.end,
                speaker: t.speaker.clone(),
            })
            .collect())
    }

    async fn cut_clip(&self, file_path: &str, start: f64, end: f64) -> CollabResult<String> {
        self.gate("clip_cutting").await?;
        Ok(format!(
            "{}_clip_{}-{}.mp4",
            file_path.trim_end_matches(".mp4"),
            (start * 10.0) as u64,
            (end * 10.0) as u64
        ))
    }
}

fn short_hash(input: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    input.hash(&mut hasher);
    hasher.finish() % 1_000_000
}
