//! End-to-end tests driving the pipeline through its public surface with
//! stub collaborators.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clipline::{
    EntityId, ExchangeKind, ExchangeStep, JobStep, Pipeline, PipelineConfig, PipelineError,
    StepState, Step, StubCollaborators,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

async fn wait_for_state(
    pipeline: &Pipeline,
    entity: &EntityId,
    step: Step,
    expected: StepState,
) {
    for _ in 0..200 {
        let state = pipeline
            .store()
            .step_record(entity, step)
            .map(|r| r.state);
        if state == Some(expected) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let state = pipeline.store().step_record(entity, step).map(|r| r.state);
    panic!("{} on {} never reached {:?}, last seen {:?}", step, entity, expected, state);
}

async fn run_job_step(pipeline: &Pipeline, entity: &EntityId, step: JobStep) {
    pipeline
        .trigger(entity, Step::Job(step))
        .await
        .unwrap_or_else(|e| panic!("trigger {} failed: {}", step.name(), e));
    wait_for_state(pipeline, entity, Step::Job(step), StepState::Complete).await;
}

#[tokio::test]
async fn test_full_job_pipeline() -> Result<()> {
    init_tracing();
    let pipeline = Pipeline::start(
        PipelineConfig::development(),
        Arc::new(StubCollaborators::new()),
    )?;

    let job = pipeline.submit_job("https://example.com/watch?v=abc", "720p");
    let entity = EntityId::Job(job.id.clone());

    // A fresh job has every step Pending.
    for step in JobStep::ALL {
        let record = pipeline
            .store()
            .step_record(&entity, Step::Job(step))
            .unwrap();
        assert_eq!(record.state, StepState::Pending);
    }

    // Drive all five steps in order; each is accepted once its prerequisite
    // completed.
    run_job_step(&pipeline, &entity, JobStep::Download).await;
    run_job_step(&pipeline, &entity, JobStep::Audio).await;
    run_job_step(&pipeline, &entity, JobStep::Transcript).await;
    run_job_step(&pipeline, &entity, JobStep::Diarization).await;
    run_job_step(&pipeline, &entity, JobStep::ExchangeId).await;

    let job = pipeline.store().job(&job.id).unwrap();
    assert!(job.is_fully_processed());
    assert!(job.artifacts.file_path.is_some());
    assert!(job.artifacts.audio_path.is_some());
    assert!(job.artifacts.transcript.is_some());
    assert!(job.artifacts.speaker_turns.is_some());

    // Auto-detection inserted labeled exchanges with Pending substeps.
    let exchanges = pipeline.store().exchanges_for_job(&job.id);
    assert!(!exchanges.is_empty());
    for exchange in &exchanges {
        assert_eq!(exchange.kind, ExchangeKind::Auto);
        assert!(exchange.label.starts_with("spkchg_"));
        for (_, record) in exchange.steps.iter() {
            assert_eq!(record.state, StepState::Pending);
        }
    }

    pipeline.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_prerequisite_gating() {
    let pipeline = Pipeline::start(
        PipelineConfig::development(),
        Arc::new(StubCollaborators::new()),
    )
    .unwrap();
    let job = pipeline.submit_job("u", "720p");
    let entity = EntityId::Job(job.id.clone());

    // Audio before download is rejected and the record is untouched.
    let err = pipeline
        .trigger(&entity, Step::Job(JobStep::Audio))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::PrerequisiteNotMet { .. }));
    let record = pipeline
        .store()
        .step_record(&entity, Step::Job(JobStep::Audio))
        .unwrap();
    assert_eq!(record.state, StepState::Pending);
    assert_eq!(record.generation, 0);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_exchange_substep_pipeline_and_gating() {
    init_tracing();
    let pipeline = Pipeline::start(
        PipelineConfig::development(),
        Arc::new(StubCollaborators::new()),
    )
    .unwrap();
    let job = pipeline.submit_job("u", "720p");
    let job_entity = EntityId::Job(job.id.clone());

    for step in [
        JobStep::Download,
        JobStep::Audio,
        JobStep::Transcript,
        JobStep::Diarization,
        JobStep::ExchangeId,
    ] {
        run_job_step(&pipeline, &job_entity, step).await;
    }

    let exchanges = pipeline.store().exchanges_for_job(&job.id);
    let exchange = &exchanges[0];
    let entity = EntityId::Exchange(exchange.id.clone());

    // clip_definition gates on the exchange's own diarization, even though
    // job-level diarization is Complete.
    let err = pipeline
        .trigger(&entity, Step::Exchange(ExchangeStep::ClipDefinition))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::PrerequisiteNotMet { .. }));

    // Substeps run in order: diarization, clip_definition, clip_cutting.
    pipeline
        .trigger(&entity, Step::Exchange(ExchangeStep::Diarization))
        .await
        .unwrap();
    wait_for_state(
        &pipeline,
        &entity,
        Step::Exchange(ExchangeStep::Diarization),
        StepState::Complete,
    )
    .await;

    pipeline
        .trigger(&entity, Step::Exchange(ExchangeStep::ClipDefinition))
        .await
        .unwrap();
    wait_for_state(
        &pipeline,
        &entity,
        Step::Exchange(ExchangeStep::ClipDefinition),
        StepState::Complete,
    )
    .await;

    pipeline
        .trigger(&entity, Step::Exchange(ExchangeStep::ClipCutting))
        .await
        .unwrap();
    wait_for_state(
        &pipeline,
        &entity,
        Step::Exchange(ExchangeStep::ClipCutting),
        StepState::Complete,
    )
    .await;

    let exchange = pipeline.store().exchange(&exchange.id).unwrap();
    assert!(exchange.artifacts.speaker_turns.is_some());
    assert!(exchange.artifacts.clip_definitions.is_some());
    assert!(!exchange.artifacts.clip_paths.is_empty());

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_single_flight_under_slow_collaborator() {
    init_tracing();
    let stub = Arc::new(StubCollaborators::new());
    stub.delay("download", Duration::from_millis(300));
    let pipeline = Pipeline::start(PipelineConfig::development(), stub).unwrap();
    let job = pipeline.submit_job("u", "720p");
    let entity = EntityId::Job(job.id.clone());

    pipeline
        .trigger(&entity, Step::Job(JobStep::Download))
        .await
        .unwrap();

    // While the first execution is still Queued or Running, a second trigger
    // is rejected.
    let err = pipeline
        .trigger(&entity, Step::Job(JobStep::Download))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::AlreadyInProgress { .. }));

    wait_for_state(&pipeline, &entity, Step::Job(JobStep::Download), StepState::Complete).await;

    // After completion a fresh trigger is accepted with a new generation.
    let accepted = pipeline
        .trigger(&entity, Step::Job(JobStep::Download))
        .await
        .unwrap();
    assert_eq!(accepted.generation, 2);

    wait_for_state(&pipeline, &entity, Step::Job(JobStep::Download), StepState::Complete).await;
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_collaborator_failure_recorded_and_retriggerable() {
    let stub = Arc::new(StubCollaborators::new());
    stub.fail("download", "network unreachable");
    let pipeline = Pipeline::start(PipelineConfig::development(), stub.clone()).unwrap();
    let job = pipeline.submit_job("u", "720p");
    let entity = EntityId::Job(job.id.clone());

    pipeline
        .trigger(&entity, Step::Job(JobStep::Download))
        .await
        .unwrap();
    wait_for_state(&pipeline, &entity, Step::Job(JobStep::Download), StepState::Error).await;
    let record = pipeline
        .store()
        .step_record(&entity, Step::Job(JobStep::Download))
        .unwrap();
    assert_eq!(record.error.as_deref(), Some("network unreachable"));
    assert_eq!(
        pipeline
            .store()
            .jobs_with_errors()
            .iter()
            .map(|j| j.id.clone())
            .collect::<Vec<_>>(),
        vec![job.id.clone()]
    );

    // Recovery is a fresh trigger, which clears the error and starts a new
    // generation.
    stub.clear_failure("download");
    let accepted = pipeline
        .trigger(&entity, Step::Job(JobStep::Download))
        .await
        .unwrap();
    assert_eq!(accepted.generation, 2);
    wait_for_state(&pipeline, &entity, Step::Job(JobStep::Download), StepState::Complete).await;
    let record = pipeline
        .store()
        .step_record(&entity, Step::Job(JobStep::Download))
        .unwrap();
    assert!(record.error.is_none());

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_manual_exchange_marking() {
    let pipeline = Pipeline::start(
        PipelineConfig::development(),
        Arc::new(StubCollaborators::new()),
    )
    .unwrap();
    let job = pipeline.submit_job("u", "720p");

    // Invalid range creates nothing.
    let err = pipeline.mark_manual(&job.id, 10.0, 5.0).unwrap_err();
    assert!(matches!(err, PipelineError::Validation(_)));
    assert!(pipeline.store().exchanges_for_job(&job.id).is_empty());

    // Valid range creates a manual exchange with all substeps Pending.
    let exchange = pipeline.mark_manual(&job.id, 5.0, 10.0).unwrap();
    assert_eq!(exchange.kind, ExchangeKind::Manual);
    for (_, record) in exchange.steps.iter() {
        assert_eq!(record.state, StepState::Pending);
    }

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_status_stream_delivers_ordered_deltas() {
    let pipeline = Pipeline::start(
        PipelineConfig::development(),
        Arc::new(StubCollaborators::new()),
    )
    .unwrap();
    let job = pipeline.submit_job("u", "720p");
    let entity = EntityId::Job(job.id.clone());
    let mut rx = pipeline.subscribe();

    pipeline
        .trigger(&entity, Step::Job(JobStep::Download))
        .await
        .unwrap();
    wait_for_state(&pipeline, &entity, Step::Job(JobStep::Download), StepState::Complete).await;

    let mut states = Vec::new();
    while states.len() < 3 {
        let delta = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for delta")
            .expect("stream closed early");
        assert_eq!(delta.entity, entity);
        states.push(delta.state);
    }
    assert_eq!(
        states,
        vec![StepState::Queued, StepState::Running, StepState::Complete]
    );

    // The wire shape carries the step-suffixed status key.
    let event = clipline::StatusDelta {
        entity: entity.clone(),
        step: Step::Job(JobStep::Download),
        state: StepState::Complete,
        error: None,
        updated_at: chrono::Utc::now(),
    }
    .to_event_json();
    assert_eq!(event[job.id.as_str()]["download_status"], "Complete");

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_delete_job_cascades_and_respects_in_flight() {
    let stub = Arc::new(StubCollaborators::new());
    stub.delay("download", Duration::from_millis(300));
    let pipeline = Pipeline::start(PipelineConfig::development(), stub).unwrap();
    let job = pipeline.submit_job("u", "720p");
    let entity = EntityId::Job(job.id.clone());
    let exchange = pipeline.mark_manual(&job.id, 0.0, 5.0).unwrap();

    pipeline
        .trigger(&entity, Step::Job(JobStep::Download))
        .await
        .unwrap();
    let err = pipeline.delete_job(&job.id).unwrap_err();
    assert!(matches!(err, PipelineError::AlreadyInProgress { .. }));

    wait_for_state(&pipeline, &entity, Step::Job(JobStep::Download), StepState::Complete).await;
    pipeline.delete_job(&job.id).unwrap();
    assert!(pipeline.store().job(&job.id).is_none());
    assert!(pipeline.store().exchange(&exchange.id).is_none());

    pipeline.shutdown().await;
}
