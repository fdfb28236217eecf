use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use artifact_refinery::pgm::levels::CLIP_FRAMES;
use artifact_refinery::pgm::{synth, Graymap, LevelsAssessor, LevelsImprover, ZoomFinalizer};
use artifact_refinery::telemetry::{BackendCall, InMemoryBackend};
use artifact_refinery::{
    ArtifactRef, Assessment, Assessor, Error, Finalizer, Improvement, Improver, MetricScore,
    Orchestrator, PipelineConfig, Result, RunOptions, RunState, StatusCode, TelemetryBackend,
    TelemetryClient, UploadMode,
};

fn shared_client(backend: &InMemoryBackend) -> TelemetryClient {
    let shared = backend.clone();
    TelemetryClient::new(move || Ok(Box::new(shared.clone()) as Box<dyn TelemetryBackend>))
}

/// Passes once the artifact has been improved `needed` times.
struct NeedsPasses {
    needed: usize,
}

#[async_trait]
impl Assessor for NeedsPasses {
    async fn assess(&self, artifact: &ArtifactRef) -> Result<BTreeMap<String, MetricScore>> {
        tokio::time::sleep(Duration::from_millis(2)).await;
        let passes = artifact.to_string().matches('+').count();
        let score = if passes >= self.needed { 1.0 } else { 0.1 };
        Ok(BTreeMap::from([("q".to_string(), MetricScore::new(score, score))]))
    }
}

struct Plus;

#[async_trait]
impl Improver for Plus {
    async fn improve(&self, a: &ArtifactRef, _: &Assessment, _: u32) -> Result<Improvement> {
        tokio::time::sleep(Duration::from_millis(3)).await;
        Ok(Improvement {
            artifact: ArtifactRef::new(format!("{a}+")),
            applied: vec!["plus".into()],
        })
    }
}

struct Identity;

#[async_trait]
impl Finalizer for Identity {
    async fn finalize(&self, a: &ArtifactRef) -> Result<ArtifactRef> {
        Ok(a.clone())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_runs_never_interleave() {
    let backend = InMemoryBackend::new();
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(NeedsPasses { needed: 2 }),
        Arc::new(Plus),
        Arc::new(Identity),
        shared_client(&backend),
        PipelineConfig::default(),
    ));
    let options = RunOptions {
        raise_on_error: true,
        upload: UploadMode::Deferred,
    };

    let mut handles = Vec::new();
    for i in 0..6 {
        let orchestrator = Arc::clone(&orchestrator);
        handles.push(tokio::spawn(async move {
            orchestrator
                .run_with(RunState::new(format!("in_{i}"), 5), options)
                .await
        }));
    }
    for handle in handles {
        let state = handle.await.unwrap().unwrap();
        assert!(state.passed);
        assert_eq!(state.iteration, 2);
    }

    // begin, step*, conclude blocks are contiguous
    let mut open = false;
    for call in backend.calls() {
        match call {
            BackendCall::Begin => {
                assert!(!open, "begin while another workflow is open");
                open = true;
            }
            BackendCall::Step(_) => assert!(open, "step outside a workflow"),
            BackendCall::Conclude => {
                assert!(open);
                open = false;
            }
            other => panic!("unexpected call {other:?}"),
        }
    }

    assert_eq!(orchestrator.telemetry().flush().await, 6);
    let uploaded = backend.uploaded();
    assert_eq!(uploaded.len(), 6);

    let mut run_ids = HashSet::new();
    for workflow in &uploaded {
        let names: Vec<_> = workflow.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            ["assess", "improve", "assess", "improve", "assess", "finalize"]
        );
        let origin = workflow
            .input
            .split("\"original_artifact\":\"")
            .nth(1)
            .and_then(|rest| rest.split('"').next())
            .unwrap()
            .to_string();
        for step in &workflow.steps {
            assert!(step.input.contains(&format!("\"original_artifact\":\"{origin}\"")));
        }
        run_ids.insert(workflow.metadata["run_id"].clone());
    }
    assert_eq!(run_ids.len(), 6);
}

#[tokio::test]
async fn dark_sample_is_refined_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("dark.pgm");
    synth::write_sample(&input, 0, true).await.unwrap();

    let backend = InMemoryBackend::new();
    let orchestrator = Orchestrator::new(
        Arc::new(LevelsAssessor),
        Arc::new(LevelsImprover::beside_input()),
        Arc::new(ZoomFinalizer::new(dir.path().join("final"))),
        shared_client(&backend),
        PipelineConfig::default(),
    );

    let state = orchestrator.run(RunState::new(input.as_path(), 3)).await.unwrap();

    assert!(state.iteration >= 1 && state.iteration <= 3);
    assert_eq!(state.history.len(), state.iteration as usize);
    for entry in &state.history {
        assert!(entry.output.path().exists());
    }
    let output = state.output.as_ref().unwrap();
    assert_eq!(output.path(), dir.path().join("final").join("dark_final.pgm"));
    let clip = Graymap::decode_stream(&std::fs::read(output.path()).unwrap()).unwrap();
    assert_eq!(clip.len(), CLIP_FRAMES);

    let uploaded = backend.uploaded();
    assert_eq!(uploaded.len(), 1);
    assert_eq!(uploaded[0].status_code, StatusCode::OK);
    assert_eq!(uploaded[0].steps.len(), 2 * state.iteration as usize + 2);
    assert_eq!(uploaded[0].metadata["has_errors"], "false");
}

#[tokio::test]
async fn truncated_artifact_raises_after_replay() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("cut.pgm");
    let mut bytes = synth::scene(32, 32, 1, false).encode();
    bytes.truncate(bytes.len() - 100);
    std::fs::write(&input, bytes).unwrap();

    let backend = InMemoryBackend::new();
    let orchestrator = Orchestrator::new(
        Arc::new(LevelsAssessor),
        Arc::new(LevelsImprover::beside_input()),
        Arc::new(ZoomFinalizer::new(dir.path())),
        shared_client(&backend),
        PipelineConfig::default(),
    );

    let err = orchestrator.run(RunState::new(input.as_path(), 3)).await.unwrap_err();
    assert!(matches!(err, Error::Artifact(_)));

    let uploaded = backend.uploaded();
    assert_eq!(uploaded.len(), 1);
    assert_eq!(uploaded[0].status_code, StatusCode::ERROR);
    assert_eq!(uploaded[0].steps.len(), 1);
    assert!(uploaded[0].steps[0]
        .output
        .starts_with("ERROR: ArtifactError: malformed artifact: truncated raster"));
}
