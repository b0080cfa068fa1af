//! Heuristic video triggers feeding the queue.

use super::test_utils::{image_caps, record_events, scripted, test_config, video_caps, Script};
use atelier::events::PipelineEvent;
use atelier::pipeline::TurnObservation;
use atelier::trigger::{TriggerDecision, TriggerSignals};
use atelier::{Category, GenerationPipeline, JobDescriptor, JobId, JobStatus};
use tempfile::TempDir;

fn pipeline(dir: &TempDir) -> GenerationPipeline {
    let (stills, _) = scripted("stills", Script::Echo, image_caps());
    let (clips, _) = scripted("clips", Script::Echo, video_caps());
    GenerationPipeline::builder()
        .config(test_config(dir))
        .provider(stills)
        .provider(clips)
        .route(Category::Portrait, ["stills"])
        .route(Category::Video, ["clips"])
        .build()
        .unwrap()
}

/// Major pressure jump plus a contradiction: 30 + 35.
fn confrontation() -> TriggerSignals {
    TriggerSignals {
        pressure_delta: 2,
        contradiction_detected: true,
        ..TriggerSignals::default()
    }
}

fn turn(subject: &str, turn: u64, signals: TriggerSignals) -> TurnObservation {
    TurnObservation {
        subject_id: subject.into(),
        turn,
        signals,
        prompt: format!("{} breaks down, turn {}", subject, turn),
        source_asset: None,
    }
}

#[tokio::test]
async fn test_consecutive_turns_respect_cooldown() {
    let dir = TempDir::new().unwrap();
    let pipeline = pipeline(&dir);

    let outcomes: Vec<_> = (1..=6)
        .map(|t| pipeline.observe_turn(turn("butler", t, confrontation())).unwrap())
        .collect();

    let fired: Vec<u64> = outcomes
        .iter()
        .zip(1u64..)
        .filter(|(o, _)| o.job_id.is_some())
        .map(|(_, t)| t)
        .collect();
    assert_eq!(fired, vec![1, 4]);
    assert_eq!(
        outcomes[1].decision,
        TriggerDecision::CoolingDown {
            score: 65,
            turns_remaining: 2
        }
    );
    assert_eq!(pipeline.jobs().len(), 2);
}

#[tokio::test]
async fn test_cooldowns_are_tracked_per_subject() {
    let dir = TempDir::new().unwrap();
    let pipeline = pipeline(&dir);

    let butler = pipeline.observe_turn(turn("butler", 1, confrontation())).unwrap();
    let maid = pipeline.observe_turn(turn("maid", 1, confrontation())).unwrap();
    assert!(butler.decision.fires());
    assert!(maid.decision.fires());
}

#[tokio::test]
async fn test_weak_signals_do_not_queue_video() {
    let dir = TempDir::new().unwrap();
    let pipeline = pipeline(&dir);

    let signals = TriggerSignals {
        pressure_delta: 1,
        emotional_keywords: 2,
        ..TriggerSignals::default()
    };
    let outcome = pipeline.observe_turn(turn("cook", 1, signals)).unwrap();
    assert_eq!(outcome.decision, TriggerDecision::BelowThreshold { score: 25 });
    assert!(outcome.job_id.is_none());
    assert!(pipeline.jobs().is_empty());
}

#[tokio::test]
async fn test_triggered_video_runs_after_pending_work() {
    let dir = TempDir::new().unwrap();
    let pipeline = pipeline(&dir);
    let events = record_events(&pipeline);

    let early = pipeline
        .enqueue(JobDescriptor::new("butler", Category::Portrait, "butler calm", 0))
        .unwrap();
    let late = pipeline
        .enqueue(JobDescriptor::new("butler", Category::Portrait, "butler angry", 200))
        .unwrap();
    let video = pipeline
        .observe_turn(turn("butler", 7, confrontation()))
        .unwrap()
        .job_id
        .unwrap();
    assert_eq!(pipeline.job(video).unwrap().priority, 201);

    pipeline.run().await;

    let started: Vec<JobId> = events
        .lock()
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::JobStarted { job_id } => Some(*job_id),
            _ => None,
        })
        .collect();
    assert_eq!(started, vec![early, late, video]);
    assert_eq!(pipeline.job(video).unwrap().status, JobStatus::Complete);
    assert!(events.lock().iter().any(|e| matches!(
        e,
        PipelineEvent::TriggerFired { subject_id, turn: 7, score: 65, job_id }
            if subject_id == "butler" && *job_id == video
    )));
}

#[tokio::test]
async fn test_rejected_observation_keeps_cooldown_free() {
    let dir = TempDir::new().unwrap();
    let pipeline = pipeline(&dir);

    let mut invalid = turn("butler", 1, confrontation());
    invalid.prompt = "   ".into();
    assert!(pipeline.observe_turn(invalid).is_err());

    let outcome = pipeline.observe_turn(turn("butler", 2, confrontation())).unwrap();
    assert!(outcome.decision.fires());
}

#[tokio::test]
async fn test_reset_clears_cooldowns() {
    let dir = TempDir::new().unwrap();
    let pipeline = pipeline(&dir);

    assert!(pipeline
        .observe_turn(turn("butler", 1, confrontation()))
        .unwrap()
        .decision
        .fires());
    pipeline.reset();
    assert!(pipeline
        .observe_turn(turn("butler", 2, confrontation()))
        .unwrap()
        .decision
        .fires());
}
