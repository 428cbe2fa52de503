//! End-to-end lifecycle tests over the SQLite store and filesystem artifacts.

use std::sync::Arc;
use std::time::Duration;

use deckforge_core::task::FailureKind;
use deckforge_core::testing::MockGenerator;
use deckforge_core::{
    ArtifactStore, DispatchOutcome, DispatchQueue, EditLock, ExecutorSet, FsArtifactStore,
    GenerationParams, GeneratorError, InMemoryDispatchQueue, LockConfig, Orchestrator,
    OrchestratorConfig, OrchestratorError, Phase, RequestLimits, RetryConfig, SlideEdits,
    SqliteTaskStore, Stage, StatusError, StatusFacade, TaskStatus, TaskStore,
};
use tempfile::TempDir;

struct Pipeline {
    orchestrator: Orchestrator,
    store: Arc<dyn TaskStore>,
    queue: InMemoryDispatchQueue,
    generator: Arc<MockGenerator>,
    status: StatusFacade,
    temp: TempDir,
}

fn pipeline(config: OrchestratorConfig) -> Pipeline {
    let temp = TempDir::new().unwrap();
    let store: Arc<dyn TaskStore> =
        Arc::new(SqliteTaskStore::new(&temp.path().join("tasks.db")).unwrap());
    let artifacts: Arc<dyn ArtifactStore> =
        Arc::new(FsArtifactStore::new(temp.path().join("artifacts")));
    let queue = InMemoryDispatchQueue::new();
    let generator = Arc::new(MockGenerator::new());

    let orchestrator = Orchestrator::new(
        config,
        RequestLimits::default(),
        LockConfig::default(),
        store.clone(),
        Arc::new(queue.clone()),
        ExecutorSet::new(generator.clone(), artifacts.clone()),
    );
    let status = StatusFacade::new(store.clone(), artifacts);

    Pipeline {
        orchestrator,
        store,
        queue,
        generator,
        status,
        temp,
    }
}

fn manual(max_attempts: u32) -> OrchestratorConfig {
    OrchestratorConfig {
        enabled: false,
        retry: RetryConfig::immediate(max_attempts),
        ..Default::default()
    }
}

async fn submit(p: &Pipeline, topic: &str, num_slides: u32) -> String {
    p.orchestrator
        .submit(&GenerationParams::new(topic, num_slides), "tester")
        .await
        .unwrap()
        .id
}

async fn completed(p: &Pipeline, topic: &str, num_slides: u32) -> String {
    let id = submit(p, topic, num_slides).await;
    p.orchestrator.process_pending().await.unwrap();
    assert_eq!(p.store.get(&id).unwrap().unwrap().status, TaskStatus::Completed);
    id
}

#[tokio::test]
async fn test_happy_path_statuses_only_move_forward() {
    let p = pipeline(manual(3));
    let id = submit(&p, "Intro to AI", 5).await;

    let mut observed = vec![p.status.get_status(&id).unwrap().status];
    while let Some(message) = p.queue.try_receive() {
        let outcome = p.orchestrator.handle_dispatch(&message).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::Applied { .. }), "{:?}", outcome);
        observed.push(p.status.get_status(&id).unwrap().status);
    }

    let ranks: Vec<u8> = observed.iter().map(|s| s.rank().unwrap()).collect();
    assert!(ranks.windows(2).all(|w| w[0] <= w[1]), "{:?}", observed);
    assert_eq!(observed.last(), Some(&TaskStatus::Completed));

    let task = p.store.get(&id).unwrap().unwrap();
    let reached: Vec<TaskStatus> = task.transitions.iter().map(|t| t.to).collect();
    for checkpoint in [
        TaskStatus::OutlineReady,
        TaskStatus::ContentReady,
        TaskStatus::AssetsReady,
        TaskStatus::Completed,
    ] {
        assert!(reached.contains(&checkpoint), "missing {}", checkpoint);
    }
    assert_eq!(task.slides.len(), 5);
    assert!(task.slides.iter().all(|s| s.content.is_some()
        && s.image_ref.is_some()
        && s.speaker_notes.is_some()));

    let (artifact, bytes) = p.status.download(&id).await.unwrap();
    assert!(artifact.verify(&bytes));
    assert!(String::from_utf8(bytes).unwrap().starts_with("# Intro to AI"));
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let p = pipeline(manual(4));
    p.generator.fail_next(
        Stage::Content,
        GeneratorError::Transient("503 from upstream".to_string()),
        3,
    );

    let id = submit(&p, "Flaky", 1).await;
    p.orchestrator.process_pending().await.unwrap();

    let task = p.store.get(&id).unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.unit(Stage::Content, Some(0)).unwrap().attempts, 4);
    assert_eq!(p.generator.calls_for(Stage::Content), 4);
}

#[tokio::test]
async fn test_fatal_failure_stops_dispatching() {
    let p = pipeline(manual(3));
    p.generator.fail_next(
        Stage::Image,
        GeneratorError::Rejected {
            status: 400,
            message: "prompt refused".to_string(),
        },
        1,
    );

    let id = submit(&p, "Doomed", 2).await;
    p.orchestrator.process_pending().await.unwrap();

    let task = p.store.get(&id).unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    let error = task.error.unwrap();
    assert_eq!(error.kind, FailureKind::Stage);
    assert_eq!(error.stage, Some(Stage::Image));
    assert!(p.queue.history_for(&id).iter().all(|m| m.stage != Stage::Compile));

    let dispatched = p.queue.history_for(&id).len();
    assert_eq!(p.orchestrator.process_pending().await.unwrap(), 0);
    assert_eq!(p.orchestrator.check_overdue().await.unwrap(), 0);
    assert_eq!(p.queue.history_for(&id).len(), dispatched);
}

#[tokio::test]
async fn test_redelivered_dispatches_change_nothing() {
    let p = pipeline(manual(3));
    let id = completed(&p, "Duplicates", 3).await;
    let before = p.store.get(&id).unwrap().unwrap();

    for message in p.queue.history_for(&id) {
        let outcome = p.orchestrator.handle_dispatch(&message).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::Discarded(_)), "{:?}", outcome);
    }

    assert_eq!(p.store.get(&id).unwrap().unwrap(), before);
}

#[tokio::test]
async fn test_stale_edit_is_rejected() {
    let p = pipeline(manual(3));
    let id = completed(&p, "Edits", 2).await;
    let seen = p.status.get_status(&id).unwrap().slides.unwrap()[0].edit_version;

    let next = p
        .orchestrator
        .modify_slide(&id, 0, &SlideEdits::content("Mine"), seen, EditLock::Implicit)
        .await
        .unwrap();
    assert_eq!(next, seen + 1);

    let err = p
        .orchestrator
        .modify_slide(&id, 0, &SlideEdits::content("Theirs"), seen, EditLock::Implicit)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Conflict { actual, .. } if actual == next));

    let task = p.store.get(&id).unwrap().unwrap();
    assert_eq!(task.slides[0].content.as_deref(), Some("Mine"));
    assert_eq!(task.status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_concurrent_edits_of_one_slide() {
    let p = pipeline(manual(3));
    let id = completed(&p, "Race", 2).await;
    let seen = p.status.get_status(&id).unwrap().slides.unwrap()[1].edit_version;

    let edits_a = SlideEdits::content("A");
    let edits_b = SlideEdits::content("B");
    let (a, b) = tokio::join!(
        p.orchestrator
            .modify_slide(&id, 1, &edits_a, seen, EditLock::Implicit),
        p.orchestrator
            .modify_slide(&id, 1, &edits_b, seen, EditLock::Implicit),
    );

    let results = [a, b];
    let applied = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(applied, 1, "{:?}", results);
    for result in &results {
        if let Err(e) = result {
            assert!(
                matches!(
                    e,
                    OrchestratorError::Conflict { .. } | OrchestratorError::LockUnavailable(_)
                ),
                "{:?}",
                e
            );
        }
    }

    let task = p.store.get(&id).unwrap().unwrap();
    assert_eq!(task.slides[1].edit_version, seen + 1);
    assert_eq!(task.status, TaskStatus::Completed);
    assert!(task.lock_token.is_none());
}

#[tokio::test]
async fn test_cancel_mid_pipeline() {
    let p = pipeline(manual(3));
    let id = submit(&p, "Cancelled", 3).await;

    // Outline only; the content fan-out stays queued.
    let outline = p.queue.try_receive().unwrap();
    p.orchestrator.handle_dispatch(&outline).await.unwrap();
    assert_eq!(
        p.store.get(&id).unwrap().unwrap().status,
        TaskStatus::ContentPending
    );

    let task = p.orchestrator.cancel(&id, Some("no longer needed")).unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error.as_ref().unwrap().kind, FailureKind::Cancelled);

    p.orchestrator.process_pending().await.unwrap();
    let after = p.store.get(&id).unwrap().unwrap();
    assert_eq!(after.status, TaskStatus::Failed);
    assert!(after.slides.iter().all(|s| s.content.is_none()));

    assert!(matches!(
        p.orchestrator.retry_from_stage(&id, Phase::Content).await,
        Err(OrchestratorError::InvalidState { .. })
    ));
}

#[tokio::test]
async fn test_retry_from_assets_after_failure() {
    let p = pipeline(manual(3));
    p.generator.fail_next(
        Stage::Notes,
        GeneratorError::QuotaExhausted("monthly budget".to_string()),
        1,
    );
    let id = submit(&p, "Second chance", 2).await;
    p.orchestrator.process_pending().await.unwrap();
    assert_eq!(p.store.get(&id).unwrap().unwrap().status, TaskStatus::Failed);
    let content_calls = p.generator.calls_for(Stage::Content);

    assert!(matches!(
        p.orchestrator.retry_from_stage(&id, Phase::Compile).await,
        Err(OrchestratorError::InvalidState { .. })
    ));

    let task = p
        .orchestrator
        .retry_from_stage(&id, Phase::Assets)
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::AssetsPending);
    assert!(task.error.is_none());

    p.orchestrator.process_pending().await.unwrap();
    let task = p.store.get(&id).unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(p.generator.calls_for(Stage::Content), content_calls);
    assert!(p.status.get_result(&id).await.is_ok());
}

#[tokio::test]
async fn test_watchdog_redispatches_lost_units() {
    let p = pipeline(OrchestratorConfig {
        stage_timeout_ms: 50,
        ..manual(3)
    });
    let id = submit(&p, "Lost", 1).await;

    // Drop the outline dispatch as a crashed worker would.
    assert!(p.queue.try_receive().is_some());
    assert_eq!(p.orchestrator.check_overdue().await.unwrap(), 0);

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(p.orchestrator.check_overdue().await.unwrap(), 1);

    let redispatched = p.queue.try_receive().unwrap();
    assert_eq!(redispatched.stage, Stage::Outline);
    assert_eq!(redispatched.attempt, 2);

    p.orchestrator.handle_dispatch(&redispatched).await.unwrap();
    p.orchestrator.process_pending().await.unwrap();
    assert_eq!(p.store.get(&id).unwrap().unwrap().status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_result_rules() {
    let p = pipeline(manual(3));
    let pending = submit(&p, "Not yet", 1).await;
    assert!(matches!(
        p.status.get_result(&pending).await,
        Err(StatusError::NotReady { .. })
    ));
    assert!(matches!(
        p.status.get_result("missing").await,
        Err(StatusError::NotFound(_))
    ));

    p.orchestrator.process_pending().await.unwrap();
    let result = p.status.get_result(&pending).await.unwrap();
    assert_eq!(result.slide_count, 1);
}

#[tokio::test]
async fn test_tasks_survive_reopening_the_database() {
    let p = pipeline(manual(3));
    let id = completed(&p, "Persistent", 2).await;
    let before = p.store.get(&id).unwrap().unwrap();

    let reopened = SqliteTaskStore::new(&p.temp.path().join("tasks.db")).unwrap();
    assert_eq!(reopened.get(&id).unwrap().unwrap(), before);
}
