//! Pure state machine steps applied inside conditional updates.
//!
//! Every function here mutates a task copy in place and reports what the
//! caller must do once the write has been persisted (typically: enqueue
//! dispatches). None of them touch the store or the queue.

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::types::DiscardReason;
use crate::dispatch::DispatchMessage;
use crate::stage::{RetryConfig, StageOutput};
use crate::task::{
    FailureKind, Phase, Slide, Stage, Task, TaskError, TaskFailure, UnitProgress,
};

/// A unit to dispatch after the write commits.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct UnitDispatch {
    pub stage: Stage,
    pub slide_index: Option<u32>,
    pub attempt: u32,
    pub delay: Duration,
    pub deadline: DateTime<Utc>,
}

/// Why a stage output could not be applied.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ApplyError {
    /// The output does not fit the task; the task should fail.
    Rejected(String),
    /// The resulting write would leave the status graph.
    Transition(TaskError),
}

impl From<TaskError> for ApplyError {
    fn from(err: TaskError) -> Self {
        ApplyError::Transition(err)
    }
}

fn deadline_after(now: DateTime<Utc>, wait: Duration) -> DateTime<Utc> {
    now + chrono::Duration::from_std(wait).unwrap_or_else(|_| chrono::Duration::days(365))
}

/// Move into `phase`'s pending status and arm its units.
///
/// With `rearm_all` unset only units that are not done are armed, which
/// lets a resumed phase keep its finished slides. Starts a new stage epoch.
pub(crate) fn enter_phase(
    task: &mut Task,
    phase: Phase,
    now: DateTime<Utc>,
    timeout: Duration,
    rearm_all: bool,
) -> Result<Vec<UnitDispatch>, TaskError> {
    task.record_transition(phase.pending_status(), now)?;
    task.stage_epoch = task.version + 1;

    let deadline = deadline_after(now, timeout);
    let mut dispatches = Vec::new();
    for (stage, slide_index) in task.phase_units(phase) {
        let Some(unit) = task.unit_mut(stage, slide_index) else {
            continue;
        };
        if unit.done && !rearm_all {
            continue;
        }
        *unit = UnitProgress::armed(deadline);
        dispatches.push(UnitDispatch {
            stage,
            slide_index,
            attempt: 1,
            delay: Duration::ZERO,
            deadline,
        });
    }
    Ok(dispatches)
}

/// Reset every unit of the phases after `phase`.
pub(crate) fn reset_later_phases(task: &mut Task, phase: Phase) {
    let mut next = phase.next();
    while let Some(later) = next {
        for (stage, slide_index) in task.phase_units(later) {
            if let Some(unit) = task.unit_mut(stage, slide_index) {
                *unit = UnitProgress::default();
            }
        }
        next = later.next();
    }
}

/// Check that `message` still targets live, unfinished work on `task`.
pub(crate) fn check_current(task: &Task, message: &DispatchMessage) -> Result<(), DiscardReason> {
    if task.status.active_phase() != Some(message.stage.phase()) {
        return Err(DiscardReason::WrongStatus {
            status: task.status,
        });
    }
    if task.stage_epoch != message.expected_version {
        return Err(DiscardReason::StaleEpoch {
            expected: message.expected_version,
            current: task.stage_epoch,
        });
    }
    match task.unit(message.stage, message.slide_index) {
        None => Err(DiscardReason::UnknownUnit),
        Some(unit) if unit.done => Err(DiscardReason::AlreadyApplied),
        Some(_) => Ok(()),
    }
}

/// Failures only count for the attempt currently in flight.
pub(crate) fn check_failure_attempt(task: &Task, message: &DispatchMessage) -> Result<(), DiscardReason> {
    let current = task
        .unit(message.stage, message.slide_index)
        .map(|unit| unit.attempts)
        .ok_or(DiscardReason::UnknownUnit)?;
    if current != message.attempt {
        return Err(DiscardReason::SupersededAttempt {
            attempt: message.attempt,
            current,
        });
    }
    Ok(())
}

/// Store a successful output and advance the phase when it was the last
/// outstanding unit. Returns the dispatches of the phase entered, if any.
///
/// An output that cannot be applied is returned as `Rejected` and should
/// fail the task.
pub(crate) fn apply_output(
    task: &mut Task,
    message: &DispatchMessage,
    output: StageOutput,
    now: DateTime<Utc>,
    timeout: Duration,
) -> Result<Vec<UnitDispatch>, ApplyError> {
    if output.stage() != message.stage {
        return Err(ApplyError::Rejected(format!(
            "{} executor returned {} output",
            message.stage,
            output.stage()
        )));
    }

    match output {
        StageOutput::Outline(outline) => {
            if !task.slides.is_empty() && task.slides.len() != outline.len() {
                return Err(ApplyError::Rejected(format!(
                    "outline has {} slides but the task already has {}",
                    outline.len(),
                    task.slides.len()
                )));
            }
            if task.slides.is_empty() {
                task.slides = outline
                    .iter()
                    .enumerate()
                    .map(|(i, spec)| Slide::from_spec(i as u32, spec))
                    .collect();
            }
            task.outline = Some(outline);
        }
        StageOutput::Compiled(artifact) => {
            task.compiled_location = Some(artifact);
            task.edits_uncompiled = false;
        }
        slide_output => {
            let index = message
                .slide_index
                .ok_or_else(|| {
                    ApplyError::Rejected("per-slide output without a slide index".to_string())
                })?;
            let slide = task
                .slide_mut(index)
                .ok_or_else(|| ApplyError::Rejected(format!("slide {} does not exist", index)))?;
            match slide_output {
                StageOutput::Content(content) => slide.content = Some(content),
                StageOutput::Image(image_ref) => slide.image_ref = image_ref,
                StageOutput::Notes(notes) => slide.speaker_notes = Some(notes),
                StageOutput::Outline(_) | StageOutput::Compiled(_) => {}
            }
            slide.edit_version += 1;
        }
    }

    if let Some(unit) = task.unit_mut(message.stage, message.slide_index) {
        unit.complete();
    }

    let phase = message.stage.phase();
    if !task.phase_complete(phase) {
        return Ok(Vec::new());
    }

    // The phase checkpoint and the next pending status land in one write.
    task.record_transition(phase.done_status(), now)?;
    match phase.next() {
        Some(next) => Ok(enter_phase(task, next, now, timeout, true)?),
        None => Ok(Vec::new()),
    }
}

/// Outcome of a retryable failure.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RetryStep {
    Retry(UnitDispatch),
    /// The attempt budget is spent; the task was failed with this message.
    Exhausted(String),
}

/// Count a retryable failure against the unit's attempt budget.
pub(crate) fn apply_retryable(
    task: &mut Task,
    message: &DispatchMessage,
    error: &str,
    retry: &RetryConfig,
    now: DateTime<Utc>,
    timeout: Duration,
) -> Result<RetryStep, TaskError> {
    let Some(unit) = task.unit_mut(message.stage, message.slide_index) else {
        return Ok(RetryStep::Exhausted(fail_stage(task, message, "unit vanished")?));
    };

    if retry.can_retry(unit.attempts) {
        let delay = retry.delay_for_attempt(unit.attempts);
        let deadline = deadline_after(now, delay + timeout);
        unit.attempts += 1;
        unit.last_error = Some(error.to_string());
        unit.deadline = Some(deadline);
        return Ok(RetryStep::Retry(UnitDispatch {
            stage: message.stage,
            slide_index: message.slide_index,
            attempt: unit.attempts,
            delay,
            deadline,
        }));
    }

    let failure = format!(
        "{} failed after {} attempts: {}",
        describe_unit(message),
        unit.attempts,
        error
    );
    unit.last_error = Some(error.to_string());
    task.mark_failed(
        TaskFailure::new(FailureKind::RetriesExhausted, failure.clone())
            .at_unit(message.stage, message.slide_index),
    )?;
    Ok(RetryStep::Exhausted(failure))
}

/// Fail the task because of a fatal stage error. Returns the recorded
/// failure message.
pub(crate) fn fail_stage(
    task: &mut Task,
    message: &DispatchMessage,
    error: &str,
) -> Result<String, TaskError> {
    let failure = format!("{}: {}", describe_unit(message), error);
    task.mark_failed(
        TaskFailure::new(FailureKind::Stage, failure.clone())
            .at_unit(message.stage, message.slide_index),
    )?;
    Ok(failure)
}

fn describe_unit(message: &DispatchMessage) -> String {
    match message.slide_index {
        Some(index) => format!("{} stage for slide {}", message.stage, index),
        None => format!("{} stage", message.stage),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{SlideSpec, TaskStatus};
    use crate::testing::fixtures;

    const TIMEOUT: Duration = Duration::from_secs(60);

    /// Submit-time write: CREATED -> OUTLINE_PENDING.
    fn started() -> Task {
        let mut task = fixtures::task("Machine", 2);
        enter_phase(&mut task, Phase::Outline, Utc::now(), TIMEOUT, true).unwrap();
        task.version += 1;
        task
    }

    fn message_for(task: &Task, stage: Stage, slide_index: Option<u32>) -> DispatchMessage {
        let attempt = task.unit(stage, slide_index).map(|u| u.attempts).unwrap_or(1);
        DispatchMessage::new(&task.id, task.stage_epoch, stage, slide_index, attempt, Utc::now())
    }

    fn outline(count: usize) -> StageOutput {
        StageOutput::Outline(
            (0..count)
                .map(|i| SlideSpec::new(format!("Slide {}", i), vec![]))
                .collect(),
        )
    }

    #[test]
    fn test_enter_phase_arms_units_and_starts_epoch() {
        let task = started();
        assert_eq!(task.status, TaskStatus::OutlinePending);
        assert_eq!(task.stage_epoch, 2);
        assert_eq!(task.version, 2);
        assert_eq!(task.outline_progress.attempts, 1);
        assert!(task.outline_progress.deadline.is_some());
    }

    #[test]
    fn test_outline_success_hops_to_content() {
        let mut task = started();
        let msg = message_for(&task, Stage::Outline, None);
        check_current(&task, &msg).unwrap();

        let dispatches = apply_output(&mut task, &msg, outline(2), Utc::now(), TIMEOUT).unwrap();

        assert_eq!(task.status, TaskStatus::ContentPending);
        assert_eq!(task.slides.len(), 2);
        assert_eq!(dispatches.len(), 2);
        assert!(dispatches.iter().all(|d| d.stage == Stage::Content && d.attempt == 1));
        let path: Vec<_> = task.transitions.iter().map(|t| t.to).collect();
        assert_eq!(
            path,
            vec![
                TaskStatus::OutlinePending,
                TaskStatus::OutlineReady,
                TaskStatus::ContentPending
            ]
        );
        // Epoch moves to the version of this write.
        assert_eq!(task.stage_epoch, task.version + 1);
    }

    #[test]
    fn test_fan_out_completes_only_with_every_slide() {
        let mut task = started();
        let msg = message_for(&task, Stage::Outline, None);
        apply_output(&mut task, &msg, outline(2), Utc::now(), TIMEOUT).unwrap();
        task.version += 1;

        let first = message_for(&task, Stage::Content, Some(0));
        let dispatches = apply_output(
            &mut task,
            &first,
            StageOutput::Content("a".into()),
            Utc::now(),
            TIMEOUT,
        )
        .unwrap();
        assert!(dispatches.is_empty());
        assert_eq!(task.status, TaskStatus::ContentPending);
        assert_eq!(check_current(&task, &first), Err(DiscardReason::AlreadyApplied));
        task.version += 1;

        let second = message_for(&task, Stage::Content, Some(1));
        check_current(&task, &second).unwrap();
        let dispatches = apply_output(
            &mut task,
            &second,
            StageOutput::Content("b".into()),
            Utc::now(),
            TIMEOUT,
        )
        .unwrap();
        assert_eq!(task.status, TaskStatus::AssetsPending);
        assert_eq!(dispatches.len(), 4);
        assert_eq!(task.slides[1].edit_version, 1);
    }

    #[test]
    fn test_stale_messages_discarded() {
        let mut task = started();
        let old = message_for(&task, Stage::Outline, None);
        apply_output(&mut task, &old, outline(2), Utc::now(), TIMEOUT).unwrap();
        task.version += 1;

        assert!(matches!(
            check_current(&task, &old),
            Err(DiscardReason::WrongStatus { .. })
        ));

        let mut stale = message_for(&task, Stage::Content, Some(0));
        stale.expected_version -= 1;
        assert!(matches!(
            check_current(&task, &stale),
            Err(DiscardReason::StaleEpoch { .. })
        ));

        let missing = message_for(&task, Stage::Content, Some(5));
        assert_eq!(check_current(&task, &missing), Err(DiscardReason::UnknownUnit));
    }

    #[test]
    fn test_retry_until_exhausted() {
        let mut task = started();
        let retry = RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
            backoff_multiplier: 2.0,
        };

        let msg = message_for(&task, Stage::Outline, None);
        match apply_retryable(&mut task, &msg, "flaky", &retry, Utc::now(), TIMEOUT).unwrap() {
            RetryStep::Retry(dispatch) => {
                assert_eq!(dispatch.attempt, 2);
                assert_eq!(dispatch.delay, Duration::from_millis(100));
            }
            other => panic!("unexpected step: {:?}", other),
        }

        // A duplicate of the first failure no longer counts.
        assert!(matches!(
            check_failure_attempt(&task, &msg),
            Err(DiscardReason::SupersededAttempt { attempt: 1, current: 2 })
        ));

        let msg = message_for(&task, Stage::Outline, None);
        match apply_retryable(&mut task, &msg, "flaky", &retry, Utc::now(), TIMEOUT).unwrap() {
            RetryStep::Retry(dispatch) => assert_eq!(dispatch.delay, Duration::from_millis(200)),
            other => panic!("unexpected step: {:?}", other),
        }

        let msg = message_for(&task, Stage::Outline, None);
        let step = apply_retryable(&mut task, &msg, "flaky", &retry, Utc::now(), TIMEOUT).unwrap();
        assert!(matches!(step, RetryStep::Exhausted(_)));
        assert_eq!(task.status, TaskStatus::Failed);
        let error = task.error.as_ref().unwrap();
        assert_eq!(error.kind, FailureKind::RetriesExhausted);
        assert_eq!(error.stage, Some(Stage::Outline));
    }

    #[test]
    fn test_fatal_failure() {
        let mut task = started();
        let msg = message_for(&task, Stage::Outline, None);
        fail_stage(&mut task, &msg, "quota exhausted").unwrap();

        assert_eq!(task.status, TaskStatus::Failed);
        let error = task.error.unwrap();
        assert_eq!(error.kind, FailureKind::Stage);
        assert!(error.message.contains("quota exhausted"));
    }

    #[test]
    fn test_mismatched_output_rejected() {
        let mut task = started();
        let msg = message_for(&task, Stage::Outline, None);
        let err = apply_output(
            &mut task,
            &msg,
            StageOutput::Notes("x".into()),
            Utc::now(),
            TIMEOUT,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ApplyError::Rejected(ref message) if message.contains("outline executor returned notes output")
        ));
    }

    #[test]
    fn test_failing_a_failed_task_is_refused() {
        let mut task = started();
        let msg = message_for(&task, Stage::Outline, None);
        fail_stage(&mut task, &msg, "first").unwrap();
        let before = task.clone();

        let err = fail_stage(&mut task, &msg, "second").unwrap_err();
        assert!(matches!(err, TaskError::InvalidTransition { .. }));
        assert_eq!(task, before);
    }

    #[test]
    fn test_reset_later_phases() {
        let mut task = fixtures::task_with_content("Reset", 2);
        for slide in &mut task.slides {
            slide.stage_state.image.complete();
            slide.stage_state.notes.complete();
        }
        task.compile_progress.complete();

        reset_later_phases(&mut task, Phase::Content);

        assert!(task.slides.iter().all(|s| s.stage_state.content.done));
        assert!(task.slides.iter().all(|s| !s.stage_state.image.done));
        assert!(!task.compile_progress.done);
    }
}
