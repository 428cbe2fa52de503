//! Generation orchestrator implementation.
//!
//! Drives tasks through the stage pipeline:
//! - Workers consume stage dispatches from the queue and run executors
//! - Results are applied with conditional updates, so duplicates and stale
//!   deliveries are discarded instead of double-applied
//! - A watchdog turns missed deadlines into retryable failures

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::dispatch::{DispatchMessage, DispatchQueue};
use crate::lock::{LockConfig, LockManager};
use crate::metrics;
use crate::stage::{ExecutorSet, StageError, StageOutput};
use crate::task::{
    update_with_retry, validate_request, FailureKind, GenerationParams, Phase, Plan,
    RequestLimits, Task, TaskError, TaskFailure, TaskFilter, TaskStatus, TaskStore,
};

use super::config::OrchestratorConfig;
use super::machine::{self, ApplyError, RetryStep, UnitDispatch};
use super::types::{DiscardReason, DispatchOutcome, OrchestratorError, OrchestratorStatus};

/// What a planned write decided to do with a stage result.
enum Step {
    Applied(Vec<UnitDispatch>),
    Retry(UnitDispatch),
    Failed(String),
    Discard(DiscardReason),
}

/// The generation orchestrator. Cheap to clone; clones share workers and
/// state.
#[derive(Clone)]
pub struct Orchestrator {
    pub(super) config: OrchestratorConfig,
    limits: RequestLimits,
    pub(super) store: Arc<dyn TaskStore>,
    queue: Arc<dyn DispatchQueue>,
    pub(super) executors: ExecutorSet,
    pub(super) locks: Arc<LockManager>,

    // Runtime state
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Orchestrator {
    /// Create a new orchestrator.
    pub fn new(
        config: OrchestratorConfig,
        limits: RequestLimits,
        lock_config: LockConfig,
        store: Arc<dyn TaskStore>,
        queue: Arc<dyn DispatchQueue>,
        executors: ExecutorSet,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let locks = Arc::new(LockManager::new(
            store.clone(),
            lock_config,
            config.max_commit_attempts,
        ));

        Self {
            config,
            limits,
            store,
            queue,
            executors,
            locks,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            handles: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn TaskStore> {
        self.store.clone()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start the workers and the watchdog.
    pub fn start(&self) {
        if !self.config.enabled {
            info!("Orchestrator disabled, dispatches will stay queued");
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Orchestrator already running");
            return;
        }

        info!(workers = self.config.workers, "Starting generation orchestrator");

        let mut handles = self.handles.lock().unwrap();
        for worker in 0..self.config.workers.max(1) {
            handles.push(self.spawn_worker(worker));
        }
        handles.push(self.spawn_watchdog());

        info!("Generation orchestrator started");
    }

    /// Stop the workers gracefully, waiting for in-flight dispatches. The
    /// queue is closed and refuses further messages.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            debug!("Orchestrator not running");
            return;
        }

        info!("Stopping generation orchestrator");
        let _ = self.shutdown_tx.send(());
        // Units whose next dispatch is refused keep their deadlines and are
        // picked up by the watchdog after a restart.
        self.queue.close();

        let handles: Vec<_> = self.handles.lock().unwrap().drain(..).collect();
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                error!("Orchestrator worker panicked: {}", e);
            }
        }

        info!("Generation orchestrator stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    fn spawn_worker(&self, worker: usize) -> JoinHandle<()> {
        let orchestrator = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            debug!(worker, "Dispatch worker started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!(worker, "Dispatch worker received shutdown signal");
                        break;
                    }
                    message = orchestrator.queue.receive() => {
                        let Some(message) = message else {
                            info!(worker, "Dispatch queue closed");
                            break;
                        };
                        if let Err(e) = orchestrator.handle_dispatch(&message).await {
                            warn!(
                                task_id = %message.task_id,
                                unit = %message.unit_label(),
                                "Dispatch error: {}",
                                e
                            );
                        }
                    }
                }
            }
            debug!(worker, "Dispatch worker stopped");
        })
    }

    fn spawn_watchdog(&self) -> JoinHandle<()> {
        let orchestrator = self.clone();
        let interval = self.config.watchdog_interval();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!("Watchdog started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Watchdog received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        if let Err(e) = orchestrator.check_overdue().await {
                            warn!("Watchdog error: {}", e);
                        }
                    }
                }
            }
            info!("Watchdog stopped");
        })
    }

    /// Get current orchestrator status.
    pub fn status(&self) -> Result<OrchestratorStatus, OrchestratorError> {
        let mut tasks_by_status = std::collections::BTreeMap::new();
        for status in TaskStatus::ALL {
            let count = self
                .store
                .count(&TaskFilter::new().with_status(status))?;
            if count > 0 {
                tasks_by_status.insert(status.as_str().to_string(), count);
            }
        }

        Ok(OrchestratorStatus {
            running: self.is_running(),
            workers: self.config.workers,
            queued_dispatches: self.queue.pending(),
            tasks_by_status,
        })
    }

    // =========================================================================
    // Submission and control
    // =========================================================================

    /// Validate and accept a generation request. Returns once the task is
    /// persisted and its outline dispatch queued; never waits for the
    /// pipeline.
    pub async fn submit(
        &self,
        params: &GenerationParams,
        created_by: &str,
    ) -> Result<Task, OrchestratorError> {
        let request = validate_request(params, &self.limits).map_err(|e| {
            metrics::SUBMISSIONS_REJECTED.inc();
            debug!("Rejected submission: {}", e);
            e
        })?;

        // The task is persisted already in OUTLINE_PENDING with its outline
        // unit armed, so a lost dispatch is left to the watchdog.
        let mut task = Task::new(request, created_by);
        let dispatches = machine::enter_phase(
            &mut task,
            Phase::Outline,
            Utc::now(),
            self.config.stage_timeout(),
            true,
        )?;
        task.version += 1;
        self.store.create(&task)?;

        metrics::TASKS_SUBMITTED.inc();
        info!(
            task_id = %task.id,
            topic = %task.request.topic,
            num_slides = task.request.num_slides,
            "Task submitted"
        );

        self.enqueue_all(&task, dispatches).await;
        Ok(task)
    }

    /// Cancel a task that is still generating. Late results are discarded
    /// by the new stage epoch.
    pub fn cancel(&self, task_id: &str, reason: Option<&str>) -> Result<Task, OrchestratorError> {
        let reason = reason.unwrap_or("cancelled by caller");
        let updated = update_with_retry(
            self.store.as_ref(),
            task_id,
            self.config.max_commit_attempts,
            |task| match task.status {
                TaskStatus::Editing => Err(OrchestratorError::LockUnavailable(format!(
                    "task {} is being edited",
                    task.id
                ))),
                status if status.is_terminal() => Err(OrchestratorError::InvalidState {
                    task_id: task.id.clone(),
                    status,
                    operation: "cancel".to_string(),
                }),
                _ => {
                    task.mark_failed(TaskFailure::new(FailureKind::Cancelled, reason))?;
                    task.stage_epoch = task.version + 1;
                    Ok(Plan::Write(()))
                }
            },
        )?;

        metrics::TASKS_FINISHED
            .with_label_values(&[FailureKind::Cancelled.as_str()])
            .inc();
        info!(task_id = %task_id, reason = %reason, "Task cancelled");
        Ok(updated.task)
    }

    /// Resume a failed task from `phase`, regenerating that phase and every
    /// later one.
    pub async fn retry_from_stage(
        &self,
        task_id: &str,
        phase: Phase,
    ) -> Result<Task, OrchestratorError> {
        let now = Utc::now();
        let timeout = self.config.stage_timeout();

        let updated = update_with_retry(
            self.store.as_ref(),
            task_id,
            self.config.max_commit_attempts,
            |task| {
                let refuse = |task: &Task, operation: String| OrchestratorError::InvalidState {
                    task_id: task.id.clone(),
                    status: task.status,
                    operation,
                };

                if task.status != TaskStatus::Failed {
                    return Err(refuse(task, "retry".to_string()));
                }
                if task
                    .error
                    .as_ref()
                    .is_some_and(|e| e.kind == FailureKind::Cancelled)
                {
                    return Err(refuse(task, "retry cancelled".to_string()));
                }

                let ready = match phase {
                    Phase::Outline => true,
                    Phase::Content => task.outline.is_some() && !task.slides.is_empty(),
                    Phase::Assets => task.phase_complete(Phase::Content),
                    Phase::Compile => {
                        task.phase_complete(Phase::Content) && task.phase_complete(Phase::Assets)
                    }
                };
                if !ready {
                    return Err(refuse(
                        task,
                        format!("retry from {} without its prerequisites", phase),
                    ));
                }

                if phase == Phase::Outline {
                    task.outline = None;
                    task.slides.clear();
                }
                machine::reset_later_phases(task, phase);
                task.error = None;
                task.compiled_location = None;
                let dispatches = machine::enter_phase(task, phase, now, timeout, true)?;
                Ok(Plan::Write(dispatches))
            },
        )?;

        info!(
            task_id = %task_id,
            phase = %phase,
            units = updated.value.len(),
            "Task resumed"
        );
        self.enqueue_all(&updated.task, updated.value).await;
        Ok(updated.task)
    }

    // =========================================================================
    // Dispatch handling
    // =========================================================================

    /// Execute one dispatch and apply its result.
    pub async fn handle_dispatch(
        &self,
        message: &DispatchMessage,
    ) -> Result<DispatchOutcome, OrchestratorError> {
        let Some(task) = self.store.get(&message.task_id)? else {
            return Ok(self.discarded(message, DiscardReason::TaskMissing));
        };
        // Skip work whose result would be discarded anyway.
        if let Err(reason) = machine::check_current(&task, message) {
            return Ok(self.discarded(message, reason));
        }

        let stage = message.stage.as_str();
        let result = match self.executors.get(message.stage) {
            None => Err(StageError::Fatal(format!("no executor for {} stage", stage))),
            Some(executor) => {
                let budget = (message.deadline - Utc::now())
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                let started = Instant::now();
                let result = tokio::time::timeout(
                    budget,
                    executor.execute(&task, message.slide_index),
                )
                .await
                .unwrap_or_else(|_| {
                    Err(StageError::Retryable(format!(
                        "{} stage missed its deadline",
                        stage
                    )))
                });
                metrics::STAGE_DURATION
                    .with_label_values(&[stage])
                    .observe(started.elapsed().as_secs_f64());
                result
            }
        };

        let label = match &result {
            Ok(_) => "success",
            Err(StageError::Retryable(_)) => "retryable",
            Err(StageError::Fatal(_)) => "fatal",
        };
        metrics::STAGE_RESULTS.with_label_values(&[stage, label]).inc();
        if let Err(e) = &result {
            debug!(
                task_id = %message.task_id,
                unit = %message.unit_label(),
                "Stage failed: {}",
                e
            );
        }

        self.apply_result(message, result).await
    }

    /// Apply an executor result under a conditional update.
    async fn apply_result(
        &self,
        message: &DispatchMessage,
        result: Result<StageOutput, StageError>,
    ) -> Result<DispatchOutcome, OrchestratorError> {
        let now = Utc::now();
        let timeout = self.config.stage_timeout();
        let retry = &self.config.retry;

        let updated = update_with_retry(
            self.store.as_ref(),
            &message.task_id,
            self.config.max_commit_attempts,
            |task| {
                if let Err(reason) = machine::check_current(task, message) {
                    return Ok::<_, TaskError>(Plan::Skip(Step::Discard(reason)));
                }
                if result.is_err() {
                    if let Err(reason) = machine::check_failure_attempt(task, message) {
                        return Ok(Plan::Skip(Step::Discard(reason)));
                    }
                }

                let step = match &result {
                    Ok(output) => {
                        match machine::apply_output(task, message, output.clone(), now, timeout) {
                            Ok(dispatches) => Step::Applied(dispatches),
                            Err(ApplyError::Rejected(error)) => {
                                Step::Failed(machine::fail_stage(task, message, &error)?)
                            }
                            Err(ApplyError::Transition(e)) => return Err(e),
                        }
                    }
                    Err(StageError::Retryable(error)) => {
                        match machine::apply_retryable(task, message, error, retry, now, timeout)? {
                            RetryStep::Retry(dispatch) => Step::Retry(dispatch),
                            RetryStep::Exhausted(failure) => Step::Failed(failure),
                        }
                    }
                    Err(StageError::Fatal(error)) => {
                        Step::Failed(machine::fail_stage(task, message, error)?)
                    }
                };
                Ok(Plan::Write(step))
            },
        );

        let updated = match updated {
            Ok(updated) => updated,
            Err(TaskError::NotFound(_)) => {
                return Ok(self.discarded(message, DiscardReason::TaskMissing))
            }
            Err(e) => return Err(e.into()),
        };
        let task = updated.task;

        match updated.value {
            Step::Discard(reason) => Ok(self.discarded(message, reason)),
            Step::Applied(dispatches) => {
                debug!(
                    task_id = %task.id,
                    unit = %message.unit_label(),
                    status = %task.status,
                    "Stage result applied"
                );
                if task.status == TaskStatus::Completed {
                    metrics::TASKS_FINISHED.with_label_values(&["completed"]).inc();
                    info!(task_id = %task.id, slides = task.slides.len(), "Task completed");
                } else if !dispatches.is_empty() {
                    info!(task_id = %task.id, status = %task.status, "Task advanced");
                }
                self.enqueue_all(&task, dispatches).await;
                Ok(DispatchOutcome::Applied {
                    status: task.status,
                })
            }
            Step::Retry(dispatch) => {
                warn!(
                    task_id = %task.id,
                    unit = %message.unit_label(),
                    next_attempt = dispatch.attempt,
                    delay_ms = dispatch.delay.as_millis() as u64,
                    "Retrying stage"
                );
                let outcome = DispatchOutcome::Retrying {
                    attempt: dispatch.attempt,
                    delay: dispatch.delay,
                };
                self.enqueue_all(&task, vec![dispatch]).await;
                Ok(outcome)
            }
            Step::Failed(failure) => {
                let kind = task
                    .error
                    .as_ref()
                    .map(|e| e.kind.as_str())
                    .unwrap_or(FailureKind::Stage.as_str());
                metrics::TASKS_FINISHED.with_label_values(&[kind]).inc();
                error!(task_id = %task.id, error = %failure, "Task failed");
                Ok(DispatchOutcome::Failed { message: failure })
            }
        }
    }

    fn discarded(&self, message: &DispatchMessage, reason: DiscardReason) -> DispatchOutcome {
        metrics::DISCARDED_RESULTS
            .with_label_values(&[reason.label()])
            .inc();
        debug!(
            task_id = %message.task_id,
            unit = %message.unit_label(),
            reason = reason.label(),
            "Discarded stage result"
        );
        DispatchOutcome::Discarded(reason)
    }

    async fn enqueue_all(&self, task: &Task, dispatches: Vec<UnitDispatch>) {
        for dispatch in dispatches {
            let message = DispatchMessage::new(
                &task.id,
                task.stage_epoch,
                dispatch.stage,
                dispatch.slide_index,
                dispatch.attempt,
                dispatch.deadline,
            );
            metrics::STAGE_DISPATCHES
                .with_label_values(&[dispatch.stage.as_str()])
                .inc();
            // A lost dispatch is recovered by the watchdog once its deadline passes.
            if let Err(e) = self.queue.enqueue(message, dispatch.delay).await {
                warn!(
                    task_id = %task.id,
                    stage = %dispatch.stage,
                    slide_index = ?dispatch.slide_index,
                    "Failed to enqueue dispatch: {}",
                    e
                );
            }
        }
    }

    // =========================================================================
    // Recovery
    // =========================================================================

    /// Treat every unit past its deadline as a retryable failure. Returns
    /// the number of overdue units found.
    pub async fn check_overdue(&self) -> Result<usize, OrchestratorError> {
        let now = Utc::now();
        let filter = TaskFilter::new()
            .with_statuses(TaskStatus::IN_FLIGHT)
            .with_limit(i64::MAX);
        let tasks = self.store.list(&filter)?;

        let mut overdue = 0;
        for task in tasks {
            let Some(phase) = task.status.active_phase() else {
                continue;
            };
            for (stage, slide_index) in task.phase_units(phase) {
                let Some(unit) = task.unit(stage, slide_index) else {
                    continue;
                };
                let Some(deadline) = unit.deadline.filter(|_| unit.is_overdue(now)) else {
                    continue;
                };

                overdue += 1;
                metrics::OVERDUE_UNITS.inc();
                let message = DispatchMessage::new(
                    &task.id,
                    task.stage_epoch,
                    stage,
                    slide_index,
                    unit.attempts,
                    deadline,
                );
                warn!(
                    task_id = %task.id,
                    unit = %message.unit_label(),
                    deadline = %deadline,
                    "Stage unit missed its deadline"
                );
                let result = self
                    .apply_result(
                        &message,
                        Err(StageError::Retryable(format!(
                            "{} stage missed its deadline",
                            stage
                        ))),
                    )
                    .await;
                match result {
                    Ok(outcome) => debug!(task_id = %task.id, ?outcome, "Overdue unit handled"),
                    Err(e) => {
                        warn!(
                            task_id = %task.id,
                            unit = %message.unit_label(),
                            "Failed to handle overdue unit: {}",
                            e
                        );
                    }
                }
            }
        }
        Ok(overdue)
    }

    /// Handle every dispatch currently visible in the queue, including the
    /// ones enqueued while draining. Returns the number handled.
    ///
    /// Intended for callers that run with the workers disabled.
    pub async fn process_pending(&self) -> Result<usize, OrchestratorError> {
        let mut handled = 0;
        while let Some(message) = self.queue.try_receive() {
            self.handle_dispatch(&message).await?;
            handled += 1;
        }
        Ok(handled)
    }
}
