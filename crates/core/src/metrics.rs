//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Task submission and terminal outcomes
//! - Stage dispatches, results and discards
//! - Edit locks and slide edits

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Tasks
// =============================================================================

/// Tasks accepted for generation.
pub static TASKS_SUBMITTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("deckforge_tasks_submitted_total", "Total tasks submitted").unwrap()
});

/// Submissions rejected by validation.
pub static SUBMISSIONS_REJECTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "deckforge_submissions_rejected_total",
        "Total submissions rejected by validation",
    )
    .unwrap()
});

/// Tasks that reached a terminal status, by outcome.
pub static TASKS_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("deckforge_tasks_finished_total", "Total tasks finished"),
        &["outcome"], // "completed", "stage", "retries_exhausted", "cancelled", "edit"
    )
    .unwrap()
});

// =============================================================================
// Stages
// =============================================================================

/// Stage dispatches enqueued.
pub static STAGE_DISPATCHES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("deckforge_stage_dispatches_total", "Total stage dispatches enqueued"),
        &["stage"],
    )
    .unwrap()
});

/// Stage execution results.
pub static STAGE_RESULTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("deckforge_stage_results_total", "Total stage execution results"),
        &["stage", "result"], // "success", "retryable", "fatal"
    )
    .unwrap()
});

/// Stage execution duration in seconds.
pub static STAGE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "deckforge_stage_duration_seconds",
            "Duration of a single stage execution",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0]),
        &["stage"],
    )
    .unwrap()
});

/// Results discarded as stale or redundant.
pub static DISCARDED_RESULTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "deckforge_discarded_results_total",
            "Total stage results discarded on apply",
        ),
        &["reason"],
    )
    .unwrap()
});

/// Units found past their deadline by the watchdog.
pub static OVERDUE_UNITS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "deckforge_overdue_units_total",
        "Total stage units that missed their deadline",
    )
    .unwrap()
});

// =============================================================================
// Editing
// =============================================================================

/// Lock acquisitions by result.
pub static LOCK_ACQUISITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("deckforge_lock_acquisitions_total", "Total edit lock requests"),
        &["result"], // "granted", "unavailable"
    )
    .unwrap()
});

/// Slide edits by result.
pub static SLIDE_EDITS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("deckforge_slide_edits_total", "Total slide edit attempts"),
        &["result"], // "applied", "conflict", "rejected"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Tasks
        Box::new(TASKS_SUBMITTED.clone()),
        Box::new(SUBMISSIONS_REJECTED.clone()),
        Box::new(TASKS_FINISHED.clone()),
        // Stages
        Box::new(STAGE_DISPATCHES.clone()),
        Box::new(STAGE_RESULTS.clone()),
        Box::new(STAGE_DURATION.clone()),
        Box::new(DISCARDED_RESULTS.clone()),
        Box::new(OVERDUE_UNITS.clone()),
        // Editing
        Box::new(LOCK_ACQUISITIONS.clone()),
        Box::new(SLIDE_EDITS.clone()),
    ]
}
