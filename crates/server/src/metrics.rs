//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the deckforge server:
//! - HTTP request metrics (latency, counts, in flight)
//! - Task counts by status and orchestrator state (collected dynamically)
//!
//! Pipeline counters live in `deckforge_core::metrics` and are registered
//! here so a single `/metrics` scrape covers both.

use deckforge_core::TaskStatus;
use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use tracing::warn;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "deckforge_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("deckforge_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "deckforge_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// Task Metrics (collected dynamically)
// =============================================================================

/// Tasks by current status.
pub static TASKS_BY_STATUS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("deckforge_tasks_by_status", "Current task count by status"),
        &["status"],
    )
    .unwrap()
});

// =============================================================================
// Orchestrator Metrics (collected dynamically)
// =============================================================================

/// Orchestrator running state (1 = running, 0 = stopped).
pub static ORCHESTRATOR_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "deckforge_orchestrator_running",
        "Whether the orchestrator is running (1) or stopped (0)",
    )
    .unwrap()
});

/// Dispatches waiting in the queue.
pub static QUEUED_DISPATCHES: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "deckforge_queued_dispatches",
        "Number of stage dispatches waiting to be handled",
    )
    .unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();

    // Tasks
    registry
        .register(Box::new(TASKS_BY_STATUS.clone()))
        .unwrap();

    // Orchestrator
    registry
        .register(Box::new(ORCHESTRATOR_RUNNING.clone()))
        .unwrap();
    registry
        .register(Box::new(QUEUED_DISPATCHES.clone()))
        .unwrap();

    // Core metrics (submissions, stages, edits)
    for metric in deckforge_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Collect dynamic metrics from current application state.
///
/// Called before encoding so the gauges reflect the store at scrape time.
pub fn collect_dynamic_metrics(state: &crate::state::AppState) {
    let status = match state.orchestrator().status() {
        Ok(status) => status,
        Err(e) => {
            warn!("Failed to collect orchestrator status: {}", e);
            return;
        }
    };

    ORCHESTRATOR_RUNNING.set(if status.running { 1 } else { 0 });
    QUEUED_DISPATCHES.set(status.queued_dispatches as i64);

    for task_status in TaskStatus::ALL {
        let label = task_status.as_str();
        let count = status.tasks_by_status.get(label).copied().unwrap_or(0);
        TASKS_BY_STATUS.with_label_values(&[label]).set(count);
    }
}

/// Normalize a path for metric labels (replace IDs with placeholders).
pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if is_uuid(segment) || is_numeric(segment) {
                "{id}"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn is_numeric(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

fn is_uuid(segment: &str) -> bool {
    const GROUPS: [usize; 5] = [8, 4, 4, 4, 12];

    let parts: Vec<&str> = segment.split('-').collect();
    parts.len() == GROUPS.len()
        && parts
            .iter()
            .zip(GROUPS)
            .all(|(part, len)| part.len() == len && part.bytes().all(|b| b.is_ascii_hexdigit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_uuid() {
        let path = "/api/v1/tasks/550e8400-e29b-41d4-a716-446655440000";
        assert_eq!(normalize_path(path), "/api/v1/tasks/{id}");
    }

    #[test]
    fn test_normalize_path_numeric_middle() {
        let path = "/api/v1/tasks/550e8400-e29b-41d4-a716-446655440000/slides/2";
        assert_eq!(normalize_path(path), "/api/v1/tasks/{id}/slides/{id}");
    }

    #[test]
    fn test_normalize_path_no_ids() {
        assert_eq!(normalize_path("/api/v1/health"), "/api/v1/health");
        assert_eq!(normalize_path("/api/v1"), "/api/v1");
    }

    #[test]
    fn test_normalize_path_keeps_lookalikes() {
        let path = "/api/v1/tasks/not-a-uuid-at-all";
        assert_eq!(normalize_path(path), path);
    }

    #[test]
    fn test_encode_metrics_returns_prometheus_format() {
        HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/test", "200"])
            .inc();

        let output = encode_metrics();
        assert!(output.contains("deckforge_http_requests_total"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }

    #[test]
    fn test_registry_contains_all_metrics() {
        // Prometheus only outputs metrics that have been touched
        HTTP_REQUEST_DURATION
            .with_label_values(&["GET", "/test", "200"])
            .observe(0.1);
        HTTP_REQUESTS_IN_FLIGHT.set(0);
        TASKS_BY_STATUS.with_label_values(&["COMPLETED"]).set(0);
        ORCHESTRATOR_RUNNING.set(0);
        QUEUED_DISPATCHES.set(0);
        deckforge_core::metrics::TASKS_SUBMITTED.inc();

        let output = encode_metrics();

        assert!(output.contains("deckforge_http_request_duration_seconds"));
        assert!(output.contains("deckforge_http_requests_in_flight"));
        assert!(output.contains("deckforge_tasks_by_status"));
        assert!(output.contains("deckforge_orchestrator_running"));
        assert!(output.contains("deckforge_queued_dispatches"));
        assert!(output.contains("deckforge_tasks_submitted_total"));
    }
}
