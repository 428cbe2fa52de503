use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::{edits, handlers, middleware::metrics_middleware, tasks};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        // Health and config
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        .route("/orchestrator/status", get(handlers::orchestrator_status))
        // Tasks
        .route("/tasks", post(tasks::submit_task).get(tasks::list_tasks))
        .route("/tasks/{id}", get(tasks::get_task))
        .route("/tasks/{id}/stages", get(tasks::get_stages))
        .route("/tasks/{id}/result", get(tasks::get_result))
        .route("/tasks/{id}/download", get(tasks::download))
        .route("/tasks/{id}/cancel", post(tasks::cancel_task))
        .route("/tasks/{id}/retry", post(tasks::retry_task))
        // Editing
        .route(
            "/tasks/{id}/lock",
            post(edits::acquire_lock).delete(edits::release_lock),
        )
        .route("/tasks/{id}/slides/{index}", patch(edits::modify_slide))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::get_metrics))
        .with_state(state)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
}
