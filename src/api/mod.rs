pub mod handlers;

pub use handlers::*;

use crate::service::DetectionCoordinator;
use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;

/// 全部 HTTP 路由
pub fn router(coordinator: Arc<DetectionCoordinator>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/records", post(submit_record))
        .route("/api/records/batch", post(submit_batch))
        .route("/api/records/:id", delete(retract_record))
        .route("/api/reprocess", post(start_reprocess))
        .route("/api/reprocess/:id", get(job_status))
        .route("/api/reprocess/:id/cancel", post(cancel_job))
        .route("/api/reprocess/:id/resume", post(resume_job))
        .route("/api/groups", get(list_groups))
        .route("/api/groups/export", get(export_groups))
        .route("/api/groups/:id", get(get_group))
        .route("/api/groups/:id/audit", get(group_audit))
        .route("/api/groups/:id/merge", post(merge_group))
        .route("/api/groups/:id/ignore", post(ignore_group))
        .with_state(coordinator)
        .layer(ServiceBuilder::new())
}
