//! Admin API handlers for operating the pipeline by hand.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use crate::app::{AppState, JobRun};
use crate::domain::AppError;

/// Result of a manual job trigger
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct JobTriggerResponse {
    /// The job that was triggered
    #[schema(example = "simulate")]
    pub job: String,
    /// `completed`, `failed` or `skipped` when a run was already in progress
    #[schema(example = "completed")]
    pub result: String,
}

impl JobTriggerResponse {
    fn new(job: String, run: JobRun) -> Self {
        let result = match run {
            JobRun::Completed => "completed",
            JobRun::Failed => "failed",
            JobRun::Skipped => "skipped",
        };
        Self {
            job,
            result: result.to_string(),
        }
    }
}

/// Archive a queued interaction
///
/// POST /admin/interactions/{id}/archive
#[utoipa::path(
    post,
    path = "/admin/interactions/{id}/archive",
    tag = "admin",
    params(
        ("id" = i64, Path, description = "Pending interaction ID")
    ),
    responses(
        (status = 204, description = "Interaction archived"),
        (status = 404, description = "Interaction not found", body = crate::domain::ErrorResponse),
        (status = 409, description = "Interaction is locked by a worker", body = crate::domain::ErrorResponse),
    )
)]
pub async fn archive_interaction_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    state.service.archive_interaction(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Run a registered job now
///
/// POST /admin/jobs/{name}/trigger
#[utoipa::path(
    post,
    path = "/admin/jobs/{name}/trigger",
    tag = "admin",
    params(
        ("name" = String, Path, description = "Job name: simulate, execute or retry")
    ),
    responses(
        (status = 200, description = "Job ran or was skipped", body = JobTriggerResponse),
        (status = 404, description = "Unknown job", body = crate::domain::ErrorResponse),
        (status = 501, description = "Jobs are disabled", body = crate::domain::ErrorResponse),
    )
)]
pub async fn trigger_job_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<JobTriggerResponse>, AppError> {
    let run = state.service.trigger_job(&name).await?;
    info!(job = %name, result = ?run, "Job triggered via admin API");
    Ok(Json(JobTriggerResponse::new(name, run)))
}
