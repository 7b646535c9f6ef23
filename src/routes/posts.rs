use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::store::{ImageStore, JobStore};
use crate::models::carousel::SlotKey;
use crate::models::job::JobStatus;
use crate::models::post::{
    CancelResponse, ImageView, JobStatusResponse, RegenerateOutcome, RegenerateSlotRequest,
    RegenerateSlotResponse, SubmitPostRequest, SubmitPostResponse,
};
use crate::pipeline::SlotOutcome;
use crate::routes::error::ApiError;
use crate::services::submission::submit_post;

/// POST /api/v1/posts: queue a new post for generation.
pub async fn submit(
    State(state): State<AppState>,
    Json(request): Json<SubmitPostRequest>,
) -> Result<(StatusCode, Json<SubmitPostResponse>), ApiError> {
    let job = submit_post(state.store.as_ref(), state.queue.as_ref(), request).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitPostResponse {
            job_id: job.id,
            status: job.status,
            message: "Post queued for generation".to_string(),
        }),
    ))
}

/// GET /api/v1/posts/{job_id}: current status, progress and whatever has been generated so far.
pub async fn status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let job = state
        .store
        .get_job(job_id)
        .await?
        .ok_or(ApiError::NotFound(job_id))?;
    let images = state.store.list_images(job_id).await?;

    Ok(Json(JobStatusResponse {
        job_id: job.id,
        status: job.status,
        progress: job.progress,
        caption: job.caption,
        hashtags: job.hashtags,
        images: images.into_iter().map(ImageView::from).collect(),
    }))
}

/// POST /api/v1/posts/{job_id}/cancel
pub async fn cancel(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<CancelResponse>, ApiError> {
    if state.store.cancel_job(job_id).await? {
        tracing::info!(job_id = %job_id, "Post job cancellation requested");
        return Ok(Json(CancelResponse {
            job_id,
            status: JobStatus::Cancelled,
        }));
    }

    match state.store.job_status(job_id).await? {
        None => Err(ApiError::NotFound(job_id)),
        Some(status) => Err(ApiError::Conflict(format!(
            "Job is already {status} and cannot be cancelled"
        ))),
    }
}

/// POST /api/v1/posts/{job_id}/slots: generate one slot on demand. Idempotent.
pub async fn regenerate(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    Json(request): Json<RegenerateSlotRequest>,
) -> Result<Json<RegenerateSlotResponse>, ApiError> {
    request
        .validate()
        .map_err(|report| ApiError::Unprocessable(report.to_string()))?;

    let key = SlotKey {
        job_id,
        carousel_index: request.carousel_index,
        slot_index: request.slot_index,
    };
    let outcome = state
        .pipeline
        .regenerate_slot(key, request.prompt.trim(), request.alt_text.trim())
        .await?;

    let (outcome, url) = match outcome {
        SlotOutcome::Persisted { url, .. } => (RegenerateOutcome::Persisted, Some(url)),
        SlotOutcome::AlreadyPresent => {
            let url = state
                .store
                .list_images(job_id)
                .await?
                .into_iter()
                .find(|img| img.key() == key)
                .map(|img| img.url);
            (RegenerateOutcome::AlreadyPresent, url)
        }
        SlotOutcome::Cancelled => {
            return Err(ApiError::Conflict("Job was cancelled".to_string()));
        }
    };

    Ok(Json(RegenerateSlotResponse {
        job_id,
        carousel_index: key.carousel_index,
        slot_index: key.slot_index,
        outcome,
        url,
    }))
}
