use garde::Validate;

use crate::db::store::{JobStore, StoreError};
use crate::models::job::{NewPostJob, PostJob};
use crate::models::post::SubmitPostRequest;
use crate::services::queue::{JobDispatcher, QueueError};

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("Invalid submission: {0}")]
    Invalid(String),

    #[error("Could not record job: {0}")]
    Store(#[from] StoreError),

    #[error("Could not queue job: {0}")]
    Queue(#[from] QueueError),
}

/// Validate a submission, record the job and hand it to the worker pool.
///
/// Nothing is written unless validation passes. If the queue refuses the job,
/// the freshly created row is marked failed so it never lingers as queued.
pub async fn submit_post(
    jobs: &dyn JobStore,
    dispatcher: &dyn JobDispatcher,
    request: SubmitPostRequest,
) -> Result<PostJob, SubmitError> {
    request
        .validate()
        .map_err(|report| SubmitError::Invalid(report.to_string()))?;

    let new_job = NewPostJob {
        concept: request.concept,
        platform: request.platform,
        style: request.style.trim().to_string(),
        voice: request.voice.trim().to_string(),
        source_refs: request.source_refs,
        reference_image_key: request.reference_image_key,
    };

    let job = jobs.create_job(&new_job).await?;

    if let Err(e) = dispatcher.dispatch(job.id).await {
        tracing::error!(job_id = %job.id, error = %e, "Failed to queue post job");
        if let Err(store_err) = jobs
            .fail_job(job.id, &[], &format!("could not be queued: {e}"))
            .await
        {
            tracing::error!(job_id = %job.id, error = %store_err, "Failed to mark unqueued job as failed");
        }
        return Err(e.into());
    }

    metrics::counter!("post_jobs_submitted_total").increment(1);
    tracing::info!(job_id = %job.id, platform = %job.platform, "Post job queued");

    Ok(job)
}
