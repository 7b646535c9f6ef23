//! Rescue for jobs whose worker disappeared.
//!
//! A job that is still active but has not been written to for `stale_after`
//! is put back on the queue. Jobs that keep going stale are failed with
//! whatever slots are missing. A job whose payload is still waiting in the
//! queue is only backlogged, not abandoned, and is left alone.

use std::time::Duration;

use chrono::Utc;

use crate::db::store::{PostStore, StoreError};
use crate::models::carousel::{missing_slots, DEFAULT_CAROUSEL_INDEX};
use crate::services::queue::{JobDispatcher, QueueError};

#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    pub stale_after: Duration,
    pub max_attempts: i32,
    pub batch_size: i64,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(1800),
            max_attempts: 3,
            batch_size: 100,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub requeued: Vec<uuid::Uuid>,
    pub abandoned: Vec<uuid::Uuid>,
    /// Stale but still pending in the queue.
    pub waiting: Vec<uuid::Uuid>,
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Invalid stale threshold: {0}")]
    Threshold(String),
}

/// One reconciliation pass over stale active jobs.
pub async fn reconcile_stale_jobs(
    store: &dyn PostStore,
    dispatcher: &dyn JobDispatcher,
    settings: &ReconcileSettings,
) -> Result<ReconcileReport, ReconcileError> {
    let stale_after = chrono::Duration::from_std(settings.stale_after)
        .map_err(|e| ReconcileError::Threshold(e.to_string()))?;
    let cutoff = Utc::now() - stale_after;

    let stale = store.stale_jobs(cutoff, settings.batch_size).await?;
    let mut report = ReconcileReport::default();

    for job in stale {
        if dispatcher.is_pending(job.id).await? {
            tracing::debug!(job_id = %job.id, status = %job.status, "Stale job still waiting in queue");
            report.waiting.push(job.id);
            continue;
        }

        let attempts = store.record_attempt(job.id).await?;

        if attempts > settings.max_attempts {
            let images = store.list_images(job.id).await?;
            let missing = missing_slots(&images, DEFAULT_CAROUSEL_INDEX);
            let error = format!("abandoned after {} attempts", attempts - 1);
            if store.fail_job(job.id, &missing, &error).await? {
                tracing::warn!(job_id = %job.id, status = %job.status, missing = ?missing, "Abandoned stale post job");
                metrics::counter!("post_jobs_failed_total").increment(1);
                report.abandoned.push(job.id);
            }
            dispatcher.release(job.id).await?;
            continue;
        }

        dispatcher.release(job.id).await?;
        dispatcher.dispatch(job.id).await?;
        tracing::info!(job_id = %job.id, status = %job.status, attempts, "Requeued stale post job");
        report.requeued.push(job.id);
    }

    if !report.requeued.is_empty() || !report.abandoned.is_empty() {
        tracing::info!(
            requeued = report.requeued.len(),
            abandoned = report.abandoned.len(),
            waiting = report.waiting.len(),
            "Reconciliation pass finished"
        );
    }

    Ok(report)
}
