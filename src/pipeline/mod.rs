//! Post generation pipeline.
//!
//! ```text
//! Orchestrator (run)
//!     ├─► stage 1: caption ∥ image prompts      (text model, concurrently)
//!     ├─► stage 2: fan-out over 9 slots          (settle-all)
//!     │       └─► generate_slot: exists? → cancelled? → generate → decode → upload → insert → count
//!     ├─► recovery sweep over missing slots      (sequential, same generate_slot)
//!     └─► resolve: completed | failed | cancelled
//! ```
//!
//! Every external call runs under a deadline and races the job's cancellation
//! token; a watcher task fires the token when an operator cancels the job.

mod fanout;
mod orchestrator;
pub mod progress;
pub mod reconcile;
mod recovery;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::db::store::{PostStore, StoreError};
use crate::models::job::JobStatus;
use crate::services::ai::{AiError, ImageGenerator, TextGenerator};
use crate::services::generators::GenerationError;
use crate::services::image_codec::ImageDecodeError;
use crate::services::storage::{BlobStore, StorageError};

pub use fanout::{FanOutReport, SlotOutcome};
pub use orchestrator::JobOutcome;

/// Deadlines and polling cadence for a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub text_timeout: Duration,
    pub image_timeout: Duration,
    pub storage_timeout: Duration,
    pub cancel_poll_interval: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            text_timeout: Duration::from_secs(120),
            image_timeout: Duration::from_secs(90),
            storage_timeout: Duration::from_secs(30),
            cancel_poll_interval: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Job {0} not found")]
    JobNotFound(Uuid),

    #[error("Job is {0}, images cannot be generated yet")]
    NotReady(JobStatus),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Generation(#[from] GenerationError),

    #[error("Image generation failed: {0}")]
    Ai(#[from] AiError),

    #[error("{0}")]
    Image(#[from] ImageDecodeError),

    #[error("Blob storage failed: {0}")]
    Storage(#[from] StorageError),

    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: &'static str, after: Duration },

    #[error("Cancelled")]
    Cancelled,
}

/// The pipeline and its collaborators. Cheap to clone.
#[derive(Clone)]
pub struct Pipeline {
    store: Arc<dyn PostStore>,
    text: Arc<dyn TextGenerator>,
    images: Arc<dyn ImageGenerator>,
    blobs: Arc<dyn BlobStore>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn PostStore>,
        text: Arc<dyn TextGenerator>,
        images: Arc<dyn ImageGenerator>,
        blobs: Arc<dyn BlobStore>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            text,
            images,
            blobs,
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    fn tracker(&self) -> progress::ProgressTracker<'_> {
        progress::ProgressTracker::new(self.store.as_ref())
    }

    /// Fires `token` once the job reads as cancelled. Stops when the token fires for any reason.
    fn watch_for_cancellation(&self, job_id: Uuid, token: CancellationToken) {
        let store = Arc::clone(&self.store);
        let interval = self.settings.cancel_poll_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                match store.job_status(job_id).await {
                    Ok(Some(JobStatus::Cancelled)) => {
                        tracing::info!(job_id = %job_id, "Cancellation observed, interrupting in-flight work");
                        token.cancel();
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(job_id = %job_id, error = %e, "Cancellation poll failed");
                    }
                }
            }
        });
    }

    /// Best-effort download of the job's seed image.
    async fn load_reference_image(
        &self,
        job_id: Uuid,
        key: Option<&str>,
        token: &CancellationToken,
    ) -> Result<Option<Vec<u8>>, PipelineError> {
        let Some(key) = key else {
            return Ok(None);
        };
        match bounded(
            token,
            "reference image download",
            self.settings.storage_timeout,
            self.blobs.download(key),
        )
        .await
        {
            Ok(bytes) => Ok(Some(bytes)),
            Err(PipelineError::Cancelled) => Err(PipelineError::Cancelled),
            Err(e) => {
                tracing::warn!(job_id = %job_id, key = %key, error = %e, "Reference image unavailable, generating without it");
                Ok(None)
            }
        }
    }
}

/// Run `fut` under a deadline, giving up early if `token` fires.
pub(crate) async fn bounded<T, E, F>(
    token: &CancellationToken,
    stage: &'static str,
    deadline: Duration,
    fut: F,
) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, E>>,
    PipelineError: From<E>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(PipelineError::Cancelled),
        result = tokio::time::timeout(deadline, fut) => match result {
            Ok(inner) => inner.map_err(PipelineError::from),
            Err(_) => Err(PipelineError::Timeout { stage, after: deadline }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bounded_passes_result_through() {
        let token = CancellationToken::new();
        let value = bounded(&token, "test", Duration::from_secs(1), async {
            Ok::<_, StorageError>(7)
        })
        .await
        .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_bounded_times_out() {
        let token = CancellationToken::new();
        let result = bounded(&token, "slow call", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, StorageError>(())
        })
        .await;
        assert!(matches!(
            result,
            Err(PipelineError::Timeout { stage: "slow call", .. })
        ));
    }

    #[tokio::test]
    async fn test_bounded_observes_cancellation() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });
        let result = bounded(&token, "hung call", Duration::from_secs(5), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, StorageError>(())
        })
        .await;
        assert!(matches!(result, Err(PipelineError::Cancelled)));
    }
}
