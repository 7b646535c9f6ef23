use std::time::Instant;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::carousel::{missing_slots, DEFAULT_CAROUSEL_INDEX};
use crate::models::job::{JobStatus, PostJob, ProgressStep, StageOneOutput};
use crate::pipeline::{bounded, Pipeline, PipelineError};
use crate::services::generators::{generate_caption, generate_image_prompts};
use crate::services::prompts::PromptContext;

/// How a run ended. Everything that matters is also persisted on the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// Some slots were still missing after the recovery sweep.
    Failed { missing: Vec<i32> },
    StageOneFailed { error: String },
    Cancelled,
    /// The job was already terminal (or moved there under us).
    Skipped(JobStatus),
    NotFound,
    /// The run stopped without resolving the job (store unreachable, worker
    /// shutting down). The job stays active for reconciliation.
    Interrupted { error: String },
}

impl Pipeline {
    /// Drive a job from its current state to a terminal one.
    ///
    /// Never returns an error: every failure is either recorded on the job or,
    /// when the store itself is unreachable, reported as `Interrupted`.
    pub async fn run(&self, job_id: Uuid, parent: &CancellationToken) -> JobOutcome {
        let started = Instant::now();
        let token = parent.child_token();
        // Stops the watcher when the run ends.
        let _stop_watcher = token.clone().drop_guard();
        self.watch_for_cancellation(job_id, token.clone());

        let outcome = match self.drive(job_id, &token).await {
            Ok(outcome) => outcome,
            Err(PipelineError::Cancelled) => self.resolve_interruption(job_id).await,
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Pipeline run interrupted");
                JobOutcome::Interrupted {
                    error: e.to_string(),
                }
            }
        };

        let elapsed = started.elapsed();
        match &outcome {
            JobOutcome::Completed => {
                metrics::counter!("post_jobs_completed_total").increment(1);
                metrics::histogram!("post_generation_seconds").record(elapsed.as_secs_f64());
                tracing::info!(job_id = %job_id, duration_ms = elapsed.as_millis() as u64, "Post job completed");
            }
            JobOutcome::Failed { missing } => {
                metrics::counter!("post_jobs_failed_total").increment(1);
                tracing::warn!(job_id = %job_id, missing = ?missing, "Post job failed with missing slots");
            }
            JobOutcome::StageOneFailed { error } => {
                metrics::counter!("post_jobs_failed_total").increment(1);
                tracing::error!(job_id = %job_id, error = %error, "Post job failed in caption stage");
            }
            JobOutcome::Cancelled => {
                metrics::counter!("post_jobs_cancelled_total").increment(1);
                tracing::info!(job_id = %job_id, "Post job cancelled");
            }
            JobOutcome::Skipped(status) => {
                tracing::info!(job_id = %job_id, status = %status, "Post job already resolved, nothing to do");
            }
            JobOutcome::NotFound => {
                tracing::warn!(job_id = %job_id, "Post job not found");
            }
            JobOutcome::Interrupted { .. } => {}
        }

        outcome
    }

    async fn drive(&self, job_id: Uuid, token: &CancellationToken) -> Result<JobOutcome, PipelineError> {
        let Some(job) = self.store.get_job(job_id).await? else {
            return Ok(JobOutcome::NotFound);
        };
        match job.status {
            JobStatus::Cancelled => return Ok(JobOutcome::Cancelled),
            JobStatus::Completed | JobStatus::Failed => return Ok(JobOutcome::Skipped(job.status)),
            _ => {}
        }

        let job = if job.has_stage_one_output() {
            tracing::info!(job_id = %job_id, "Stage 1 output present, resuming at image generation");
            job
        } else {
            match self.run_stage_one(&job, token).await {
                Ok(Some(job)) => job,
                Ok(None) => return self.status_outcome(job_id).await,
                Err(e @ (PipelineError::Cancelled | PipelineError::Store(_))) => return Err(e),
                Err(e) => {
                    let error = e.to_string();
                    if !self.store.fail_job(job_id, &[], &error).await? {
                        return self.status_outcome(job_id).await;
                    }
                    return Ok(JobOutcome::StageOneFailed { error });
                }
            }
        };

        let prompts = job.image_prompts.clone().unwrap_or_default();
        let reference = self
            .load_reference_image(job_id, job.reference_image_key.as_deref(), token)
            .await?;

        self.fan_out(job_id, &prompts, reference.as_deref(), token).await;
        if token.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let images = self.store.list_images(job_id).await?;
        let missing = missing_slots(&images, DEFAULT_CAROUSEL_INDEX);
        if !missing.is_empty() {
            tracing::info!(job_id = %job_id, missing = ?missing, "Running recovery sweep");
            self.store.set_step(job_id, ProgressStep::RecoveringImages).await?;
            let recovered = self
                .recovery_sweep(job_id, &missing, &prompts, reference.as_deref(), token)
                .await;
            tracing::info!(job_id = %job_id, recovered, attempted = missing.len(), "Recovery sweep finished");
            if token.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
        }

        self.resolve(job_id).await
    }

    /// Caption and image prompts, concurrently. `None` when the job left the
    /// caption stage under us (cancelled or otherwise resolved).
    async fn run_stage_one(
        &self,
        job: &PostJob,
        token: &CancellationToken,
    ) -> Result<Option<PostJob>, PipelineError> {
        if !self.store.begin_caption(job.id).await? {
            return Ok(None);
        }
        tracing::info!(job_id = %job.id, "Generating caption and image prompts");

        let ctx = PromptContext::from(job);
        let (draft, image_prompts) = tokio::try_join!(
            bounded(
                token,
                "caption generation",
                self.settings.text_timeout,
                generate_caption(self.text.as_ref(), &ctx),
            ),
            bounded(
                token,
                "image prompt generation",
                self.settings.text_timeout,
                generate_image_prompts(self.text.as_ref(), &ctx),
            ),
        )?;

        let output = StageOneOutput {
            caption: draft.caption,
            hashtags: draft.hashtags,
            image_prompts,
        };
        if !self.store.save_stage_one(job.id, &output).await? {
            return Ok(None);
        }
        tracing::info!(job_id = %job.id, hashtags = output.hashtags.len(), "Caption stored, generating images");

        Ok(self.store.get_job(job.id).await?)
    }

    /// Final, authoritative resolution from the persisted rows.
    async fn resolve(&self, job_id: Uuid) -> Result<JobOutcome, PipelineError> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or(PipelineError::JobNotFound(job_id))?;
        if job.status == JobStatus::Cancelled {
            return Ok(JobOutcome::Cancelled);
        }

        let images = self.store.list_images(job_id).await?;
        let missing = missing_slots(&images, DEFAULT_CAROUSEL_INDEX);
        if images.len() as i32 != job.progress.images_completed {
            tracing::error!(
                job_id = %job_id,
                rows = images.len(),
                images_completed = job.progress.images_completed,
                "Progress counter disagrees with persisted images"
            );
        }

        if missing.is_empty() {
            if self.store.complete_job(job_id).await? {
                return Ok(JobOutcome::Completed);
            }
            let error = format!(
                "all slots persisted but progress shows {}/{}",
                job.progress.images_completed, job.progress.images_total
            );
            return if self.store.fail_job(job_id, &[], &error).await? {
                Ok(JobOutcome::Failed { missing })
            } else {
                self.status_outcome(job_id).await
            };
        }

        let error = format!("{} of {} images could not be generated", missing.len(), job.progress.images_total);
        if self.store.fail_job(job_id, &missing, &error).await? {
            Ok(JobOutcome::Failed { missing })
        } else {
            self.status_outcome(job_id).await
        }
    }

    /// Outcome for a job whose guarded write was refused.
    async fn status_outcome(&self, job_id: Uuid) -> Result<JobOutcome, PipelineError> {
        Ok(match self.store.job_status(job_id).await? {
            None => JobOutcome::NotFound,
            Some(JobStatus::Cancelled) => JobOutcome::Cancelled,
            Some(JobStatus::Completed) => JobOutcome::Completed,
            Some(status) => JobOutcome::Skipped(status),
        })
    }

    /// The token fired: either an operator cancelled the job or the worker is stopping.
    async fn resolve_interruption(&self, job_id: Uuid) -> JobOutcome {
        match self.store.job_status(job_id).await {
            Ok(Some(JobStatus::Cancelled)) => JobOutcome::Cancelled,
            Ok(_) => JobOutcome::Interrupted {
                error: "run cancelled before the job was resolved".to_string(),
            },
            Err(e) => JobOutcome::Interrupted {
                error: e.to_string(),
            },
        }
    }
}
