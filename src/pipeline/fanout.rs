use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::carousel::{ImagePrompt, NewCarouselImage, SlotKey};
use crate::models::job::JobStatus;
use crate::pipeline::{bounded, Pipeline, PipelineError};
use crate::services::ai::ImageRequest;
use crate::services::image_codec::decode_payload;

/// What happened to one slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotOutcome {
    Persisted { url: String, images_completed: i32 },
    AlreadyPresent,
    Cancelled,
}

/// Per-slot tally of a fan-out. Informational only; the persisted rows decide the job.
#[derive(Debug, Default, Clone)]
pub struct FanOutReport {
    pub persisted: Vec<i32>,
    pub already_present: Vec<i32>,
    pub cancelled: Vec<i32>,
    pub failed: Vec<i32>,
}

impl Pipeline {
    /// Generate and persist one slot.
    ///
    /// Safe to call repeatedly for the same key: an existing row short-circuits
    /// before any generation, and a lost insert race is reported as
    /// `AlreadyPresent` without touching the counter. A failed persist leaves
    /// neither a row nor a count behind, so the slot stays eligible for retry.
    pub(crate) async fn generate_slot(
        &self,
        key: SlotKey,
        prompt: &str,
        alt_text: &str,
        reference: Option<&[u8]>,
        token: &CancellationToken,
    ) -> Result<SlotOutcome, PipelineError> {
        if self.store.image_exists(key).await? {
            tracing::debug!(job_id = %key.job_id, slot_index = key.slot_index, "Slot already persisted, skipping");
            return Ok(SlotOutcome::AlreadyPresent);
        }

        if token.is_cancelled()
            || self.store.job_status(key.job_id).await? == Some(JobStatus::Cancelled)
        {
            tracing::debug!(job_id = %key.job_id, slot_index = key.slot_index, "Job cancelled, slot not generated");
            return Ok(SlotOutcome::Cancelled);
        }

        let request = ImageRequest {
            slot_index: key.slot_index,
            prompt: prompt.to_string(),
            reference_image: reference.map(<[u8]>::to_vec),
        };

        let started = std::time::Instant::now();
        let payload = bounded(
            token,
            "image generation",
            self.settings.image_timeout,
            self.images.generate(&request),
        )
        .await?;
        let image = decode_payload(payload)?;

        let storage_key = key.storage_key(image.extension());
        let url = bounded(
            token,
            "image upload",
            self.settings.storage_timeout,
            self.blobs
                .upload(&storage_key, &image.bytes, image.content_type()),
        )
        .await?;

        let persisted = self
            .tracker()
            .persist(&NewCarouselImage {
                key,
                url: url.clone(),
                storage_key,
                prompt: prompt.to_string(),
                alt_text: alt_text.to_string(),
                content_type: image.content_type().to_string(),
            })
            .await?;
        let Some(update) = persisted else {
            return Ok(SlotOutcome::AlreadyPresent);
        };

        tracing::info!(
            job_id = %key.job_id,
            slot_index = key.slot_index,
            width = image.width,
            height = image.height,
            duration_ms = started.elapsed().as_millis() as u64,
            images_completed = update.images_completed,
            "Carousel image persisted"
        );

        Ok(SlotOutcome::Persisted {
            url,
            images_completed: update.images_completed,
        })
    }

    /// Launch every slot at once and wait for all of them to settle.
    pub(crate) async fn fan_out(
        &self,
        job_id: Uuid,
        prompts: &[ImagePrompt],
        reference: Option<&[u8]>,
        token: &CancellationToken,
    ) -> FanOutReport {
        let tasks = prompts.iter().map(|prompt| async move {
            let key = SlotKey::new(job_id, prompt.slot_index);
            let result = self
                .generate_slot(key, &prompt.prompt, &prompt.alt_text, reference, token)
                .await;
            (prompt.slot_index, result)
        });

        let mut report = FanOutReport::default();
        for (slot_index, result) in join_all(tasks).await {
            match result {
                Ok(SlotOutcome::Persisted { .. }) => report.persisted.push(slot_index),
                Ok(SlotOutcome::AlreadyPresent) => report.already_present.push(slot_index),
                Ok(SlotOutcome::Cancelled) | Err(PipelineError::Cancelled) => {
                    report.cancelled.push(slot_index)
                }
                Err(e) => {
                    metrics::counter!("carousel_slot_failures_total").increment(1);
                    tracing::warn!(job_id = %job_id, slot_index, error = %e, "Slot generation failed");
                    report.failed.push(slot_index);
                }
            }
        }

        tracing::info!(
            job_id = %job_id,
            persisted = report.persisted.len(),
            already_present = report.already_present.len(),
            cancelled = report.cancelled.len(),
            failed = ?report.failed,
            "Image fan-out settled"
        );

        report
    }

    /// Single-slot entrypoint for operators. Idempotent per (job, carousel, slot).
    pub async fn regenerate_slot(
        &self,
        key: SlotKey,
        prompt: &str,
        alt_text: &str,
    ) -> Result<SlotOutcome, PipelineError> {
        let job = self
            .store
            .get_job(key.job_id)
            .await?
            .ok_or(PipelineError::JobNotFound(key.job_id))?;

        match job.status {
            JobStatus::Cancelled => return Ok(SlotOutcome::Cancelled),
            JobStatus::Queued | JobStatus::GeneratingCaption => {
                return Err(PipelineError::NotReady(job.status))
            }
            _ => {}
        }

        let token = CancellationToken::new();
        let reference = self
            .load_reference_image(job.id, job.reference_image_key.as_deref(), &token)
            .await?;

        let outcome = self
            .generate_slot(key, prompt, alt_text, reference.as_deref(), &token)
            .await;
        if let Err(e) = &outcome {
            metrics::counter!("carousel_slot_failures_total").increment(1);
            tracing::warn!(job_id = %key.job_id, slot_index = key.slot_index, error = %e, "Slot regeneration failed");
        }
        outcome
    }
}
