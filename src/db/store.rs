//! Storage seams used by the pipeline.
//!
//! The pipeline talks to `JobStore` and `ImageStore` only, so the same
//! orchestration runs against Postgres in production and against
//! [`MemoryStore`](crate::db::memory::MemoryStore) in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::queries;
use crate::models::carousel::{CarouselImage, NewCarouselImage, SlotKey};
use crate::models::job::{
    JobStatus, NewPostJob, PostJob, ProgressStep, ProgressUpdate, StageOneOutput,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Job {0} not found")]
    NotFound(Uuid),
}

/// Durable record of each job's lifecycle and progress.
///
/// Every state-changing method is a guarded write: it leaves terminal jobs
/// untouched and reports whether the write applied.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create_job(&self, new_job: &NewPostJob) -> Result<PostJob, StoreError>;

    async fn get_job(&self, job_id: Uuid) -> Result<Option<PostJob>, StoreError>;

    async fn job_status(&self, job_id: Uuid) -> Result<Option<JobStatus>, StoreError>;

    /// queued/generating_caption -> generating_caption, stamping `started_at` once.
    async fn begin_caption(&self, job_id: Uuid) -> Result<bool, StoreError>;

    /// Persist stage 1 output, move to generating_images and reset the counters.
    async fn save_stage_one(
        &self,
        job_id: Uuid,
        output: &StageOneOutput,
    ) -> Result<bool, StoreError>;

    async fn set_step(&self, job_id: Uuid, step: ProgressStep) -> Result<(), StoreError>;

    async fn complete_job(&self, job_id: Uuid) -> Result<bool, StoreError>;

    async fn fail_job(
        &self,
        job_id: Uuid,
        failed_images: &[i32],
        error: &str,
    ) -> Result<bool, StoreError>;

    async fn cancel_job(&self, job_id: Uuid) -> Result<bool, StoreError>;

    /// Bump the attempt counter, returning the new value.
    async fn record_attempt(&self, job_id: Uuid) -> Result<i32, StoreError>;

    /// Non-terminal jobs not touched since `before`, oldest first.
    async fn stale_jobs(
        &self,
        before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PostJob>, StoreError>;
}

/// Durable record of generated carousel images.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn image_exists(&self, key: SlotKey) -> Result<bool, StoreError>;

    /// Insert the row and count it as one atomic write.
    ///
    /// The count is `images_completed + 1`; it also drops the slot from
    /// `failed_images` and finalizes the job once the carousel is full.
    /// Returns `None`, counting nothing, when the slot already had a row.
    async fn persist_image(
        &self,
        image: &NewCarouselImage,
    ) -> Result<Option<ProgressUpdate>, StoreError>;

    async fn list_images(&self, job_id: Uuid) -> Result<Vec<CarouselImage>, StoreError>;
}

/// Both halves of the pipeline's storage.
pub trait PostStore: JobStore + ImageStore {}

impl<T: JobStore + ImageStore> PostStore for T {}

/// Postgres-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PgStore {
    async fn create_job(&self, new_job: &NewPostJob) -> Result<PostJob, StoreError> {
        queries::create_job(&self.pool, new_job).await
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<PostJob>, StoreError> {
        queries::get_job(&self.pool, job_id).await
    }

    async fn job_status(&self, job_id: Uuid) -> Result<Option<JobStatus>, StoreError> {
        queries::get_job_status(&self.pool, job_id).await
    }

    async fn begin_caption(&self, job_id: Uuid) -> Result<bool, StoreError> {
        Ok(queries::begin_caption(&self.pool, job_id).await?)
    }

    async fn save_stage_one(
        &self,
        job_id: Uuid,
        output: &StageOneOutput,
    ) -> Result<bool, StoreError> {
        queries::save_stage_one(&self.pool, job_id, output).await
    }

    async fn set_step(&self, job_id: Uuid, step: ProgressStep) -> Result<(), StoreError> {
        Ok(queries::set_progress_step(&self.pool, job_id, step).await?)
    }

    async fn complete_job(&self, job_id: Uuid) -> Result<bool, StoreError> {
        Ok(queries::complete_job(&self.pool, job_id).await?)
    }

    async fn fail_job(
        &self,
        job_id: Uuid,
        failed_images: &[i32],
        error: &str,
    ) -> Result<bool, StoreError> {
        Ok(queries::fail_job(&self.pool, job_id, failed_images, error).await?)
    }

    async fn cancel_job(&self, job_id: Uuid) -> Result<bool, StoreError> {
        Ok(queries::cancel_job(&self.pool, job_id).await?)
    }

    async fn record_attempt(&self, job_id: Uuid) -> Result<i32, StoreError> {
        Ok(queries::increment_attempts(&self.pool, job_id).await?)
    }

    async fn stale_jobs(
        &self,
        before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PostJob>, StoreError> {
        queries::get_stale_jobs(&self.pool, before, limit).await
    }
}

#[async_trait]
impl ImageStore for PgStore {
    async fn image_exists(&self, key: SlotKey) -> Result<bool, StoreError> {
        Ok(queries::image_exists(&self.pool, key).await?)
    }

    async fn persist_image(
        &self,
        image: &NewCarouselImage,
    ) -> Result<Option<ProgressUpdate>, StoreError> {
        queries::persist_image(&self.pool, image).await
    }

    async fn list_images(&self, job_id: Uuid) -> Result<Vec<CarouselImage>, StoreError> {
        Ok(queries::list_images(&self.pool, job_id).await?)
    }
}
