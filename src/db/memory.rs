//! In-process store with the same guarded-write semantics as the Postgres queries.
//!
//! Each method runs inside one critical section, which makes persisting an
//! image and counting it atomic in the same way the SQL transaction is.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::store::{ImageStore, JobStore, StoreError};
use crate::models::carousel::{CarouselImage, NewCarouselImage, SlotKey, CAROUSEL_SIZE};
use crate::models::job::{
    JobProgress, JobStatus, NewPostJob, PostJob, ProgressStep, ProgressUpdate, StageOneOutput,
};

#[derive(Default)]
struct Inner {
    jobs: HashMap<Uuid, PostJob>,
    images: Vec<CarouselImage>,
    /// Remaining injected `persist_image` failures, by slot index.
    persist_faults: HashMap<i32, u32>,
}

impl Inner {
    fn insert_image(&mut self, image: &NewCarouselImage) -> bool {
        if self.images.iter().any(|img| img.key() == image.key) {
            return false;
        }
        self.images.push(CarouselImage {
            id: Uuid::new_v4(),
            job_id: image.key.job_id,
            carousel_index: image.key.carousel_index,
            slot_index: image.key.slot_index,
            url: image.url.clone(),
            storage_key: image.storage_key.clone(),
            prompt: image.prompt.clone(),
            alt_text: image.alt_text.clone(),
            content_type: image.content_type.clone(),
            created_at: Utc::now(),
        });
        true
    }

    fn count_image(&mut self, job_id: Uuid, slot_index: i32) -> Result<ProgressUpdate, StoreError> {
        let job = self.jobs.get_mut(&job_id).ok_or(StoreError::NotFound(job_id))?;
        let now = Utc::now();

        let finalize = job.progress.images_completed + 1 >= job.progress.images_total
            && matches!(job.status, JobStatus::GeneratingImages | JobStatus::Failed);

        job.progress.images_completed += 1;
        job.progress.failed_images.retain(|slot| *slot != slot_index);
        if finalize {
            job.status = JobStatus::Completed;
            job.progress.step = ProgressStep::Completed;
            job.progress.completed_at = Some(now);
            job.progress.failed_at = None;
            job.progress.last_error = None;
        }
        job.updated_at = now;

        Ok(ProgressUpdate {
            images_completed: job.progress.images_completed,
            images_total: job.progress.images_total,
            status: job.status,
        })
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicked test thread must not wedge every other caller.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of image rows for a job.
    pub fn image_count(&self, job_id: Uuid) -> usize {
        self.lock().images.iter().filter(|img| img.job_id == job_id).count()
    }

    pub fn job_ids(&self) -> Vec<Uuid> {
        self.lock().jobs.keys().copied().collect()
    }

    /// Overwrite a job's status directly, bypassing the guards (simulates operator writes).
    pub fn force_status(&self, job_id: Uuid, status: JobStatus) {
        if let Some(job) = self.lock().jobs.get_mut(&job_id) {
            job.status = status;
        }
    }

    /// Make the next `times` persists of `slot_index` fail before writing anything,
    /// the way a rolled-back transaction would.
    pub fn fail_persist(&self, slot_index: i32, times: u32) {
        self.lock().persist_faults.insert(slot_index, times);
    }

    /// Backdate a job's `updated_at` (simulates a worker that died mid-run).
    pub fn backdate(&self, job_id: Uuid, updated_at: DateTime<Utc>) {
        if let Some(job) = self.lock().jobs.get_mut(&job_id) {
            job.updated_at = updated_at;
        }
    }
}

fn is_active(status: JobStatus) -> bool {
    !status.is_terminal()
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn create_job(&self, new_job: &NewPostJob) -> Result<PostJob, StoreError> {
        let now = Utc::now();
        let job = PostJob {
            id: Uuid::new_v4(),
            status: JobStatus::Queued,
            concept: new_job.concept.clone(),
            platform: new_job.platform,
            style: new_job.style.clone(),
            voice: new_job.voice.clone(),
            source_refs: new_job.source_refs.clone(),
            reference_image_key: new_job.reference_image_key.clone(),
            caption: None,
            hashtags: None,
            image_prompts: None,
            progress: JobProgress::default(),
            attempts: 0,
            created_at: now,
            updated_at: now,
        };
        self.lock().jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<PostJob>, StoreError> {
        Ok(self.lock().jobs.get(&job_id).cloned())
    }

    async fn job_status(&self, job_id: Uuid) -> Result<Option<JobStatus>, StoreError> {
        Ok(self.lock().jobs.get(&job_id).map(|job| job.status))
    }

    async fn begin_caption(&self, job_id: Uuid) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        let Some(job) = inner.jobs.get_mut(&job_id) else {
            return Ok(false);
        };
        if !matches!(job.status, JobStatus::Queued | JobStatus::GeneratingCaption) {
            return Ok(false);
        }
        let now = Utc::now();
        job.status = JobStatus::GeneratingCaption;
        job.progress.step = ProgressStep::GeneratingCaption;
        job.progress.started_at.get_or_insert(now);
        job.progress.last_error = None;
        job.updated_at = now;
        Ok(true)
    }

    async fn save_stage_one(
        &self,
        job_id: Uuid,
        output: &StageOneOutput,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        let Some(job) = inner.jobs.get_mut(&job_id) else {
            return Ok(false);
        };
        if job.status != JobStatus::GeneratingCaption {
            return Ok(false);
        }
        job.caption = Some(output.caption.clone());
        job.hashtags = Some(output.hashtags.clone());
        job.image_prompts = Some(output.image_prompts.clone());
        job.status = JobStatus::GeneratingImages;
        job.progress.step = ProgressStep::GeneratingImages;
        job.progress.images_total = CAROUSEL_SIZE;
        job.progress.images_completed = 0;
        job.progress.failed_images.clear();
        job.updated_at = Utc::now();
        Ok(true)
    }

    async fn set_step(&self, job_id: Uuid, step: ProgressStep) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if let Some(job) = inner.jobs.get_mut(&job_id) {
            if is_active(job.status) {
                job.progress.step = step;
                job.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn complete_job(&self, job_id: Uuid) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        let Some(job) = inner.jobs.get_mut(&job_id) else {
            return Ok(false);
        };
        if !matches!(job.status, JobStatus::GeneratingImages | JobStatus::Completed)
            || job.progress.images_completed < job.progress.images_total
        {
            return Ok(false);
        }
        let now = Utc::now();
        job.status = JobStatus::Completed;
        job.progress.step = ProgressStep::Completed;
        job.progress.completed_at.get_or_insert(now);
        job.progress.failed_images.clear();
        job.progress.failed_at = None;
        job.progress.last_error = None;
        job.updated_at = now;
        Ok(true)
    }

    async fn fail_job(
        &self,
        job_id: Uuid,
        failed_images: &[i32],
        error: &str,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        let Some(job) = inner.jobs.get_mut(&job_id) else {
            return Ok(false);
        };
        if !is_active(job.status) {
            return Ok(false);
        }
        let now = Utc::now();
        job.status = JobStatus::Failed;
        job.progress.step = ProgressStep::Failed;
        job.progress.failed_images = failed_images.to_vec();
        job.progress.last_error = Some(error.to_string());
        job.progress.failed_at = Some(now);
        job.updated_at = now;
        Ok(true)
    }

    async fn cancel_job(&self, job_id: Uuid) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        let Some(job) = inner.jobs.get_mut(&job_id) else {
            return Ok(false);
        };
        if !is_active(job.status) {
            return Ok(false);
        }
        job.status = JobStatus::Cancelled;
        job.progress.step = ProgressStep::Cancelled;
        job.updated_at = Utc::now();
        Ok(true)
    }

    async fn record_attempt(&self, job_id: Uuid) -> Result<i32, StoreError> {
        let mut inner = self.lock();
        let job = inner.jobs.get_mut(&job_id).ok_or(StoreError::NotFound(job_id))?;
        job.attempts += 1;
        job.updated_at = Utc::now();
        Ok(job.attempts)
    }

    async fn stale_jobs(
        &self,
        before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PostJob>, StoreError> {
        let inner = self.lock();
        let mut stale: Vec<PostJob> = inner
            .jobs
            .values()
            .filter(|job| is_active(job.status) && job.updated_at < before)
            .cloned()
            .collect();
        stale.sort_by_key(|job| job.updated_at);
        stale.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(stale)
    }
}

#[async_trait]
impl ImageStore for MemoryStore {
    async fn image_exists(&self, key: SlotKey) -> Result<bool, StoreError> {
        Ok(self.lock().images.iter().any(|img| img.key() == key))
    }

    async fn persist_image(
        &self,
        image: &NewCarouselImage,
    ) -> Result<Option<ProgressUpdate>, StoreError> {
        let mut inner = self.lock();
        if let Some(remaining) = inner.persist_faults.get_mut(&image.key.slot_index) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
            }
        }
        if !inner.jobs.contains_key(&image.key.job_id) {
            return Err(StoreError::NotFound(image.key.job_id));
        }
        if !inner.insert_image(image) {
            return Ok(None);
        }
        inner.count_image(image.key.job_id, image.key.slot_index).map(Some)
    }

    async fn list_images(&self, job_id: Uuid) -> Result<Vec<CarouselImage>, StoreError> {
        let mut images: Vec<CarouselImage> = self
            .lock()
            .images
            .iter()
            .filter(|img| img.job_id == job_id)
            .cloned()
            .collect();
        images.sort_by_key(|img| (img.carousel_index, img.slot_index));
        Ok(images)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::post::{Concept, Platform, SourceKind, SourceRef};
    use std::sync::Arc;

    fn new_job() -> NewPostJob {
        NewPostJob {
            concept: Concept {
                title: "Title".to_string(),
                angle: None,
                target_audience: None,
                key_messages: vec![],
                tone: None,
                call_to_action: None,
            },
            platform: Platform::Instagram,
            style: "style".to_string(),
            voice: "voice".to_string(),
            source_refs: vec![SourceRef {
                kind: SourceKind::Blog,
                id: None,
                title: "Post".to_string(),
                content: "Body".to_string(),
            }],
            reference_image_key: None,
        }
    }

    fn stage_one() -> StageOneOutput {
        StageOneOutput {
            caption: "caption".to_string(),
            hashtags: vec!["#tag".to_string()],
            image_prompts: vec![],
        }
    }

    #[test]
    fn test_guarded_writes_skip_terminal_jobs() {
        tokio_test::block_on(async {
            let store = MemoryStore::new();
            let job = store.create_job(&new_job()).await.unwrap();

            assert!(store.cancel_job(job.id).await.unwrap());
            assert!(!store.begin_caption(job.id).await.unwrap());
            assert!(!store.fail_job(job.id, &[1], "boom").await.unwrap());
            assert!(!store.cancel_job(job.id).await.unwrap());
            assert_eq!(
                store.job_status(job.id).await.unwrap(),
                Some(JobStatus::Cancelled)
            );
        });
    }

    #[test]
    fn test_complete_requires_full_carousel() {
        tokio_test::block_on(async {
            let store = MemoryStore::new();
            let job = store.create_job(&new_job()).await.unwrap();
            store.begin_caption(job.id).await.unwrap();
            store.save_stage_one(job.id, &stage_one()).await.unwrap();

            assert!(!store.complete_job(job.id).await.unwrap());
        });
    }

    fn image(key: SlotKey) -> NewCarouselImage {
        NewCarouselImage {
            key,
            url: format!("https://cdn.example.com/{}.png", key.slot_index),
            storage_key: format!("{}.png", key.slot_index),
            prompt: "p".to_string(),
            alt_text: "a".to_string(),
            content_type: "image/png".to_string(),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_persists_are_all_counted() {
        let store = Arc::new(MemoryStore::new());
        let job = store.create_job(&new_job()).await.unwrap();
        store.begin_caption(job.id).await.unwrap();
        store.save_stage_one(job.id, &stage_one()).await.unwrap();

        let handles: Vec<_> = (1..=CAROUSEL_SIZE)
            .map(|slot| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.persist_image(&image(SlotKey::new(job.id, slot))).await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().unwrap().is_some());
        }

        let job = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.progress.images_completed, CAROUSEL_SIZE);
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[test]
    fn test_duplicate_persist_is_not_counted() {
        tokio_test::block_on(async {
            let store = MemoryStore::new();
            let job = store.create_job(&new_job()).await.unwrap();
            store.begin_caption(job.id).await.unwrap();
            store.save_stage_one(job.id, &stage_one()).await.unwrap();
            let key = SlotKey::new(job.id, 3);

            let first = store.persist_image(&image(key)).await.unwrap();
            assert_eq!(first.map(|u| u.images_completed), Some(1));
            assert!(store.persist_image(&image(key)).await.unwrap().is_none());

            assert_eq!(store.image_count(job.id), 1);
            let job = store.get_job(job.id).await.unwrap().unwrap();
            assert_eq!(job.progress.images_completed, 1);
        });
    }

    #[test]
    fn test_failed_persist_writes_nothing() {
        tokio_test::block_on(async {
            let store = MemoryStore::new();
            let job = store.create_job(&new_job()).await.unwrap();
            store.begin_caption(job.id).await.unwrap();
            store.save_stage_one(job.id, &stage_one()).await.unwrap();
            let key = SlotKey::new(job.id, 4);
            store.fail_persist(4, 1);

            assert!(matches!(
                store.persist_image(&image(key)).await,
                Err(StoreError::Database(_))
            ));
            assert_eq!(store.image_count(job.id), 0);
            assert_eq!(
                store.get_job(job.id).await.unwrap().unwrap().progress.images_completed,
                0
            );

            assert!(store.persist_image(&image(key)).await.unwrap().is_some());
            assert_eq!(store.image_count(job.id), 1);
        });
    }

    #[test]
    fn test_persist_for_unknown_job_writes_nothing() {
        tokio_test::block_on(async {
            let store = MemoryStore::new();
            let key = SlotKey::new(Uuid::new_v4(), 3);
            assert!(matches!(
                store.persist_image(&image(key)).await,
                Err(StoreError::NotFound(_))
            ));
            assert_eq!(store.image_count(key.job_id), 0);
        });
    }
}
