//! Test helpers: an in-process pipeline harness and HTTP helpers for E2E runs

#![allow(dead_code)]

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use uuid::Uuid;

use social_post_gen::db::memory::MemoryStore;
use social_post_gen::db::store::JobStore;
use social_post_gen::models::job::{NewPostJob, PostJob};
use social_post_gen::models::post::SubmitPostRequest;
use social_post_gen::pipeline::{Pipeline, PipelineSettings};
use social_post_gen::services::mock::{MemoryBlobStore, MockImageGenerator, MockTextGenerator};

/// Deadlines short enough for tests, polling fast enough to see cancellation quickly.
pub fn fast_settings() -> PipelineSettings {
    PipelineSettings {
        text_timeout: Duration::from_secs(2),
        image_timeout: Duration::from_secs(2),
        storage_timeout: Duration::from_secs(2),
        cancel_poll_interval: Duration::from_millis(10),
    }
}

/// A pipeline wired to in-memory collaborators that stay inspectable.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub text: Arc<MockTextGenerator>,
    pub images: Arc<MockImageGenerator>,
    pub blobs: Arc<MemoryBlobStore>,
    pub pipeline: Pipeline,
}

impl Harness {
    pub fn new(text: MockTextGenerator, images: MockImageGenerator) -> Self {
        Self::with_settings(text, images, MemoryBlobStore::new(), fast_settings())
    }

    pub fn with_settings(
        text: MockTextGenerator,
        images: MockImageGenerator,
        blobs: MemoryBlobStore,
        settings: PipelineSettings,
    ) -> Self {
        let store = Arc::new(MemoryStore::new());
        let text = Arc::new(text);
        let images = Arc::new(images);
        let blobs = Arc::new(blobs);
        let pipeline = Pipeline::new(
            store.clone(),
            text.clone(),
            images.clone(),
            blobs.clone(),
            settings,
        );
        Self {
            store,
            text,
            images,
            blobs,
            pipeline,
        }
    }

    /// Record a job directly, as a successful submission would.
    pub async fn create_job(&self, request: SubmitPostRequest) -> PostJob {
        self.store
            .create_job(&NewPostJob {
                concept: request.concept,
                platform: request.platform,
                style: request.style,
                voice: request.voice,
                source_refs: request.source_refs,
                reference_image_key: request.reference_image_key,
            })
            .await
            .expect("create job")
    }

    pub async fn job(&self, job_id: Uuid) -> PostJob {
        self.store
            .get_job(job_id)
            .await
            .expect("read job")
            .expect("job exists")
    }

    /// Wait until at least `count` images are persisted for the job.
    pub async fn wait_for_images(&self, job_id: Uuid, count: usize) {
        for _ in 0..500 {
            if self.store.image_count(job_id) >= count {
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!("job {job_id} never reached {count} images");
    }
}

/// Response from POST /api/v1/posts
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    pub job_id: Uuid,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct ProgressView {
    pub images_total: i32,
    pub images_completed: i32,
    pub failed_images: Vec<i32>,
    pub last_error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ImageView {
    pub carousel_index: i32,
    pub slot_index: i32,
    pub url: String,
    pub alt_text: String,
}

/// Response from GET /api/v1/posts/{job_id}
#[derive(Debug, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub status: String,
    pub progress: ProgressView,
    pub caption: Option<String>,
    pub hashtags: Option<Vec<String>>,
    pub images: Vec<ImageView>,
}

pub async fn submit_post(
    client: &reqwest::Client,
    base_url: &str,
    body: &serde_json::Value,
) -> Result<SubmitResponse, Box<dyn std::error::Error>> {
    let response = client
        .post(format!("{}/api/v1/posts", base_url))
        .json(body)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await?;
        return Err(format!("Submit failed with status {}: {}", status, error_text).into());
    }

    Ok(response.json::<SubmitResponse>().await?)
}

/// Poll job status until it is terminal (with timeout)
pub async fn poll_job_status(
    client: &reqwest::Client,
    base_url: &str,
    job_id: Uuid,
    timeout_secs: u64,
) -> Result<JobStatusResponse, Box<dyn std::error::Error>> {
    let max_attempts = timeout_secs * 2; // Poll every 500ms

    for attempt in 0..max_attempts {
        let response = client
            .get(format!("{}/api/v1/posts/{}", base_url, job_id))
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(format!("Status check failed: {}", error_text).into());
        }

        let status_response = response.json::<JobStatusResponse>().await?;

        match status_response.status.as_str() {
            "completed" | "failed" | "cancelled" => return Ok(status_response),
            "queued" | "generating_caption" | "generating_images" => {
                if attempt % 10 == 0 && attempt > 0 {
                    println!(
                        "  ... {} ({}/{} images)",
                        status_response.status,
                        status_response.progress.images_completed,
                        status_response.progress.images_total
                    );
                }
                sleep(Duration::from_millis(500)).await;
            }
            other => return Err(format!("Unknown job status: {}", other).into()),
        }
    }

    Err(format!("Job did not finish within {} seconds", timeout_secs).into())
}
