use std::time::Duration;

use serde::Deserialize;

use crate::pipeline::reconcile::ReconcileSettings;
use crate::pipeline::PipelineSettings;
use crate::services::ai::WorkersAiModels;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    #[serde(default = "default_database_max_connections")]
    pub database_max_connections: u32,

    /// Redis connection string for job queue
    pub redis_url: String,

    /// Cloudflare account ID
    pub cf_account_id: String,

    /// Cloudflare Workers AI API token
    pub cf_api_token: String,

    /// R2 bucket name
    pub r2_bucket: String,

    /// R2 access key ID (S3-compatible)
    pub r2_access_key: String,

    /// R2 secret access key (S3-compatible)
    pub r2_secret_key: String,

    /// R2 endpoint URL
    pub r2_endpoint: String,

    /// Public base URL carousel images are served from
    pub r2_public_base_url: String,

    #[serde(default = "default_text_model")]
    pub text_model: String,

    #[serde(default = "default_image_model")]
    pub image_model: String,

    /// Used instead of `image_model` when the job carries a reference image
    #[serde(default = "default_img2img_model")]
    pub img2img_model: String,

    #[serde(default = "default_text_timeout_secs")]
    pub text_timeout_secs: u64,

    #[serde(default = "default_image_timeout_secs")]
    pub image_timeout_secs: u64,

    #[serde(default = "default_storage_timeout_secs")]
    pub storage_timeout_secs: u64,

    #[serde(default = "default_cancel_poll_interval_ms")]
    pub cancel_poll_interval_ms: u64,

    /// Jobs a single worker runs at once
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    #[serde(default = "default_stale_job_after_secs")]
    pub stale_job_after_secs: u64,

    #[serde(default = "default_max_job_attempts")]
    pub max_job_attempts: i32,

    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_database_max_connections() -> u32 {
    20
}

fn default_text_model() -> String {
    "@cf/meta/llama-3.1-8b-instruct".to_string()
}

fn default_image_model() -> String {
    "@cf/black-forest-labs/flux-1-schnell".to_string()
}

fn default_img2img_model() -> String {
    "@cf/runwayml/stable-diffusion-v1-5-img2img".to_string()
}

fn default_text_timeout_secs() -> u64 {
    120
}

fn default_image_timeout_secs() -> u64 {
    90
}

fn default_storage_timeout_secs() -> u64 {
    30
}

fn default_cancel_poll_interval_ms() -> u64 {
    2000
}

fn default_worker_concurrency() -> usize {
    4
}

fn default_stale_job_after_secs() -> u64 {
    1800
}

fn default_max_job_attempts() -> i32 {
    3
}

fn default_reconcile_interval_secs() -> u64 {
    300
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn models(&self) -> WorkersAiModels {
        WorkersAiModels {
            text: self.text_model.clone(),
            image: self.image_model.clone(),
            img2img: self.img2img_model.clone(),
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            text_timeout: Duration::from_secs(self.text_timeout_secs),
            image_timeout: Duration::from_secs(self.image_timeout_secs),
            storage_timeout: Duration::from_secs(self.storage_timeout_secs),
            cancel_poll_interval: Duration::from_millis(self.cancel_poll_interval_ms),
        }
    }

    pub fn reconcile_settings(&self) -> ReconcileSettings {
        ReconcileSettings {
            stale_after: Duration::from_secs(self.stale_job_after_secs),
            max_attempts: self.max_job_attempts,
            ..ReconcileSettings::default()
        }
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }
}
