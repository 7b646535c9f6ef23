use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::models::carousel::{ImagePrompt, CAROUSEL_SIZE};
use crate::models::post::{Concept, Platform, SourceRef};

/// Lifecycle status of a post generation job.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Queued,
    GeneratingCaption,
    GeneratingImages,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal states are never left by the pipeline itself.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Fine-grained step shown in the progress record.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProgressStep {
    Queued,
    GeneratingCaption,
    GeneratingImages,
    RecoveringImages,
    Completed,
    Failed,
    Cancelled,
}

/// Progress counters owned by a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobProgress {
    pub step: ProgressStep,
    pub images_total: i32,
    pub images_completed: i32,
    pub failed_images: Vec<i32>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Default for JobProgress {
    fn default() -> Self {
        Self {
            step: ProgressStep::Queued,
            images_total: CAROUSEL_SIZE,
            images_completed: 0,
            failed_images: Vec::new(),
            started_at: None,
            completed_at: None,
            failed_at: None,
            last_error: None,
        }
    }
}

/// A social post generation job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostJob {
    pub id: Uuid,
    pub status: JobStatus,
    pub concept: Concept,
    pub platform: Platform,
    pub style: String,
    pub voice: String,
    pub source_refs: Vec<SourceRef>,
    pub reference_image_key: Option<String>,
    pub caption: Option<String>,
    pub hashtags: Option<Vec<String>>,
    pub image_prompts: Option<Vec<ImagePrompt>>,
    pub progress: JobProgress,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PostJob {
    /// Stage 1 output is present, so a resumed run can go straight to images.
    pub fn has_stage_one_output(&self) -> bool {
        self.caption.is_some()
            && self
                .image_prompts
                .as_ref()
                .is_some_and(|prompts| prompts.len() == CAROUSEL_SIZE as usize)
    }
}

/// Submission parameters for a new job.
#[derive(Debug, Clone)]
pub struct NewPostJob {
    pub concept: Concept,
    pub platform: Platform,
    pub style: String,
    pub voice: String,
    pub source_refs: Vec<SourceRef>,
    pub reference_image_key: Option<String>,
}

/// Caption, hashtags and the per-slot prompts produced by stage 1.
#[derive(Debug, Clone)]
pub struct StageOneOutput {
    pub caption: String,
    pub hashtags: Vec<String>,
    pub image_prompts: Vec<ImagePrompt>,
}

/// Counter state returned by an atomic progress increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub images_completed: i32,
    pub images_total: i32,
    pub status: JobStatus,
}

impl ProgressUpdate {
    pub fn is_full(&self) -> bool {
        self.images_completed >= self.images_total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_status_round_trips_through_text() {
        for status in [
            JobStatus::Queued,
            JobStatus::GeneratingCaption,
            JobStatus::GeneratingImages,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(JobStatus::from_str(status.as_ref()).unwrap(), status);
        }
        assert_eq!(JobStatus::GeneratingCaption.to_string(), "generating_caption");
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::GeneratingImages.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
    }

    #[test]
    fn test_default_progress_expects_full_carousel() {
        let progress = JobProgress::default();
        assert_eq!(progress.images_total, 9);
        assert_eq!(progress.images_completed, 0);
        assert!(progress.failed_images.is_empty());
    }
}
