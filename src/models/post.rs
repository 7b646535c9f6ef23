use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::models::carousel::CarouselImage;
use crate::models::job::{JobProgress, JobStatus};

/// Target social platform.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Platform {
    Instagram,
    Facebook,
    Linkedin,
    Twitter,
    Threads,
    Tiktok,
}

/// Kind of CMS content a post draws from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SourceKind {
    Blog,
    Ad,
    Sop,
    Event,
    Other,
}

/// The creative brief a post is generated from.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct Concept {
    #[garde(length(min = 1, max = 200))]
    pub title: String,

    #[garde(length(min = 1, max = 500))]
    pub angle: Option<String>,

    #[garde(length(min = 1, max = 200))]
    pub target_audience: Option<String>,

    #[serde(default)]
    #[garde(length(max = 10), inner(length(min = 1, max = 300)))]
    pub key_messages: Vec<String>,

    #[garde(length(min = 1, max = 100))]
    pub tone: Option<String>,

    #[garde(length(min = 1, max = 300))]
    pub call_to_action: Option<String>,
}

/// A piece of source content, already resolved to text by the caller.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct SourceRef {
    #[garde(skip)]
    pub kind: SourceKind,

    #[garde(length(min = 1, max = 100))]
    pub id: Option<String>,

    #[garde(length(min = 1, max = 300))]
    pub title: String,

    #[garde(length(min = 1, max = 20000))]
    pub content: String,
}

/// Request to generate a new post.
#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct SubmitPostRequest {
    #[garde(dive)]
    pub concept: Concept,

    #[garde(skip)]
    pub platform: Platform,

    #[garde(length(min = 1, max = 100))]
    pub style: String,

    #[garde(length(min = 1, max = 100))]
    pub voice: String,

    #[garde(length(min = 1, max = 20), dive)]
    pub source_refs: Vec<SourceRef>,

    /// Existing blob used as the seed image for every slot.
    #[serde(default)]
    #[garde(length(min = 1, max = 512))]
    pub reference_image_key: Option<String>,
}

/// Response after submitting a post for generation.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitPostResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub message: String,
}

/// One image as shown to pollers.
#[derive(Debug, Serialize, Deserialize)]
pub struct ImageView {
    pub carousel_index: i32,
    pub slot_index: i32,
    pub url: String,
    pub alt_text: String,
}

impl From<CarouselImage> for ImageView {
    fn from(image: CarouselImage) -> Self {
        Self {
            carousel_index: image.carousel_index,
            slot_index: image.slot_index,
            url: image.url,
            alt_text: image.alt_text,
        }
    }
}

/// Response for querying job status.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub progress: JobProgress,
    pub caption: Option<String>,
    pub hashtags: Option<Vec<String>>,
    pub images: Vec<ImageView>,
}

/// Request to (re)generate a single carousel slot.
#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct RegenerateSlotRequest {
    #[serde(default = "default_carousel_index")]
    #[garde(range(min = 1, max = 1))]
    pub carousel_index: i32,

    #[garde(range(min = 1, max = 9))]
    pub slot_index: i32,

    #[garde(length(min = 1, max = 2000))]
    pub prompt: String,

    #[garde(length(min = 1, max = 500))]
    pub alt_text: String,
}

fn default_carousel_index() -> i32 {
    crate::models::carousel::DEFAULT_CAROUSEL_INDEX
}

/// What a single-slot regeneration did.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RegenerateOutcome {
    Persisted,
    AlreadyPresent,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegenerateSlotResponse {
    pub job_id: Uuid,
    pub carousel_index: i32,
    pub slot_index: i32,
    pub outcome: RegenerateOutcome,
    pub url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_request() -> serde_json::Value {
        serde_json::json!({
            "concept": {
                "title": "Spring volunteer drive",
                "angle": "Neighbours helping neighbours",
                "key_messages": ["Sign up takes two minutes"]
            },
            "platform": "instagram",
            "style": "bright editorial photography",
            "voice": "warm",
            "source_refs": [
                { "kind": "event", "title": "Volunteer fair", "content": "Join us on April 12." }
            ]
        })
    }

    #[test]
    fn test_valid_submission_passes() {
        let req: SubmitPostRequest = serde_json::from_value(valid_request()).unwrap();
        assert!(req.validate().is_ok());
        assert_eq!(req.platform, Platform::Instagram);
    }

    #[test]
    fn test_empty_title_is_rejected() {
        let mut value = valid_request();
        value["concept"]["title"] = serde_json::json!("");
        let req: SubmitPostRequest = serde_json::from_value(value).unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_missing_sources_are_rejected() {
        let mut value = valid_request();
        value["source_refs"] = serde_json::json!([]);
        let req: SubmitPostRequest = serde_json::from_value(value).unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_missing_voice_fails_to_deserialize() {
        let mut value = valid_request();
        value.as_object_mut().unwrap().remove("voice");
        assert!(serde_json::from_value::<SubmitPostRequest>(value).is_err());
    }

    #[test]
    fn test_regenerate_slot_range() {
        let req: RegenerateSlotRequest = serde_json::from_value(serde_json::json!({
            "slot_index": 10, "prompt": "p", "alt_text": "a"
        }))
        .unwrap();
        assert_eq!(req.carousel_index, 1);
        assert!(req.validate().is_err());

        let req: RegenerateSlotRequest = serde_json::from_value(serde_json::json!({
            "carousel_index": 1, "slot_index": 9, "prompt": "p", "alt_text": "a"
        }))
        .unwrap();
        assert!(req.validate().is_ok());
    }
}
