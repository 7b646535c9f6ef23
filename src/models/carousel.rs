use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};
use uuid::Uuid;

/// Number of images in one carousel.
pub const CAROUSEL_SIZE: i32 = 9;

/// Only a single carousel per post is generated today.
pub const DEFAULT_CAROUSEL_INDEX: i32 = 1;

/// Composite key of a carousel image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotKey {
    pub job_id: Uuid,
    pub carousel_index: i32,
    pub slot_index: i32,
}

impl SlotKey {
    pub fn new(job_id: Uuid, slot_index: i32) -> Self {
        Self {
            job_id,
            carousel_index: DEFAULT_CAROUSEL_INDEX,
            slot_index,
        }
    }

    /// Deterministic blob key, so a repeated upload overwrites instead of piling up.
    pub fn storage_key(&self, extension: &str) -> String {
        format!(
            "posts/{}/carousel-{}/slot-{}.{}",
            self.job_id, self.carousel_index, self.slot_index, extension
        )
    }
}

/// Where a slot sits in the carousel's narrative arc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NarrativeRole {
    Hook,
    Detail,
    CallToAction,
}

impl NarrativeRole {
    pub fn for_slot(slot_index: i32) -> Self {
        match slot_index {
            1 => Self::Hook,
            CAROUSEL_SIZE => Self::CallToAction,
            _ => Self::Detail,
        }
    }
}

/// Image prompt for one slot, produced by stage 1 and reused verbatim on retry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImagePrompt {
    pub slot_index: i32,
    pub role: NarrativeRole,
    pub prompt: String,
    pub alt_text: String,
}

/// A persisted carousel image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarouselImage {
    pub id: Uuid,
    pub job_id: Uuid,
    pub carousel_index: i32,
    pub slot_index: i32,
    pub url: String,
    pub storage_key: String,
    pub prompt: String,
    pub alt_text: String,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
}

impl CarouselImage {
    pub fn key(&self) -> SlotKey {
        SlotKey {
            job_id: self.job_id,
            carousel_index: self.carousel_index,
            slot_index: self.slot_index,
        }
    }
}

/// Row to insert once an image has been uploaded.
#[derive(Debug, Clone)]
pub struct NewCarouselImage {
    pub key: SlotKey,
    pub url: String,
    pub storage_key: String,
    pub prompt: String,
    pub alt_text: String,
    pub content_type: String,
}

/// Slots of the carousel that have no persisted image.
pub fn missing_slots(images: &[CarouselImage], carousel_index: i32) -> Vec<i32> {
    (1..=CAROUSEL_SIZE)
        .filter(|slot| {
            !images
                .iter()
                .any(|img| img.carousel_index == carousel_index && img.slot_index == *slot)
        })
        .collect()
}
