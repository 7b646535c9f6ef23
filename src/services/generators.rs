//! Stage 1 generators: caption + hashtags, and the carousel's image prompts.
//!
//! Each is one call to the text model followed by strict typed extraction.

use std::collections::HashSet;

use garde::Validate;
use serde::Deserialize;

use crate::models::carousel::{ImagePrompt, NarrativeRole, CAROUSEL_SIZE};
use crate::services::ai::{AiError, TextGenerator};
use crate::services::extract::{extract, ExtractError};
use crate::services::prompts::{self, PromptContext};

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Text generation failed: {0}")]
    Ai(#[from] AiError),

    #[error("Unusable model output: {0}")]
    Extract(#[from] ExtractError),

    #[error("Image prompts rejected: {0}")]
    Prompts(String),
}

/// Caption and hashtags as returned by the model.
#[derive(Debug, Clone, Deserialize, Validate, PartialEq)]
pub struct CaptionDraft {
    #[garde(length(min = 1, max = 2200))]
    pub caption: String,

    #[garde(length(max = 30), inner(length(min = 1, max = 100)))]
    pub hashtags: Vec<String>,
}

#[derive(Debug, Deserialize, Validate)]
struct PromptDraft {
    #[serde(default)]
    #[garde(range(min = 1, max = 9))]
    slot: Option<i32>,

    #[garde(length(min = 1, max = 2000))]
    prompt: String,

    #[serde(default)]
    #[garde(length(max = 500))]
    alt_text: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
struct PromptPlan(#[garde(length(min = 9, max = 9), dive)] Vec<PromptDraft>);

/// One text call producing the caption and normalized hashtags.
pub async fn generate_caption(
    text: &dyn TextGenerator,
    ctx: &PromptContext<'_>,
) -> Result<CaptionDraft, GenerationError> {
    let raw = text
        .complete(prompts::SYSTEM_PROMPT, &prompts::caption_prompt(ctx))
        .await?;
    let draft: CaptionDraft = extract(&raw)?;

    let normalized = CaptionDraft {
        caption: draft.caption.trim().to_string(),
        hashtags: normalize_hashtags(&draft.hashtags),
    };
    // Trimming can empty a caption that passed extraction.
    normalized
        .validate()
        .map_err(|report| ExtractError::Invalid(report.to_string()))?;
    Ok(normalized)
}

/// One text call producing exactly nine distinct prompts, one per slot.
pub async fn generate_image_prompts(
    text: &dyn TextGenerator,
    ctx: &PromptContext<'_>,
) -> Result<Vec<ImagePrompt>, GenerationError> {
    let raw = text
        .complete(prompts::SYSTEM_PROMPT, &prompts::image_prompts_prompt(ctx))
        .await?;
    let plan: PromptPlan = extract(&raw)?;

    assign_slots(plan.0, &ctx.concept.title)
}

/// `#`-prefixed, whitespace-free, deduplicated case-insensitively, order kept.
pub fn normalize_hashtags(raw: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.iter()
        .filter_map(|tag| {
            let body: String = tag
                .trim()
                .trim_start_matches('#')
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect();
            if body.is_empty() {
                return None;
            }
            seen.insert(body.to_lowercase()).then(|| format!("#{body}"))
        })
        .collect()
}

fn assign_slots(drafts: Vec<PromptDraft>, title: &str) -> Result<Vec<ImagePrompt>, GenerationError> {
    let numbered = drafts.iter().all(|d| d.slot.is_some());
    if !numbered && drafts.iter().any(|d| d.slot.is_some()) {
        return Err(GenerationError::Prompts(
            "slot numbers given for some prompts but not others".to_string(),
        ));
    }

    let mut prompts: Vec<ImagePrompt> = drafts
        .into_iter()
        .enumerate()
        .map(|(position, draft)| {
            let slot_index = draft.slot.unwrap_or(position as i32 + 1);
            let role = NarrativeRole::for_slot(slot_index);
            let alt_text = draft
                .alt_text
                .map(|alt| alt.trim().to_string())
                .filter(|alt| !alt.is_empty())
                .unwrap_or_else(|| format!("{title}: image {slot_index} of {CAROUSEL_SIZE}"));
            ImagePrompt {
                slot_index,
                role,
                prompt: draft.prompt.trim().to_string(),
                alt_text,
            }
        })
        .collect();
    prompts.sort_by_key(|p| p.slot_index);

    let slots: Vec<i32> = prompts.iter().map(|p| p.slot_index).collect();
    if slots != (1..=CAROUSEL_SIZE).collect::<Vec<_>>() {
        return Err(GenerationError::Prompts(format!(
            "expected slots 1-{CAROUSEL_SIZE} once each, got {slots:?}"
        )));
    }

    let mut distinct = HashSet::new();
    for prompt in &prompts {
        if prompt.prompt.is_empty() || !distinct.insert(prompt.prompt.to_lowercase()) {
            return Err(GenerationError::Prompts(format!(
                "prompt for slot {} is empty or duplicated",
                prompt.slot_index
            )));
        }
    }

    Ok(prompts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::post::{Concept, Platform};
    use crate::services::mock::{nine_prompts_json, MockTextGenerator};

    fn concept() -> Concept {
        Concept {
            title: "Winter coat drive".to_string(),
            angle: None,
            target_audience: None,
            key_messages: vec![],
            tone: None,
            call_to_action: None,
        }
    }

    fn ctx(concept: &Concept) -> PromptContext<'_> {
        PromptContext {
            concept,
            platform: Platform::Facebook,
            style: "photo",
            voice: "warm",
            source_refs: &[],
        }
    }

    #[tokio::test]
    async fn test_caption_is_extracted_and_normalized() {
        let text = MockTextGenerator::with_default(
            "```json\n{\"caption\": \" Stay warm \", \"hashtags\": [\"coats\", \"#Coats\", \"#give back\"]}\n```",
        );
        let concept = concept();
        let draft = generate_caption(&text, &ctx(&concept)).await.unwrap();
        assert_eq!(draft.caption, "Stay warm");
        assert_eq!(draft.hashtags, vec!["#coats", "#giveback"]);
    }

    #[tokio::test]
    async fn test_blank_caption_is_rejected() {
        let text = MockTextGenerator::with_default("{\"caption\": \"  \\n \", \"hashtags\": [\"#a\"]}");
        let concept = concept();
        let err = generate_caption(&text, &ctx(&concept)).await.unwrap_err();
        assert!(matches!(err, GenerationError::Extract(ExtractError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_caption_without_json_fails() {
        let text = MockTextGenerator::with_default("Sorry, I can't do that.");
        let concept = concept();
        let err = generate_caption(&text, &ctx(&concept)).await.unwrap_err();
        assert!(matches!(err, GenerationError::Extract(ExtractError::NoJson)));
    }

    #[tokio::test]
    async fn test_nine_prompts_follow_the_arc() {
        let text = MockTextGenerator::with_default(&nine_prompts_json());
        let concept = concept();
        let prompts = generate_image_prompts(&text, &ctx(&concept)).await.unwrap();
        assert_eq!(prompts.len(), 9);
        assert_eq!(prompts[0].role, NarrativeRole::Hook);
        assert_eq!(prompts[4].role, NarrativeRole::Detail);
        assert_eq!(prompts[8].role, NarrativeRole::CallToAction);
        assert!(prompts.iter().enumerate().all(|(i, p)| p.slot_index == i as i32 + 1));
    }

    #[tokio::test]
    async fn test_unnumbered_prompts_take_position() {
        let drafts: Vec<_> = (1..=9)
            .map(|i| serde_json::json!({ "prompt": format!("scene {i}") }))
            .collect();
        let text = MockTextGenerator::with_default(&serde_json::to_string(&drafts).unwrap());
        let concept = concept();
        let prompts = generate_image_prompts(&text, &ctx(&concept)).await.unwrap();
        assert_eq!(prompts[2].prompt, "scene 3");
        assert_eq!(prompts[2].alt_text, "Winter coat drive: image 3 of 9");
    }

    #[tokio::test]
    async fn test_eight_prompts_are_rejected() {
        let drafts: Vec<_> = (1..=8)
            .map(|i| serde_json::json!({ "slot": i, "prompt": format!("scene {i}") }))
            .collect();
        let text = MockTextGenerator::with_default(&serde_json::to_string(&drafts).unwrap());
        let concept = concept();
        let err = generate_image_prompts(&text, &ctx(&concept)).await.unwrap_err();
        assert!(matches!(err, GenerationError::Extract(ExtractError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_duplicate_prompts_are_rejected() {
        let drafts: Vec<_> = (1..=9)
            .map(|i| serde_json::json!({ "slot": i, "prompt": "same scene" }))
            .collect();
        let text = MockTextGenerator::with_default(&serde_json::to_string(&drafts).unwrap());
        let concept = concept();
        let err = generate_image_prompts(&text, &ctx(&concept)).await.unwrap_err();
        assert!(matches!(err, GenerationError::Prompts(_)));
    }

    #[tokio::test]
    async fn test_repeated_slot_is_rejected() {
        let drafts: Vec<_> = (1..=9)
            .map(|i| serde_json::json!({ "slot": if i == 9 { 8 } else { i }, "prompt": format!("scene {i}") }))
            .collect();
        let text = MockTextGenerator::with_default(&serde_json::to_string(&drafts).unwrap());
        let concept = concept();
        assert!(generate_image_prompts(&text, &ctx(&concept)).await.is_err());
    }
}
