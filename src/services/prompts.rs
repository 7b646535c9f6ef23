use crate::models::carousel::CAROUSEL_SIZE;
use crate::models::job::PostJob;
use crate::models::post::{Concept, Platform, SourceRef};

/// Per-source excerpt cap, in characters.
const SOURCE_EXCERPT_CHARS: usize = 600;
/// Cap for the whole source summary, in characters.
const SOURCE_SUMMARY_CHARS: usize = 4000;

pub const SYSTEM_PROMPT: &str = concat!(
    "You are a social media copywriter and art director for a community organisation. ",
    "You always answer with a single JSON value and nothing else."
);

/// Everything a prompt template needs from a job.
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub concept: &'a Concept,
    pub platform: Platform,
    pub style: &'a str,
    pub voice: &'a str,
    pub source_refs: &'a [SourceRef],
}

impl<'a> From<&'a PostJob> for PromptContext<'a> {
    fn from(job: &'a PostJob) -> Self {
        Self {
            concept: &job.concept,
            platform: job.platform,
            style: &job.style,
            voice: &job.voice,
            source_refs: &job.source_refs,
        }
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", text[..cut].trim_end()),
        None => text.to_string(),
    }
}

/// Short bulleted digest of the source content.
pub fn summarize_sources(sources: &[SourceRef]) -> String {
    let mut summary = String::new();
    for source in sources {
        let line = format!(
            "- [{}] {}: {}\n",
            source.kind,
            source.title.trim(),
            truncate_chars(source.content.trim(), SOURCE_EXCERPT_CHARS)
        );
        if summary.chars().count() + line.chars().count() > SOURCE_SUMMARY_CHARS {
            break;
        }
        summary.push_str(&line);
    }
    summary
}

fn describe_concept(concept: &Concept) -> String {
    let mut out = format!("Title: {}\n", concept.title);
    if let Some(angle) = &concept.angle {
        out.push_str(&format!("Angle: {angle}\n"));
    }
    if let Some(audience) = &concept.target_audience {
        out.push_str(&format!("Target audience: {audience}\n"));
    }
    if !concept.key_messages.is_empty() {
        out.push_str("Key messages:\n");
        for message in &concept.key_messages {
            out.push_str(&format!("  * {message}\n"));
        }
    }
    if let Some(tone) = &concept.tone {
        out.push_str(&format!("Tone: {tone}\n"));
    }
    if let Some(cta) = &concept.call_to_action {
        out.push_str(&format!("Call to action: {cta}\n"));
    }
    out
}

fn brief(ctx: &PromptContext<'_>) -> String {
    format!(
        "CONCEPT\n{}\nSOURCE CONTENT\n{}\nPlatform: {}\nVisual style: {}\nBrand voice: {}\n",
        describe_concept(ctx.concept),
        summarize_sources(ctx.source_refs),
        ctx.platform,
        ctx.style,
        ctx.voice
    )
}

/// Prompt for the caption + hashtag stage.
pub fn caption_prompt(ctx: &PromptContext<'_>) -> String {
    format!(
        "{}\nWrite the post caption for {} in the brand voice above. \
         Open with a hook, stay faithful to the source content and end with the call to action.\n\
         Return a JSON object with keys \"caption\" (string) and \"hashtags\" (array of 3 to 15 strings, each starting with #).",
        brief(ctx),
        ctx.platform
    )
}

/// Prompt for the image prompt stage.
pub fn image_prompts_prompt(ctx: &PromptContext<'_>) -> String {
    format!(
        "{brief}\nPlan a carousel of exactly {n} images that tell one story. \
         Slot 1 is the hook that stops the scroll, slots 2 to {last_detail} carry the supporting detail \
         and slot {n} is the call to action. Every prompt must be distinct and describe a single image \
         in the visual style above, without any text rendered in the image.\n\
         Return a JSON array of exactly {n} objects with keys \"slot\" (1-{n}), \"prompt\" and \"alt_text\".",
        brief = brief(ctx),
        n = CAROUSEL_SIZE,
        last_detail = CAROUSEL_SIZE - 1
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::post::SourceKind;

    fn concept() -> Concept {
        Concept {
            title: "Food shelf open house".to_string(),
            angle: Some("Behind the scenes".to_string()),
            target_audience: Some("New volunteers".to_string()),
            key_messages: vec!["Shifts are two hours".to_string()],
            tone: Some("Upbeat".to_string()),
            call_to_action: Some("Sign up today".to_string()),
        }
    }

    fn source(content: &str) -> SourceRef {
        SourceRef {
            kind: SourceKind::Blog,
            id: Some("42".to_string()),
            title: "Open house recap".to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn test_caption_prompt_carries_brief() {
        let concept = concept();
        let sources = vec![source("We sorted 2,000 pounds of produce.")];
        let ctx = PromptContext {
            concept: &concept,
            platform: Platform::Instagram,
            style: "documentary",
            voice: "friendly",
            source_refs: &sources,
        };
        let prompt = caption_prompt(&ctx);
        assert!(prompt.contains("Food shelf open house"));
        assert!(prompt.contains("Shifts are two hours"));
        assert!(prompt.contains("2,000 pounds"));
        assert!(prompt.contains("instagram"));
        assert!(prompt.contains("\"caption\""));
    }

    #[test]
    fn test_image_prompt_describes_arc() {
        let concept = concept();
        let ctx = PromptContext {
            concept: &concept,
            platform: Platform::Linkedin,
            style: "flat illustration",
            voice: "professional",
            source_refs: &[],
        };
        let prompt = image_prompts_prompt(&ctx);
        assert!(prompt.contains("exactly 9"));
        assert!(prompt.contains("slot 9 is the call to action"));
        assert!(prompt.contains("flat illustration"));
    }

    #[test]
    fn test_long_sources_are_truncated() {
        let long = "word ".repeat(1000);
        let summary = summarize_sources(&[source(&long)]);
        assert!(summary.chars().count() < SOURCE_EXCERPT_CHARS + 100);
        assert!(summary.contains('…'));
    }

    #[test]
    fn test_summary_is_capped() {
        let body = "x".repeat(SOURCE_EXCERPT_CHARS);
        let sources: Vec<_> = (0..20).map(|_| source(&body)).collect();
        assert!(summarize_sources(&sources).chars().count() <= SOURCE_SUMMARY_CHARS);
    }
}
