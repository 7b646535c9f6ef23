//! Post briefs shared by the test suites

#![allow(dead_code)]

use serde_json::json;
use social_post_gen::models::post::{
    Concept, Platform, SourceKind, SourceRef, SubmitPostRequest,
};

/// A brief plus what the scripted caption model answers for it.
#[derive(Debug, Clone)]
pub struct PostFixture {
    pub title: &'static str,
    pub platform: Platform,
    pub source_title: &'static str,
    pub source_content: &'static str,
    pub caption_json: &'static str,
    pub description: &'static str,
}

pub const POST_FIXTURES: &[PostFixture] = &[
    PostFixture {
        title: "Autumn menu launch",
        platform: Platform::Instagram,
        source_title: "Our autumn menu is here",
        source_content: "Roasted squash soup, spiced apple cake and a new pumpkin latte.",
        caption_json: r##"{"caption":"A","hashtags":["#a"]}"##,
        description: "Minimal caption, single hashtag",
    },
    PostFixture {
        title: "Kitchen opening checklist",
        platform: Platform::Linkedin,
        source_title: "SOP: opening the kitchen",
        source_content: "Check fridge temperatures, log deliveries, sanitise prep surfaces.",
        caption_json: r##"Sure! Here is the caption:
```json
{"caption": "How our kitchen starts every day", "hashtags": ["kitchen", "#Ops", "#ops", "food safety"]}
```"##,
        description: "Fenced JSON with prose and messy hashtags",
    },
    PostFixture {
        title: "Harvest festival",
        platform: Platform::Facebook,
        source_title: "Harvest festival, 14 October",
        source_content: "Live music, local growers and a cider tasting from noon.",
        caption_json: r##"{"caption":"Join us for the harvest festival","hashtags":["#harvest","#local"]}"##,
        description: "Event announcement",
    },
];

pub fn concept(title: &str) -> Concept {
    Concept {
        title: title.to_string(),
        angle: Some("behind the scenes".to_string()),
        target_audience: Some("regulars and neighbours".to_string()),
        key_messages: vec!["fresh".to_string(), "seasonal".to_string()],
        tone: Some("warm".to_string()),
        call_to_action: Some("Book a table".to_string()),
    }
}

pub fn submit_request(fixture: &PostFixture) -> SubmitPostRequest {
    SubmitPostRequest {
        concept: concept(fixture.title),
        platform: fixture.platform,
        style: "bright editorial photography".to_string(),
        voice: "friendly and concise".to_string(),
        source_refs: vec![SourceRef {
            kind: SourceKind::Blog,
            id: Some("post-1".to_string()),
            title: fixture.source_title.to_string(),
            content: fixture.source_content.to_string(),
        }],
        reference_image_key: None,
    }
}

/// The same brief as JSON, for the HTTP suites.
pub fn submit_body(fixture: &PostFixture) -> serde_json::Value {
    json!({
        "concept": {
            "title": fixture.title,
            "angle": "behind the scenes",
            "key_messages": ["fresh", "seasonal"],
            "call_to_action": "Book a table"
        },
        "platform": fixture.platform.as_ref(),
        "style": "bright editorial photography",
        "voice": "friendly and concise",
        "source_refs": [{
            "kind": "blog",
            "title": fixture.source_title,
            "content": fixture.source_content
        }]
    })
}
