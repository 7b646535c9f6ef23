//! Deterministic test doubles for the external collaborators.
//!
//! None of these make network calls. They let the full pipeline run in-process
//! with scripted successes, failures and delays.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use uuid::Uuid;

use crate::services::ai::{AiError, ImageGenerator, ImagePayload, ImageRequest, TextGenerator};
use crate::services::queue::{JobDispatcher, QueueError};
use crate::services::storage::{public_url, BlobStore, StorageError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A 2x2 PNG, encoded at runtime.
pub fn tiny_png() -> Vec<u8> {
    let img = image::DynamicImage::ImageRgb8(image::RgbImage::new(2, 2));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Png)
        .unwrap_or_else(|e| panic!("encoding a 2x2 PNG cannot fail: {e}"));
    buf.into_inner()
}

/// A valid nine-slot prompt plan as the text model would return it.
pub fn nine_prompts_json() -> String {
    let slots: Vec<_> = (1..=9)
        .map(|i| {
            serde_json::json!({
                "slot": i,
                "prompt": format!("Carousel scene number {i}"),
                "alt_text": format!("Scene {i}")
            })
        })
        .collect();
    serde_json::Value::Array(slots).to_string()
}

/// Scripted text model.
///
/// Responds with the first configured response whose key appears in the
/// prompt, else the default response, else an error.
pub struct MockTextGenerator {
    responses: Vec<(String, String)>,
    default_response: Option<String>,
    should_fail: bool,
    delay: Option<Duration>,
    calls: Mutex<Vec<String>>,
}

impl MockTextGenerator {
    pub fn new() -> Self {
        Self {
            responses: Vec::new(),
            default_response: None,
            should_fail: false,
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_default(response: &str) -> Self {
        let mut mock = Self::new();
        mock.default_response = Some(response.to_string());
        mock
    }

    pub fn with_responses(responses: Vec<(&str, &str)>) -> Self {
        let mut mock = Self::new();
        for (prompt_part, response) in responses {
            mock.add_response(prompt_part, response);
        }
        mock
    }

    /// Answers the caption prompt with `caption_json` and the image prompt with nine valid prompts.
    pub fn for_post(caption_json: &str) -> Self {
        Self::with_responses(vec![
            ("\"caption\"", caption_json),
            ("carousel of exactly", &nine_prompts_json()),
        ])
    }

    pub fn with_failure() -> Self {
        let mut mock = Self::new();
        mock.should_fail = true;
        mock
    }

    pub fn add_response(&mut self, prompt_contains: &str, response: &str) {
        self.responses
            .push((prompt_contains.to_string(), response.to_string()));
    }

    /// Sleep before answering every call.
    pub fn set_delay(&mut self, delay: Duration) {
        self.delay = Some(delay);
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }
}

impl Default for MockTextGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextGenerator for MockTextGenerator {
    async fn complete(&self, _system: &str, prompt: &str) -> Result<String, AiError> {
        lock(&self.calls).push(prompt.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.should_fail {
            return Err(AiError::Rejected("mock text model configured to fail".to_string()));
        }

        self.responses
            .iter()
            .find(|(key, _)| prompt.contains(key.as_str()))
            .map(|(_, response)| response.clone())
            .or_else(|| self.default_response.clone())
            .ok_or_else(|| AiError::Rejected("no mock response configured".to_string()))
    }
}

#[derive(Debug, Clone, Copy)]
enum SlotScript {
    /// Fail this many calls, then succeed.
    FailTimes(u32),
    FailAlways,
    Hang(Duration),
    Garbage,
}

/// Scripted image model; succeeds with a tiny PNG unless a slot is scripted otherwise.
pub struct MockImageGenerator {
    scripts: Mutex<HashMap<i32, SlotScript>>,
    calls: Mutex<HashMap<i32, u32>>,
    requests: Mutex<Vec<ImageRequest>>,
}

impl MockImageGenerator {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_slot_times(self, slot_index: i32, times: u32) -> Self {
        lock(&self.scripts).insert(slot_index, SlotScript::FailTimes(times));
        self
    }

    pub fn fail_slot_always(self, slot_index: i32) -> Self {
        lock(&self.scripts).insert(slot_index, SlotScript::FailAlways);
        self
    }

    pub fn hang_slot(self, slot_index: i32, duration: Duration) -> Self {
        lock(&self.scripts).insert(slot_index, SlotScript::Hang(duration));
        self
    }

    pub fn garbage_slot(self, slot_index: i32) -> Self {
        lock(&self.scripts).insert(slot_index, SlotScript::Garbage);
        self
    }

    /// Number of generation calls made for a slot.
    pub fn calls_for(&self, slot_index: i32) -> u32 {
        lock(&self.calls).get(&slot_index).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        lock(&self.calls).values().sum()
    }

    pub fn requests(&self) -> Vec<ImageRequest> {
        lock(&self.requests).clone()
    }
}

impl Default for MockImageGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageGenerator for MockImageGenerator {
    async fn generate(&self, request: &ImageRequest) -> Result<ImagePayload, AiError> {
        let attempt = {
            let mut calls = lock(&self.calls);
            let count = calls.entry(request.slot_index).or_insert(0);
            *count += 1;
            *count
        };
        lock(&self.requests).push(request.clone());
        let script = lock(&self.scripts).get(&request.slot_index).copied();

        match script {
            Some(SlotScript::FailTimes(times)) if attempt <= times => Err(AiError::Rejected(
                format!("mock failure for slot {} (attempt {attempt})", request.slot_index),
            )),
            Some(SlotScript::FailAlways) => Err(AiError::Rejected(format!(
                "mock permanent failure for slot {}",
                request.slot_index
            ))),
            Some(SlotScript::Hang(duration)) => {
                tokio::time::sleep(duration).await;
                Ok(ImagePayload::Binary(tiny_png()))
            }
            Some(SlotScript::Garbage) => Ok(ImagePayload::Binary(b"<html>oops</html>".to_vec())),
            _ => Ok(ImagePayload::Base64(
                base64::engine::general_purpose::STANDARD.encode(tiny_png()),
            )),
        }
    }
}

/// Blob store that keeps objects in memory.
pub struct MemoryBlobStore {
    base_url: String,
    objects: Mutex<HashMap<String, (Vec<u8>, String)>>,
    fail_uploads: bool,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self {
            base_url: "https://cdn.test".to_string(),
            objects: Mutex::new(HashMap::new()),
            fail_uploads: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_uploads: true,
            ..Self::new()
        }
    }

    /// Seed an object, e.g. a reference image.
    pub fn put(&self, key: &str, data: Vec<u8>, content_type: &str) {
        lock(&self.objects).insert(key.to_string(), (data, content_type.to_string()));
    }

    pub fn contains(&self, key: &str) -> bool {
        lock(&self.objects).contains_key(key)
    }

    pub fn len(&self) -> usize {
        lock(&self.objects).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(
        &self,
        key: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<String, StorageError> {
        if self.fail_uploads {
            return Err(StorageError::Status(503));
        }
        self.put(key, data.to_vec(), content_type);
        Ok(public_url(&self.base_url, key))
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        lock(&self.objects)
            .get(key)
            .map(|(data, _)| data.clone())
            .ok_or(StorageError::Status(404))
    }
}

/// Dispatcher that records what it was asked to do.
///
/// Dispatched ids stay pending until a simulated worker takes them with
/// [`RecordingDispatcher::take_next`].
pub struct RecordingDispatcher {
    dispatched: Mutex<Vec<Uuid>>,
    released: Mutex<Vec<Uuid>>,
    pending: Mutex<Vec<Uuid>>,
    unavailable: bool,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self {
            dispatched: Mutex::new(Vec::new()),
            released: Mutex::new(Vec::new()),
            pending: Mutex::new(Vec::new()),
            unavailable: false,
        }
    }

    /// Every dispatch fails as if Redis were down.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::new()
        }
    }

    pub fn dispatched(&self) -> Vec<Uuid> {
        lock(&self.dispatched).clone()
    }

    pub fn released(&self) -> Vec<Uuid> {
        lock(&self.released).clone()
    }

    /// Pop the oldest pending id, as a worker dequeue would.
    pub fn take_next(&self) -> Option<Uuid> {
        let mut pending = lock(&self.pending);
        if pending.is_empty() {
            None
        } else {
            Some(pending.remove(0))
        }
    }
}

impl Default for RecordingDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobDispatcher for RecordingDispatcher {
    async fn dispatch(&self, job_id: Uuid) -> Result<(), QueueError> {
        if self.unavailable {
            return Err(QueueError::Redis(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "mock queue unavailable",
            ))));
        }
        lock(&self.dispatched).push(job_id);
        lock(&self.pending).push(job_id);
        Ok(())
    }

    async fn release(&self, job_id: Uuid) -> Result<(), QueueError> {
        lock(&self.released).push(job_id);
        Ok(())
    }

    async fn is_pending(&self, job_id: Uuid) -> Result<bool, QueueError> {
        Ok(lock(&self.pending).contains(&job_id))
    }
}
