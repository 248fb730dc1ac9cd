use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::core::error::RemoteError;
use crate::core::generator::Story;
use crate::core::retry::Attempt;
use crate::http::{ChatMessage, GenerativeService};
use crate::{retry_message, StoryEventSink};

/// Sink that keeps every event for later assertions.
#[derive(Default)]
pub struct RecordingSink {
    logs: Mutex<Vec<(String, String)>>,
    progress: Mutex<Vec<(f32, String)>>,
    retries: Mutex<Vec<Attempt>>,
    stories: Mutex<Vec<Story>>,
}

impl RecordingSink {
    pub fn logs_at(&self, level: &str) -> Vec<String> {
        self.logs
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, _)| l == level)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn progress(&self) -> Vec<(f32, String)> {
        self.progress.lock().unwrap().clone()
    }

    pub fn retries(&self) -> Vec<Attempt> {
        self.retries.lock().unwrap().clone()
    }

    pub fn stories(&self) -> Vec<Story> {
        self.stories.lock().unwrap().clone()
    }
}

impl StoryEventSink for RecordingSink {
    fn on_log(&self, level: &str, message: &str) {
        self.logs.lock().unwrap().push((level.to_string(), message.to_string()));
    }

    fn on_progress(&self, fraction: f32, label: &str) {
        self.progress.lock().unwrap().push((fraction, label.to_string()));
    }

    fn on_story(&self, story: &Story) {
        self.stories.lock().unwrap().push(story.clone());
    }

    fn on_retry(&self, attempt: &Attempt) {
        self.retries.lock().unwrap().push(*attempt);
        self.on_log("warn", &retry_message(attempt));
    }
}

/// Service double. Prompt and image replies are served from queues; once a
/// queue is empty prompts fail as malformed and images get a URL derived from
/// the prompt. Stories echo their story line.
pub struct ScriptedService {
    prompt_replies: Mutex<VecDeque<Result<String, RemoteError>>>,
    image_replies: Mutex<VecDeque<Result<String, RemoteError>>>,
    failing_stories: Vec<(String, RemoteError)>,
    calls: Mutex<Vec<String>>,
    models: Mutex<Vec<String>>,
}

impl ScriptedService {
    pub fn new(
        prompt_replies: Vec<Result<String, RemoteError>>,
        image_replies: Vec<Result<String, RemoteError>>,
    ) -> Self {
        Self {
            prompt_replies: Mutex::new(prompt_replies.into()),
            image_replies: Mutex::new(image_replies.into()),
            failing_stories: Vec::new(),
            calls: Mutex::new(Vec::new()),
            models: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_story(mut self, story_line: &str, error: RemoteError) -> Self {
        self.failing_stories.push((story_line.to_string(), error));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn models(&self) -> Vec<String> {
        self.models.lock().unwrap().clone()
    }

    fn record(&self, model: &str, call: String) {
        self.models.lock().unwrap().push(model.to_string());
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl GenerativeService for ScriptedService {
    async fn chat(&self, model: &str, messages: &[ChatMessage]) -> Result<String, RemoteError> {
        let content = messages.first().map(|m| m.content.as_str()).unwrap_or_default();

        if content.starts_with("Create") {
            self.record(model, "prompts".to_string());
            return self
                .prompt_replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(RemoteError::MalformedResponse("no scripted reply".into())));
        }

        let story_line = content
            .lines()
            .find_map(|line| line.split_once("Story line: ").map(|(_, rest)| rest.trim()))
            .unwrap_or_default()
            .to_string();
        self.record(model, format!("story:{}", story_line));

        if let Some((_, error)) = self.failing_stories.iter().find(|(l, _)| *l == story_line) {
            return Err(error.clone());
        }
        Ok(format!("Once upon a time: {}", story_line))
    }

    async fn generate_image(&self, model: &str, prompt: &str) -> Result<String, RemoteError> {
        self.record(model, format!("image:{}", prompt));
        self.image_replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(format!("https://img.example/{}.png", prompt)))
    }
}
