use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::core::error::{ConfigError, RemoteError};
use crate::core::prompts::{self, PromptPair};
use crate::core::retry::RetryCoordinator;
use crate::http::ServiceRef;
use crate::{SinkRef, StoryConfig};

pub const MIN_COUNT: u32 = 1;
pub const MAX_COUNT: u32 = 3;

/// One finished story, in the order its prompt pair was generated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Story {
    pub index: usize,
    pub image_url: String,
    pub story_line: String,
    pub story: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PairFailure {
    pub index: usize,
    pub error: RemoteError,
}

/// Outcome of one run. `aborted` is set when prompt generation failed, in
/// which case `stories` and `failures` are empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub stories: Vec<Story>,
    pub failures: Vec<PairFailure>,
    pub aborted: Option<RemoteError>,
}

/// Validated input for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoryRequest {
    pub topic: String,
    pub count: u32,
}

impl StoryRequest {
    pub fn new(topic: &str, count: u32) -> Result<Self, ConfigError> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(ConfigError::EmptyTopic);
        }
        Self::check_count(count)?;
        Ok(Self { topic: topic.to_string(), count })
    }

    pub fn check_count(count: u32) -> Result<(), ConfigError> {
        if (MIN_COUNT..=MAX_COUNT).contains(&count) {
            Ok(())
        } else {
            Err(ConfigError::CountOutOfRange { got: count, min: MIN_COUNT, max: MAX_COUNT })
        }
    }
}

/// Drives the prompt → image → story sequence for a topic.
///
/// Every remote call goes through the retry coordinator, which shares one
/// pacer across all three call types. Calls are issued strictly one after
/// another.
pub struct StoryGenerator {
    service: ServiceRef,
    coordinator: RetryCoordinator,
    sink: SinkRef,
    chat_model: String,
    image_model: String,
}

impl StoryGenerator {
    pub fn new(
        service: ServiceRef,
        coordinator: RetryCoordinator,
        sink: SinkRef,
        chat_model: &str,
        image_model: &str,
    ) -> Self {
        Self {
            service,
            coordinator,
            sink,
            chat_model: chat_model.to_string(),
            image_model: image_model.to_string(),
        }
    }

    pub fn from_config(
        config: &StoryConfig,
        service: ServiceRef,
        sink: SinkRef,
    ) -> Result<Self, ConfigError> {
        let coordinator = RetryCoordinator::new(
            Arc::new(config.pacer()?),
            config.retry_policy()?,
            Arc::clone(&sink),
        );
        Ok(Self::new(service, coordinator, sink, &config.chat_model, &config.image_model))
    }

    pub async fn generate_prompts(&self, request: &StoryRequest) -> Result<Vec<PromptPair>, RemoteError> {
        let messages = [prompts::story_prompts_request(&request.topic, request.count)];
        let raw = self
            .coordinator
            .execute("story prompts", || self.service.chat(&self.chat_model, &messages))
            .await?;
        prompts::parse_prompt_pairs(&raw, request.count as usize)
    }

    pub async fn generate_image(&self, image_prompt: &str) -> Result<String, RemoteError> {
        self.coordinator
            .execute("image", || self.service.generate_image(&self.image_model, image_prompt))
            .await
    }

    pub async fn generate_story(&self, image_prompt: &str, story_line: &str) -> Result<String, RemoteError> {
        let messages = [prompts::story_request(image_prompt, story_line)];
        self.coordinator
            .execute("story", || self.service.chat(&self.chat_model, &messages))
            .await
    }

    /// Runs the whole sequence. A failed pair is reported and skipped; a
    /// failed prompt generation aborts the run with no stories.
    pub async fn run(&self, request: &StoryRequest) -> RunReport {
        self.sink.on_progress(0.1, "Generating story prompts...");

        let pairs = match self.generate_prompts(request).await {
            Ok(pairs) => pairs,
            Err(e) => {
                warn!("prompt generation for '{}' failed: {}", request.topic, e);
                self.sink.on_log("error", &format!("Error in story generation process: {}", e));
                return RunReport { aborted: Some(e), ..RunReport::default() };
            }
        };
        info!("{} prompt pair(s) for '{}'", pairs.len(), request.topic);

        let mut report = RunReport::default();
        let total_steps = pairs.len() * 2;

        for (i, pair) in pairs.into_iter().enumerate() {
            let index = i + 1;

            match self.generate_pair(index, &pair, i * 2, total_steps).await {
                Ok(story) => {
                    self.sink.on_story(&story);
                    report.stories.push(story);
                }
                Err(e) => {
                    warn!("story {} failed: {}", index, e);
                    self.sink.on_log("error", &format!("Error processing story {}: {}", index, e));
                    report.failures.push(PairFailure { index, error: e });
                }
            }
        }

        self.sink.on_progress(1.0, "Complete!");
        report
    }

    async fn generate_pair(
        &self,
        index: usize,
        pair: &PromptPair,
        step: usize,
        total_steps: usize,
    ) -> Result<Story, RemoteError> {
        self.sink.on_progress(
            step_fraction(step, total_steps),
            &format!("Generating image {}...", index),
        );
        let image_url = self.generate_image(&pair.image_prompt).await?;

        self.sink.on_progress(
            step_fraction(step + 1, total_steps),
            &format!("Generating story {}...", index),
        );
        let story = self.generate_story(&pair.image_prompt, &pair.story_line).await?;

        Ok(Story {
            index,
            image_url,
            story_line: pair.story_line.clone(),
            story,
        })
    }
}

/// Spreads per-pair steps evenly over (0.1, 1.0), after the prompt step.
fn step_fraction(step: usize, total_steps: usize) -> f32 {
    0.1 + 0.9 * (step + 1) as f32 / (total_steps + 1) as f32
}
