pub mod core;
pub mod http;

#[cfg(test)]
pub(crate) mod testing;

use std::fs;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};

pub use crate::core::error::{classify_message, ConfigError, RemoteError};
pub use crate::core::generator::{PairFailure, RunReport, Story, StoryGenerator, StoryRequest};
pub use crate::core::pacer::Pacer;
pub use crate::core::prompts::PromptPair;
pub use crate::core::retry::{Attempt, RetryCoordinator, RetryPolicy};
pub use crate::core::JitterRange;
pub use crate::http::{ChatMessage, GenerativeService, ServiceRef, TogetherClient};

pub const DEFAULT_CHAT_MODEL: &str = "meta-llama/Llama-Vision-Free";
pub const DEFAULT_IMAGE_MODEL: &str = "black-forest-labs/FLUX.1-schnell-Free";

/// Run configuration shared by the CLI and config files.
/// Durations are in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoryConfig {
    pub api_key: String,
    pub base_url: String,
    pub chat_model: String,
    pub image_model: String,
    pub count: u32,
    pub min_delay: f64,
    pub pacer_jitter_min: f64,
    pub pacer_jitter_max: f64,
    pub base_delay: f64,
    pub max_delay: f64,
    pub max_retries: u32,
    pub retry_jitter_min: f64,
    pub retry_jitter_max: f64,
    pub output: Option<String>,
    pub save_images: Option<String>,
}

impl Default for StoryConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: http::client::DEFAULT_BASE_URL.to_string(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            count: 2,
            min_delay: 2.0,
            pacer_jitter_min: 0.1,
            pacer_jitter_max: 1.0,
            base_delay: 5.0,
            max_delay: 30.0,
            max_retries: 3,
            retry_jitter_min: 0.1,
            retry_jitter_max: 2.0,
            output: None,
            save_images: None,
        }
    }
}

impl StoryConfig {
    /// Reads a JSON config file. Missing fields keep their defaults.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        StoryRequest::check_count(self.count)?;
        self.retry_policy()?;
        self.pacer()?;
        Ok(())
    }

    pub fn retry_policy(&self) -> Result<RetryPolicy, ConfigError> {
        if self.max_retries == 0 {
            return Err(ConfigError::ZeroRetries);
        }
        Ok(RetryPolicy {
            base_delay: secs("baseDelay", self.base_delay)?,
            max_delay: secs("maxDelay", self.max_delay)?,
            max_retries: self.max_retries,
            jitter: jitter("retry", self.retry_jitter_min, self.retry_jitter_max)?,
        })
    }

    pub fn pacer(&self) -> Result<Pacer, ConfigError> {
        Ok(Pacer::new(
            secs("minDelay", self.min_delay)?,
            jitter("pacer", self.pacer_jitter_min, self.pacer_jitter_max)?,
        ))
    }
}

fn secs(field: &'static str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value).map_err(|_| ConfigError::InvalidDuration { field, value })
}

fn jitter(field: &'static str, min: f64, max: f64) -> Result<JitterRange, ConfigError> {
    JitterRange::new(secs(field, min)?, secs(field, max)?)
        .map_err(|_| ConfigError::InvertedJitter { field, min, max })
}

/// Output abstraction for a generation run.
/// The CLI implements this with a terminal progress bar and colored output.
pub trait StoryEventSink: Send + Sync {
    fn on_log(&self, level: &str, message: &str);
    fn on_progress(&self, fraction: f32, label: &str);
    fn on_story(&self, story: &Story);

    /// Non-fatal: a throttled call is about to be retried.
    fn on_retry(&self, attempt: &Attempt) {
        self.on_log("warn", &retry_message(attempt));
    }
}

pub fn retry_message(attempt: &Attempt) -> String {
    format!(
        "Rate limit hit. Waiting {:.2} seconds before retry...",
        attempt.delay.as_secs_f64()
    )
}

pub type SinkRef = Arc<dyn StoryEventSink>;

/// Terminal output sink for CLI usage.
pub struct ConsoleSink {
    bar: ProgressBar,
}

impl ConsoleSink {
    pub fn new_ref() -> SinkRef {
        let bar = ProgressBar::new(100);
        if let Ok(style) = ProgressStyle::with_template("{bar:40.cyan/blue} {pos:>3}% {msg}") {
            bar.set_style(style);
        }
        Arc::new(Self { bar })
    }

    fn print(&self, text: &str) {
        self.bar.suspend(|| {
            print!("{}\r\n", text);
            std::io::stdout().flush().ok();
        });
    }
}

impl StoryEventSink for ConsoleSink {
    fn on_log(&self, level: &str, message: &str) {
        let colored = match level {
            "success" => message.green().to_string(),
            "error" => message.red().to_string(),
            "warn" => message.yellow().to_string(),
            "phase" => message.bright_cyan().bold().to_string(),
            _ => message.to_string(),
        };
        self.print(&colored);
    }

    fn on_progress(&self, fraction: f32, label: &str) {
        let position = (fraction.clamp(0.0, 1.0) * 100.0).round() as u64;
        self.bar.set_position(position);
        self.bar.set_message(label.to_string());
        if position >= 100 {
            self.bar.finish_and_clear();
        }
    }

    fn on_story(&self, story: &Story) {
        self.print(&format!("\n{}", format!("Story {}", story.index).bright_white().bold()));
        self.print(&format!("    Image:      {}", story.image_url.cyan()));
        self.print(&format!("    Story Line: {}", story.story_line.bright_yellow()));
        self.print("    Story:");
        for line in story.story.lines() {
            self.print(&format!("      {}", line));
        }
        self.print(&"──────────────────────────────────────────".dimmed().to_string());
    }
}
