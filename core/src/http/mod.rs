pub mod client;

pub use client::TogetherClient;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::error::RemoteError;

/// One message of a chat-completion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// The remote generative AI service.
///
/// Implementations perform exactly one remote call per method invocation and
/// must report rate limiting as [`RemoteError::Throttled`]. Retrying and
/// pacing are the caller's job.
#[async_trait]
pub trait GenerativeService: Send + Sync {
    /// Returns the text of the first completion choice.
    async fn chat(&self, model: &str, messages: &[ChatMessage]) -> Result<String, RemoteError>;

    /// Returns the URL of the first generated image.
    async fn generate_image(&self, model: &str, prompt: &str) -> Result<String, RemoteError>;
}

pub type ServiceRef = Arc<dyn GenerativeService>;
