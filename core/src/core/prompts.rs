use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::RemoteError;
use crate::http::ChatMessage;

/// A story line and the image prompt that illustrates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptPair {
    pub story_line: String,
    pub image_prompt: String,
}

/// Asks the chat model for `count` story lines, each mapped to an image prompt.
pub fn story_prompts_request(topic: &str, count: u32) -> ChatMessage {
    let shape = (1..=count)
        .map(|i| format!("    \"story_line_{i}\": \"image_prompt_{i}\""))
        .collect::<Vec<_>>()
        .join(",\n");

    ChatMessage::user(format!(
        "Create {count} related story lines and image prompts about: {topic}\n\
         Return only a JSON object with this structure:\n\
         {{\n{shape}\n}}"
    ))
}

pub fn story_request(image_prompt: &str, story_line: &str) -> ChatMessage {
    ChatMessage::user(format!(
        "Write a short story (100 words) that combines these elements:\n\
         1. Scene description: {image_prompt}\n\
         2. Story line: {story_line}\n\
         Make the story vivid and descriptive, as if describing a scene from a painting."
    ))
}

/// Parses the prompt-generation reply into at most `limit` pairs, keeping the
/// order the model wrote them in.
pub fn parse_prompt_pairs(raw: &str, limit: usize) -> Result<Vec<PromptPair>, RemoteError> {
    let body = strip_code_fence(raw);
    let value: Value = serde_json::from_str(body).map_err(|e| {
        RemoteError::MalformedResponse(format!("prompt reply is not valid JSON: {}", e))
    })?;

    let object = value.as_object().ok_or_else(|| {
        RemoteError::MalformedResponse("prompt reply is not a JSON object".to_string())
    })?;

    if object.is_empty() {
        return Err(RemoteError::MalformedResponse(
            "prompt reply contains no story lines".to_string(),
        ));
    }

    object
        .iter()
        .take(limit)
        .map(|(story_line, image_prompt)| {
            let image_prompt = image_prompt.as_str().ok_or_else(|| {
                RemoteError::MalformedResponse(format!(
                    "image prompt for '{}' is not a string",
                    story_line
                ))
            })?;
            Ok(PromptPair {
                story_line: story_line.clone(),
                image_prompt: image_prompt.to_string(),
            })
        })
        .collect()
}

/// Models like to wrap JSON in a Markdown fence even when told not to.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body).trim()
}
