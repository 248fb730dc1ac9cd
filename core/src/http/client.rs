use async_trait::async_trait;
use log::debug;
use reqwest::{Client, ClientBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use super::{ChatMessage, GenerativeService};
use crate::core::error::{ConfigError, RemoteError};

pub const DEFAULT_BASE_URL: &str = "https://api.together.xyz/v1";

/// Together AI client. One method call is one HTTP request; no retries here.
pub struct TogetherClient {
    inner: Client,
    api_key: String,
    chat_url: Url,
    images_url: Url,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Serialize)]
struct ImageRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Deserialize)]
struct ImageData {
    url: Option<String>,
}

impl TogetherClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, ConfigError> {
        let base = parse_base_url(base_url)?;
        let join = |path: &str| {
            base.join(path).map_err(|e| ConfigError::InvalidBaseUrl {
                url: base_url.to_string(),
                reason: e.to_string(),
            })
        };
        let chat_url = join("chat/completions")?;
        let images_url = join("images/generations")?;

        let inner = ClientBuilder::new()
            .user_agent(concat!("fabler/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConfigError::InvalidBaseUrl {
                url: base_url.to_string(),
                reason: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            inner,
            api_key: api_key.to_string(),
            chat_url,
            images_url,
        })
    }

    /// Fetches raw bytes, e.g. a generated image. Unauthenticated.
    pub async fn download(&self, url: &str) -> Result<Vec<u8>, RemoteError> {
        let response = self.inner.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::from_status(status.as_u16(), error_message(&body, status)));
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn post<B, R>(&self, url: &Url, body: &B) -> Result<R, RemoteError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        debug!("POST {}", url);
        let response = self
            .inner
            .post(url.clone())
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!("{} answered {}: {}", url, status, body);
            return Err(RemoteError::from_status(status.as_u16(), error_message(&body, status)));
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| RemoteError::MalformedResponse(format!("unexpected response body: {}", e)))
    }
}

#[async_trait]
impl GenerativeService for TogetherClient {
    async fn chat(&self, model: &str, messages: &[ChatMessage]) -> Result<String, RemoteError> {
        let response: ChatResponse = self
            .post(&self.chat_url, &ChatRequest { model, messages })
            .await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| RemoteError::MalformedResponse("completion has no content".to_string()))
    }

    async fn generate_image(&self, model: &str, prompt: &str) -> Result<String, RemoteError> {
        let response: ImageResponse = self
            .post(&self.images_url, &ImageRequest { model, prompt, n: 1 })
            .await?;

        response
            .data
            .into_iter()
            .next()
            .and_then(|image| image.url)
            .ok_or_else(|| RemoteError::MalformedResponse("image response has no URL".to_string()))
    }
}

fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidBaseUrl {
        url: raw.to_string(),
        reason: reason.to_string(),
    };

    let mut url = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }
    if url.cannot_be_a_base() {
        return Err(invalid("not a base URL"));
    }
    // Url::join replaces the last segment unless the path ends with '/'.
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Pulls a readable message out of an error body. Handles
/// `{"error": {"message": ..}}`, `{"error": ".."}` and `{"message": ..}`.
fn error_message(body: &str, status: StatusCode) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        let message = value
            .pointer("/error/message")
            .or_else(|| value.get("error"))
            .or_else(|| value.get("message"))
            .and_then(Value::as_str);
        if let Some(message) = message {
            return message.to_string();
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        status.canonical_reason().unwrap_or("unknown error").to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let client = TogetherClient::new(DEFAULT_BASE_URL, "key").unwrap();
        assert_eq!(client.chat_url.as_str(), "https://api.together.xyz/v1/chat/completions");
        assert_eq!(client.images_url.as_str(), "https://api.together.xyz/v1/images/generations");
    }

    #[test]
    fn test_invalid_base_urls_rejected() {
        for raw in ["not a url", "ftp://example.com/v1", "mailto:someone@example.com"] {
            assert!(matches!(
                TogetherClient::new(raw, "key"),
                Err(ConfigError::InvalidBaseUrl { .. })
            ));
        }
    }

    #[test]
    fn test_error_message_shapes() {
        let status = StatusCode::BAD_REQUEST;
        assert_eq!(error_message(r#"{"error": {"message": "bad model"}}"#, status), "bad model");
        assert_eq!(error_message(r#"{"error": "nope"}"#, status), "nope");
        assert_eq!(error_message(r#"{"message": "hm"}"#, status), "hm");
        assert_eq!(error_message("plain text", status), "plain text");
        assert_eq!(error_message("", status), "Bad Request");
    }

    #[tokio::test]
    async fn test_chat_returns_first_choice() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .match_body(Matcher::PartialJson(json!({
                "model": "chat-model",
                "messages": [{"role": "user", "content": "hello"}]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices": [{"message": {"role": "assistant", "content": "hi there"}}]}"#)
            .create_async()
            .await;

        let client = TogetherClient::new(&server.url(), "test-key").unwrap();
        let text = client.chat("chat-model", &[ChatMessage::user("hello")]).await.unwrap();

        assert_eq!(text, "hi there");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_status_429_is_throttled() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_body(r#"{"error": {"message": "rate limit exceeded"}}"#)
            .create_async()
            .await;

        let client = TogetherClient::new(&server.url(), "k").unwrap();
        let err = client.chat("m", &[ChatMessage::user("x")]).await.unwrap_err();
        assert_eq!(err, RemoteError::Throttled);
    }

    #[tokio::test]
    async fn test_status_401_is_authentication() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/images/generations")
            .with_status(401)
            .with_body(r#"{"error": {"message": "invalid api key"}}"#)
            .create_async()
            .await;

        let client = TogetherClient::new(&server.url(), "k").unwrap();
        let err = client.generate_image("m", "a cat").await.unwrap_err();
        assert_eq!(err, RemoteError::Authentication("invalid api key".to_string()));
    }

    #[tokio::test]
    async fn test_server_error_is_not_throttled() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(503)
            .create_async()
            .await;

        let client = TogetherClient::new(&server.url(), "k").unwrap();
        let err = client.chat("m", &[ChatMessage::user("x")]).await.unwrap_err();
        assert_eq!(
            err,
            RemoteError::Api { status: 503, message: "Service Unavailable".to_string() }
        );
    }

    #[tokio::test]
    async fn test_unexpected_bodies_are_malformed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(r#"{"choices": []}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/images/generations")
            .with_status(200)
            .with_body("<html>oops</html>")
            .create_async()
            .await;

        let client = TogetherClient::new(&server.url(), "k").unwrap();
        assert!(matches!(
            client.chat("m", &[ChatMessage::user("x")]).await,
            Err(RemoteError::MalformedResponse(_))
        ));
        assert!(matches!(
            client.generate_image("m", "p").await,
            Err(RemoteError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_generate_image_returns_url() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/images/generations")
            .match_body(Matcher::PartialJson(json!({"model": "flux", "prompt": "a cat", "n": 1})))
            .with_status(200)
            .with_body(r#"{"data": [{"url": "https://img.example/1.png"}]}"#)
            .create_async()
            .await;

        let client = TogetherClient::new(&server.url(), "k").unwrap();
        assert_eq!(
            client.generate_image("flux", "a cat").await.unwrap(),
            "https://img.example/1.png"
        );
    }

    #[tokio::test]
    async fn test_download_fetches_bytes() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/img.png")
            .with_status(200)
            .with_body([1u8, 2, 3])
            .create_async()
            .await;

        let client = TogetherClient::new(DEFAULT_BASE_URL, "k").unwrap();
        let bytes = client.download(&format!("{}/img.png", server.url())).await.unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
    }

    /// Nothing listens on port 9, and the indicator in the path must not turn
    /// the refused connection into a throttle.
    #[tokio::test]
    async fn test_transport_error_ignores_indicator_in_url() {
        let client = TogetherClient::new("http://127.0.0.1:9/v429", "k").unwrap();

        let err = client
            .chat("m", &[ChatMessage::user("hi")])
            .await
            .unwrap_err();
        assert!(!err.is_throttled());
        assert!(matches!(err, RemoteError::Transport(_)));

        let err = client.download("http://127.0.0.1:9/429.png").await.unwrap_err();
        assert!(!err.is_throttled());
    }
}
