use thiserror::Error;

/// Literal indicator the remote service puts in throttling errors.
const THROTTLING_INDICATOR: &str = "429";

/// Failure of a single remote call, or of a retry loop around it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("rate limited by the remote service (429)")]
    Throttled,

    #[error("max retries exceeded after {attempts} attempt(s)")]
    RetriesExhausted { attempts: u32 },

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("remote service returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl RemoteError {
    /// Maps a non-success HTTP status to an error. `message` is the best
    /// human-readable detail extracted from the response body.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            429 => RemoteError::Throttled,
            401 | 403 => RemoteError::Authentication(message),
            _ => RemoteError::Api { status, message },
        }
    }

    /// Builds an error from text alone, for failures that carry no usable
    /// status code.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if classify_message(&message) {
            RemoteError::Throttled
        } else {
            RemoteError::Transport(message)
        }
    }

    pub fn is_throttled(&self) -> bool {
        matches!(self, RemoteError::Throttled)
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        // The URL is part of the display text and must not feed classification.
        let err = err.without_url();
        if let Some(status) = err.status() {
            return RemoteError::from_status(status.as_u16(), err.to_string());
        }
        if err.is_decode() {
            return RemoteError::MalformedResponse(err.to_string());
        }
        RemoteError::from_message(err.to_string())
    }
}

/// True when an error message signals throttling.
///
/// Only used where no structured status is available.
pub fn classify_message(message: &str) -> bool {
    message.contains(THROTTLING_INDICATOR)
}

/// Invalid configuration or run input.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("topic must not be empty")]
    EmptyTopic,

    #[error("story count must be between {min} and {max}, got {got}")]
    CountOutOfRange { got: u32, min: u32, max: u32 },

    #[error("an API key is required")]
    MissingApiKey,

    #[error("invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("{field} must be a non-negative number of seconds within range, got {value}")]
    InvalidDuration { field: &'static str, value: f64 },

    #[error("{field} jitter range is inverted: {min} > {max}")]
    InvertedJitter { field: &'static str, min: f64, max: f64 },

    #[error("max retries must be at least 1")]
    ZeroRetries,

    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}
