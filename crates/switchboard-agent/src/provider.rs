use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A single message in the conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Request to an LLM provider.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
}

/// Response from an LLM provider.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub stop_reason: String,
}

/// Common interface for the chat backends.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name for logging and error messages.
    fn name(&self) -> &str;

    /// Send a chat request and wait for the full response.
    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Provider unavailable: {0}")]
    Unavailable(String),
}

/// Send `request` and decode the JSON body, turning non-2xx answers into
/// the matching [`ProviderError`].
pub(crate) async fn send_json<T: DeserializeOwned>(
    provider: &str,
    request: reqwest::RequestBuilder,
) -> Result<T, ProviderError> {
    let resp = request.send().await?;
    let status = resp.status();
    if !status.is_success() {
        let retry = retry_after_ms(resp.headers());
        let body = resp.text().await.unwrap_or_default();
        let err = status_error(status.as_u16(), retry, &body);
        warn!(provider, status = status.as_u16(), error = %err, "provider request failed");
        return Err(err);
    }

    let bytes = resp.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| ProviderError::Parse(e.to_string()))
}

/// Map a failed HTTP status and its body to an error.
pub(crate) fn status_error(status: u16, retry_after_ms: u64, body: &str) -> ProviderError {
    let message = error_message(body);
    match status {
        429 => ProviderError::RateLimited { retry_after_ms },
        // 529 is Anthropic's "overloaded".
        503 | 529 => ProviderError::Unavailable(message),
        _ => ProviderError::Api { status, message },
    }
}

/// Both API families wrap failures as `{"error": {"message": ...}}`.
fn error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct Envelope {
        error: Detail,
    }
    #[derive(Deserialize)]
    struct Detail {
        message: String,
    }

    match serde_json::from_str::<Envelope>(body) {
        Ok(env) => env.error.message,
        Err(_) => body.trim().to_string(),
    }
}

/// Milliseconds to wait after a 429, read from `retry-after` (seconds).
pub(crate) fn retry_after_ms(headers: &reqwest::header::HeaderMap) -> u64 {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|s| s * 1000)
        .unwrap_or(5000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue};

    #[test]
    fn retry_after_is_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("3"));
        assert_eq!(retry_after_ms(&headers), 3000);
    }

    #[test]
    fn retry_after_defaults_when_missing_or_garbled() {
        assert_eq!(retry_after_ms(&HeaderMap::new()), 5000);
        let mut headers = HeaderMap::new();
        headers.insert(
            "retry-after",
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(retry_after_ms(&headers), 5000);
    }

    #[test]
    fn statuses_map_to_error_kinds() {
        assert!(matches!(
            status_error(429, 2000, ""),
            ProviderError::RateLimited { retry_after_ms: 2000 }
        ));
        assert!(matches!(
            status_error(529, 0, r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#),
            ProviderError::Unavailable(m) if m == "Overloaded"
        ));
        match status_error(401, 0, r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error"}}"#) {
            ProviderError::Api { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "Incorrect API key provided");
            }
            other => panic!("expected Api, got {other:?}"),
        }
    }

    #[test]
    fn unstructured_error_body_is_kept() {
        match status_error(500, 0, "  upstream exploded\n") {
            ProviderError::Api { message, .. } => assert_eq!(message, "upstream exploded"),
            other => panic!("expected Api, got {other:?}"),
        }
    }

    #[test]
    fn roles_serialize_lowercase() {
        let json = serde_json::to_string(&Message::user("hi")).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"hi"}"#);
    }
}
