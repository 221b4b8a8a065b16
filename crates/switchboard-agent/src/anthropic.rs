use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::provider::{send_json, ChatRequest, ChatResponse, LlmProvider, Message, ProviderError};

const API_VERSION: &str = "2023-06-01";
const PROVIDER: &str = "claude";

/// Messages API client.
pub struct AnthropicProvider {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl AnthropicProvider {
    pub fn new(api_key: String, base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            endpoint: format!("{}/v1/messages", base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        debug!(provider = PROVIDER, model = %req.model, turns = req.messages.len(), "messages request");
        let request = self
            .http
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&MessagesBody::from(req));
        let reply: MessagesReply = send_json(PROVIDER, request).await?;
        Ok(reply.into())
    }
}

/// Wire body; the system prompt is a top-level field, left out when empty.
#[derive(Serialize)]
struct MessagesBody<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "str::is_empty")]
    system: &'a str,
    messages: &'a [Message],
}

impl<'a> From<&'a ChatRequest> for MessagesBody<'a> {
    fn from(req: &'a ChatRequest) -> Self {
        Self {
            model: &req.model,
            max_tokens: req.max_tokens,
            system: &req.system,
            messages: &req.messages,
        }
    }
}

#[derive(Deserialize)]
struct MessagesReply {
    model: String,
    content: Vec<Block>,
    stop_reason: Option<String>,
    usage: Usage,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Block {
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

impl From<MessagesReply> for ChatResponse {
    fn from(reply: MessagesReply) -> Self {
        let mut content = String::new();
        for block in reply.content {
            if let Block::Text { text } = block {
                content.push_str(&text);
            }
        }
        ChatResponse {
            content,
            model: reply.model,
            tokens_in: reply.usage.input_tokens,
            tokens_out: reply.usage.output_tokens,
            stop_reason: reply.stop_reason.unwrap_or_default(),
        }
    }
}
