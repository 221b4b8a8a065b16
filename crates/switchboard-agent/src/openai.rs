use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::provider::{send_json, ChatRequest, ChatResponse, LlmProvider, ProviderError, Role};

/// Chat-completions client for OpenAI-compatible backends (DeepSeek, Moonshot).
pub struct OpenAiProvider {
    http: reqwest::Client,
    name: String,
    api_key: String,
    endpoint: String,
}

impl OpenAiProvider {
    pub fn new(name: impl Into<String>, api_key: String, base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            name: name.into(),
            api_key,
            endpoint: format!("{}/v1/chat/completions", base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        debug!(provider = %self.name, model = %req.model, turns = req.messages.len(), "chat completion");
        let request = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&Completion::from(req));
        let completion: CompletionReply = send_json(&self.name, request).await?;
        Ok(completion.into())
    }
}

/// Wire body; the system prompt travels as the first message.
#[derive(Serialize)]
struct Completion<'a> {
    model: &'a str,
    messages: Vec<Turn<'a>>,
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize)]
struct Turn<'a> {
    role: &'a str,
    content: &'a str,
}

impl<'a> From<&'a ChatRequest> for Completion<'a> {
    fn from(req: &'a ChatRequest) -> Self {
        let history = req.messages.iter().map(|m| Turn {
            role: match m.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            content: &m.content,
        });
        Self {
            model: &req.model,
            messages: std::iter::once(Turn {
                role: "system",
                content: &req.system,
            })
            .chain(history)
            .collect(),
            max_tokens: req.max_tokens,
            stream: false,
        }
    }
}

#[derive(Deserialize)]
struct CompletionReply {
    model: String,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: TokenUsage,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct TokenUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

impl From<CompletionReply> for ChatResponse {
    fn from(reply: CompletionReply) -> Self {
        let (content, stop_reason) = match reply.choices.into_iter().next() {
            Some(choice) => (
                choice.message.content.unwrap_or_default(),
                choice.finish_reason.unwrap_or_default(),
            ),
            None => (String::new(), String::new()),
        };
        ChatResponse {
            content,
            model: reply.model,
            tokens_in: reply.usage.prompt_tokens,
            tokens_out: reply.usage.completion_tokens,
            stop_reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Message;

    #[test]
    fn system_prompt_leads_the_messages() {
        let req = ChatRequest {
            model: "deepseek-chat".into(),
            system: "be brief".into(),
            messages: vec![Message::user("hi")],
            max_tokens: 256,
        };
        let body = serde_json::to_value(Completion::from(&req)).unwrap();
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "be brief");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn parses_first_choice_and_usage() {
        let json = r#"{
            "model": "moonshot-v1-8k",
            "choices": [{"message": {"content": "hello"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3}
        }"#;
        let resp: ChatResponse = serde_json::from_str::<CompletionReply>(json).unwrap().into();
        assert_eq!(resp.content, "hello");
        assert_eq!(resp.stop_reason, "stop");
        assert_eq!((resp.tokens_in, resp.tokens_out), (12, 3));
    }

    #[test]
    fn empty_choices_give_empty_content() {
        let json = r#"{"model": "deepseek-chat", "choices": []}"#;
        let resp: ChatResponse = serde_json::from_str::<CompletionReply>(json).unwrap().into();
        assert!(resp.content.is_empty());
        assert_eq!(resp.tokens_in, 0);
    }
}
