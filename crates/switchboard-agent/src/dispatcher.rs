use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use switchboard_channels::{HandlerError, MessageHandler};
use switchboard_core::types::SessionKey;
use switchboard_sessions::{thinking_prompt, SessionSettings, SessionStore};

use crate::provider::{ChatRequest, LlmProvider, Message};
use crate::slash::{handle_slash_command, SlashContext};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant reachable from chat \
platforms such as Slack, Telegram, Discord, Feishu and WeCom. Answer in the language the \
user writes in. Keep replies concise and readable in a chat window.";

const VERBOSE_INSTRUCTION: &str = "\n\n## Verbose Mode\nExplain your reasoning and include \
relevant details, examples and caveats in the reply.";

const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Turns one chat message into one AI reply, honouring per-session settings.
pub struct AgentDispatcher {
    provider: Arc<dyn LlmProvider>,
    model: String,
    sessions: Arc<SessionStore>,
    system_prompt: String,
    max_tokens: u32,
}

impl AgentDispatcher {
    pub fn new(provider: Arc<dyn LlmProvider>, model: String, sessions: Arc<SessionStore>) -> Self {
        Self {
            provider,
            model,
            sessions,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Base prompt, then the thinking fragment, then the verbose instruction.
    pub fn system_prompt_for(&self, settings: &SessionSettings) -> String {
        let mut prompt = self.system_prompt.clone();
        prompt.push_str(thinking_prompt(settings.thinking_level));
        if settings.verbose {
            prompt.push_str(VERBOSE_INSTRUCTION);
        }
        prompt
    }

    fn build_request(&self, settings: &SessionSettings, text: &str) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            system: self.system_prompt_for(settings),
            messages: vec![Message::user(text)],
            max_tokens: self.max_tokens,
        }
    }
}

#[async_trait]
impl MessageHandler for AgentDispatcher {
    async fn handle(&self, key: &SessionKey, text: &str) -> Result<String, HandlerError> {
        let ctx = SlashContext {
            sessions: &self.sessions,
            provider: self.provider.name(),
            model: &self.model,
        };
        if let Some(reply) = handle_slash_command(text, key, &ctx) {
            return Ok(reply);
        }

        let settings = self.sessions.get(key);
        let req = self.build_request(&settings, text);

        debug!(
            session = %key,
            provider = %self.provider.name(),
            thinking = %settings.thinking_level,
            "dispatching to provider"
        );

        let resp = self.provider.send(&req).await.map_err(|e| {
            warn!(session = %key, provider = %self.provider.name(), error = %e, "provider call failed");
            HandlerError::new(e.to_string())
        })?;

        let mut reply = resp.content.trim().to_string();
        if reply.is_empty() {
            return Err(HandlerError::new(format!(
                "{} returned an empty reply",
                self.provider.name()
            )));
        }

        if settings.verbose {
            reply.push_str(&format!(
                "\n\n_{} · {} in / {} out tokens_",
                resp.model, resp.tokens_in, resp.tokens_out
            ));
        }
        Ok(reply)
    }
}

/// Answers every message with a fixed notice. Used while a bot only serves
/// callback verification and has no provider configured.
pub struct VerifyOnlyHandler {
    reply: String,
}

impl VerifyOnlyHandler {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
        }
    }
}

#[async_trait]
impl MessageHandler for VerifyOnlyHandler {
    async fn handle(&self, key: &SessionKey, _text: &str) -> Result<String, HandlerError> {
        debug!(session = %key, "verify-only mode, sending static reply");
        Ok(self.reply.clone())
    }
}
