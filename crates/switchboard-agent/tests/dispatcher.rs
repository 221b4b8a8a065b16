use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use switchboard_agent::{
    AgentDispatcher, ChatRequest, ChatResponse, LlmProvider, ProviderError, VerifyOnlyHandler,
};
use switchboard_channels::MessageHandler;
use switchboard_core::types::SessionKey;
use switchboard_sessions::{thinking_prompt, SessionStore, ThinkingLevel};

/// Records every request and answers with a canned reply or error.
struct MockProvider {
    requests: Mutex<Vec<ChatRequest>>,
    reply: Result<String, u16>,
}

impl MockProvider {
    fn replying(text: &str) -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            reply: Ok(text.to_string()),
        })
    }

    fn failing(status: u16) -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            reply: Err(status),
        })
    }

    fn last_system(&self) -> String {
        self.requests.lock().unwrap().last().unwrap().system.clone()
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        self.requests.lock().unwrap().push(req.clone());
        match &self.reply {
            Ok(text) => Ok(ChatResponse {
                content: text.clone(),
                model: req.model.clone(),
                tokens_in: 7,
                tokens_out: 2,
                stop_reason: "stop".into(),
            }),
            Err(status) => Err(ProviderError::Api {
                status: *status,
                message: "overloaded".into(),
            }),
        }
    }
}

fn dispatcher(provider: Arc<MockProvider>) -> (AgentDispatcher, Arc<SessionStore>) {
    let sessions = Arc::new(SessionStore::new());
    let d = AgentDispatcher::new(provider, "mock-model".into(), sessions.clone())
        .with_system_prompt("BASE");
    (d, sessions)
}

#[tokio::test]
async fn forwards_text_with_medium_thinking_by_default() {
    let provider = MockProvider::replying("hi there");
    let (d, _) = dispatcher(provider.clone());
    let key = SessionKey::for_chat("slack", "C1");

    let reply = d.handle(&key, "hello").await.unwrap();
    assert_eq!(reply, "hi there");

    let req = provider.requests.lock().unwrap()[0].clone();
    assert_eq!(req.model, "mock-model");
    assert_eq!(req.messages[0].content, "hello");
    assert_eq!(
        req.system,
        format!("BASE{}", thinking_prompt(ThinkingLevel::Medium))
    );
}

#[tokio::test]
async fn think_command_changes_the_next_prompt() {
    let provider = MockProvider::replying("ok");
    let (d, _) = dispatcher(provider.clone());
    let key = SessionKey::for_chat("telegram", "42");

    d.handle(&key, "/think off").await.unwrap();
    // slash commands never reach the provider
    assert_eq!(provider.calls(), 0);

    d.handle(&key, "question").await.unwrap();
    assert_eq!(provider.last_system(), "BASE");

    d.handle(&key, "/think high").await.unwrap();
    d.handle(&key, "question").await.unwrap();
    assert!(provider
        .last_system()
        .ends_with(thinking_prompt(ThinkingLevel::High)));
}

#[tokio::test]
async fn verbose_adds_instruction_and_usage_footer() {
    let provider = MockProvider::replying("answer");
    let (d, sessions) = dispatcher(provider.clone());
    let key = SessionKey::for_chat("discord", "9");
    sessions.set_verbose(&key, true);

    let reply = d.handle(&key, "why?").await.unwrap();
    assert!(reply.starts_with("answer"));
    assert!(reply.contains("7 in / 2 out"));
    assert!(provider.last_system().contains("Verbose Mode"));
}

#[tokio::test]
async fn provider_error_becomes_handler_error() {
    let (d, _) = dispatcher(MockProvider::failing(529));
    let key = SessionKey::for_chat("feishu", "oc_1");

    let err = d.handle(&key, "hello").await.unwrap_err();
    assert!(err.to_string().contains("529"));
}

#[tokio::test]
async fn blank_reply_is_an_error() {
    let (d, _) = dispatcher(MockProvider::replying("   "));
    let key = SessionKey::for_chat("slack", "C1");
    assert!(d.handle(&key, "hello").await.is_err());
}

#[tokio::test]
async fn status_reports_provider_and_model() {
    let (d, _) = dispatcher(MockProvider::replying("x"));
    let key = SessionKey::for_chat("wecom", "zhangsan");
    let status = d.handle(&key, "/status").await.unwrap();
    assert!(status.contains("mock"));
    assert!(status.contains("mock-model"));
}

#[tokio::test]
async fn verify_only_handler_always_sends_the_notice() {
    let handler = VerifyOnlyHandler::new("verification mode");
    let key = SessionKey::for_chat("wecom", "zhangsan");
    assert_eq!(handler.handle(&key, "hi").await.unwrap(), "verification mode");
    assert_eq!(handler.handle(&key, "/help").await.unwrap(), "verification mode");
}
