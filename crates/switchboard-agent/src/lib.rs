pub mod anthropic;
pub mod dispatcher;
pub mod openai;
pub mod provider;
pub mod registry;
pub mod slash;

pub use dispatcher::{AgentDispatcher, VerifyOnlyHandler};
pub use provider::{ChatRequest, ChatResponse, LlmProvider, Message, ProviderError, Role};
pub use registry::{build_provider, ResolvedProvider};
