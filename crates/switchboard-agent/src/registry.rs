//! Built-in provider registry: maps the provider ids accepted in config to
//! their API endpoints and default models.

use std::sync::Arc;

use switchboard_core::config::AiConfig;
use switchboard_core::error::{Result, SwitchboardError};

use crate::anthropic::AnthropicProvider;
use crate::openai::OpenAiProvider;
use crate::provider::LlmProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiStyle {
    /// Anthropic Messages API.
    Anthropic,
    /// OpenAI chat completions.
    OpenAi,
}

/// A provider id the binary knows how to talk to.
#[derive(Debug)]
pub struct KnownProvider {
    /// Identifier used in config (`AI_PROVIDER`).
    pub id: &'static str,
    pub name: &'static str,
    /// Base URL without trailing slash.
    pub base_url: &'static str,
    pub default_model: &'static str,
    pub style: ApiStyle,
}

pub const KNOWN_PROVIDERS: &[KnownProvider] = &[
    KnownProvider {
        id: "claude",
        name: "Anthropic Claude",
        base_url: "https://api.anthropic.com",
        default_model: "claude-sonnet-4-20250514",
        style: ApiStyle::Anthropic,
    },
    KnownProvider {
        id: "deepseek",
        name: "DeepSeek",
        base_url: "https://api.deepseek.com",
        default_model: "deepseek-chat",
        style: ApiStyle::OpenAi,
    },
    KnownProvider {
        id: "kimi",
        name: "Moonshot Kimi",
        base_url: "https://api.moonshot.cn",
        default_model: "moonshot-v1-8k",
        style: ApiStyle::OpenAi,
    },
    KnownProvider {
        id: "moonshot",
        name: "Moonshot Kimi",
        base_url: "https://api.moonshot.cn",
        default_model: "moonshot-v1-8k",
        style: ApiStyle::OpenAi,
    },
];

/// Look up a provider by id (case-insensitive).
pub fn lookup(id: &str) -> Option<&'static KnownProvider> {
    KNOWN_PROVIDERS
        .iter()
        .find(|p| p.id.eq_ignore_ascii_case(id.trim()))
}

/// A ready-to-use client plus the model requests should name.
pub struct ResolvedProvider {
    pub provider: Arc<dyn LlmProvider>,
    pub model: String,
}

/// Build the client described by `ai`, applying the `base_url` and `model`
/// overrides.
pub fn build_provider(ai: &AiConfig) -> Result<ResolvedProvider> {
    let known = lookup(&ai.provider).ok_or_else(|| {
        let ids: Vec<&str> = KNOWN_PROVIDERS.iter().map(|p| p.id).collect();
        SwitchboardError::Config(format!(
            "unknown AI provider '{}' (expected one of: {})",
            ai.provider,
            ids.join(", ")
        ))
    })?;

    if ai.api_key.is_empty() {
        return Err(SwitchboardError::Config(format!(
            "AI_API_KEY is required for provider '{}'",
            known.id
        )));
    }

    let base_url = ai
        .base_url
        .as_deref()
        .filter(|u| !u.trim().is_empty())
        .unwrap_or(known.base_url)
        .to_string();
    let model = ai
        .model
        .as_deref()
        .filter(|m| !m.trim().is_empty())
        .unwrap_or(known.default_model)
        .to_string();
    let api_key = ai.api_key.expose().to_string();

    let provider: Arc<dyn LlmProvider> = match known.style {
        ApiStyle::Anthropic => Arc::new(AnthropicProvider::new(api_key, base_url)),
        ApiStyle::OpenAi => Arc::new(OpenAiProvider::new(known.id, api_key, base_url)),
    };

    Ok(ResolvedProvider { provider, model })
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::config::Secret;

    fn ai(provider: &str) -> AiConfig {
        AiConfig {
            provider: provider.to_string(),
            api_key: Secret::new("sk-test"),
            base_url: None,
            model: None,
        }
    }

    #[test]
    fn defaults_follow_the_provider() {
        let resolved = build_provider(&ai("deepseek")).unwrap();
        assert_eq!(resolved.provider.name(), "deepseek");
        assert_eq!(resolved.model, "deepseek-chat");

        let resolved = build_provider(&ai("claude")).unwrap();
        assert_eq!(resolved.provider.name(), "claude");
        assert_eq!(resolved.model, "claude-sonnet-4-20250514");
    }

    #[test]
    fn kimi_and_moonshot_share_a_backend() {
        assert_eq!(lookup("kimi").unwrap().base_url, lookup("MOONSHOT").unwrap().base_url);
        assert_eq!(build_provider(&ai("kimi")).unwrap().model, "moonshot-v1-8k");
    }

    #[test]
    fn model_override_wins() {
        let mut cfg = ai("claude");
        cfg.model = Some("claude-opus-4-20250514".into());
        assert_eq!(build_provider(&cfg).unwrap().model, "claude-opus-4-20250514");
    }

    #[test]
    fn unknown_provider_is_a_config_error() {
        let err = build_provider(&ai("gpt-9")).err().unwrap();
        assert_eq!(err.code(), "CONFIG_ERROR");
        assert!(err.to_string().contains("gpt-9"));
    }

    #[test]
    fn missing_key_is_a_config_error() {
        let mut cfg = ai("deepseek");
        cfg.api_key = Secret::default();
        let err = build_provider(&cfg).err().unwrap();
        assert!(err.to_string().contains("AI_API_KEY"));
    }
}
