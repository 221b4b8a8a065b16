use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

use crate::error::{Result, SwitchboardError};
use crate::types::{DISCORD, FEISHU, SLACK, TELEGRAM, WECOM};

pub const DEFAULT_RELAY_URL: &str = "wss://bot.lingti.com/ws";
pub const DEFAULT_CALLBACK_BASE: &str = "https://bot.lingti.com";
/// Marker provider that puts the relay bridge into verify-only mode.
pub const VERIFY_PROVIDER: &str = "verify";
pub const DEFAULT_PROVIDER: &str = "claude";
pub const DEFAULT_VERIFY_TIMEOUT_SECS: u64 = 300;
pub const RECONNECT_BASE_MS: u64 = 1_000;
pub const RECONNECT_MAX_MS: u64 = 60_000; // 1 minute cap between relay attempts
pub const CONNECT_TIMEOUT_MS: u64 = 15_000;
pub const SHUTDOWN_GRACE_MS: u64 = 10_000;
pub const ADAPTER_STOP_TIMEOUT_MS: u64 = 5_000;
pub const INBOUND_QUEUE_CAPACITY: usize = 256;
pub const SESSION_QUEUE_CAPACITY: usize = 32;
pub const SESSION_IDLE_MS: u64 = 300_000;
pub const OUTBOX_CAPACITY: usize = 256;

/// A credential string that never shows up in `Debug` output or logs.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("\"\"")
        } else {
            f.write_str("\"***\"")
        }
    }
}

impl From<&str> for Secret {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Top-level config (switchboard.toml + SWITCHBOARD_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SwitchboardConfig {
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub wecom: WeComCredentials,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub ai: AiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// How long `Router::stop` waits for in-flight handler calls.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    /// Budget for a single adapter's `stop()` before it is abandoned.
    #[serde(default = "default_adapter_stop_timeout_ms")]
    pub adapter_stop_timeout_ms: u64,
    #[serde(default = "default_inbound_queue_capacity")]
    pub inbound_queue_capacity: usize,
    /// Messages a single conversation may have queued before new ones
    /// are turned away with a busy reply.
    #[serde(default = "default_session_queue_capacity")]
    pub session_queue_capacity: usize,
    /// A session worker with nothing to do for this long is retired.
    #[serde(default = "default_session_idle_ms")]
    pub session_idle_ms: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            shutdown_grace_ms: SHUTDOWN_GRACE_MS,
            adapter_stop_timeout_ms: ADAPTER_STOP_TIMEOUT_MS,
            inbound_queue_capacity: INBOUND_QUEUE_CAPACITY,
            session_queue_capacity: SESSION_QUEUE_CAPACITY,
            session_idle_ms: SESSION_IDLE_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    pub user_id: Option<String>,
    /// Platform identity multiplexed over the relay (e.g. `"wecom"`).
    pub platform: Option<String>,
    #[serde(default = "default_relay_url")]
    pub server_url: String,
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Maximum number of unacknowledged replies held for redelivery.
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            user_id: None,
            platform: None,
            server_url: DEFAULT_RELAY_URL.to_string(),
            reconnect_base_ms: RECONNECT_BASE_MS,
            reconnect_max_ms: RECONNECT_MAX_MS,
            connect_timeout_ms: CONNECT_TIMEOUT_MS,
            outbox_capacity: OUTBOX_CAPACITY,
        }
    }
}

/// WeCom application credentials. Immutable once a bridge is built.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WeComCredentials {
    #[serde(default)]
    pub corp_id: String,
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub secret: Secret,
    /// Callback token used in the SHA-1 signature.
    #[serde(default)]
    pub token: Secret,
    /// 43-character EncodingAESKey from the WeCom admin console.
    #[serde(default)]
    pub aes_key: Secret,
}

impl WeComCredentials {
    /// Names of the fields that are still empty, in declaration order.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.corp_id.trim().is_empty() {
            missing.push("corp_id");
        }
        if self.agent_id.trim().is_empty() {
            missing.push("agent_id");
        }
        if self.secret.is_empty() {
            missing.push("secret");
        }
        if self.token.is_empty() {
            missing.push("token");
        }
        if self.aes_key.is_empty() {
            missing.push("aes_key");
        }
        missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub slack: SlackConfig,
    #[serde(default)]
    pub telegram: TokenConfig,
    #[serde(default)]
    pub discord: TokenConfig,
    #[serde(default)]
    pub feishu: FeishuConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlackConfig {
    #[serde(default)]
    pub bot_token: Secret,
    #[serde(default)]
    pub app_token: Secret,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenConfig {
    #[serde(default)]
    pub bot_token: Secret,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeishuConfig {
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub app_secret: Secret,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// `claude`, `deepseek`, `kimi`, or [`VERIFY_PROVIDER`].
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub api_key: Secret,
    pub base_url: Option<String>,
    pub model: Option<String>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: DEFAULT_PROVIDER.to_string(),
            api_key: Secret::default(),
            base_url: None,
            model: None,
        }
    }
}

impl AiConfig {
    pub fn is_verify_only(&self) -> bool {
        self.provider == VERIFY_PROVIDER
    }
}

/// A platform whose credentials were incomplete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedPlatform {
    pub platform: String,
    pub missing: Vec<&'static str>,
}

/// Which platforms have enough credentials to be started.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlatformPlan {
    /// Directly connected platforms (`slack`, `telegram`, ...).
    pub direct: Vec<&'static str>,
    /// The relay-bridged platform, if the relay identity is complete.
    pub relay: Option<String>,
    pub skipped: Vec<SkippedPlatform>,
}

impl PlatformPlan {
    pub fn configured_count(&self) -> usize {
        self.direct.len() + usize::from(self.relay.is_some())
    }
}

impl SwitchboardConfig {
    /// Load config from a TOML file with SWITCHBOARD_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.switchboard/switchboard.toml
    ///
    /// Afterwards the conventional credential variables (`SLACK_BOT_TOKEN`,
    /// `WECOM_CORP_ID`, `AI_API_KEY`, ...) fill any field still unset.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let mut config: SwitchboardConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("SWITCHBOARD_").split("__"))
            .extract()
            .map_err(|e| SwitchboardError::Config(e.to_string()))?;

        config.fill_from_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Fill unset credential fields from the conventional env variables.
    ///
    /// `lookup` is injected so tests do not touch the process environment.
    pub fn fill_from_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |names: &[&str]| {
            names
                .iter()
                .filter_map(|n| lookup(*n))
                .find(|v| !v.trim().is_empty())
        };

        fill_secret(&mut self.channels.slack.bot_token, get(&["SLACK_BOT_TOKEN"]));
        fill_secret(&mut self.channels.slack.app_token, get(&["SLACK_APP_TOKEN"]));
        fill_secret(
            &mut self.channels.telegram.bot_token,
            get(&["TELEGRAM_BOT_TOKEN"]),
        );
        fill_secret(&mut self.channels.discord.bot_token, get(&["DISCORD_BOT_TOKEN"]));
        fill_string(&mut self.channels.feishu.app_id, get(&["FEISHU_APP_ID"]));
        fill_secret(&mut self.channels.feishu.app_secret, get(&["FEISHU_APP_SECRET"]));

        if let Some(provider) = get(&["AI_PROVIDER"]) {
            if self.ai.provider == DEFAULT_PROVIDER {
                self.ai.provider = provider;
            }
        }
        fill_secret(&mut self.ai.api_key, get(&["AI_API_KEY", "ANTHROPIC_API_KEY"]));
        if self.ai.base_url.is_none() {
            self.ai.base_url = get(&["AI_BASE_URL", "ANTHROPIC_BASE_URL"]);
        }
        if self.ai.model.is_none() {
            self.ai.model = get(&["AI_MODEL", "ANTHROPIC_MODEL"]);
        }

        if self.relay.user_id.is_none() {
            self.relay.user_id = get(&["RELAY_USER_ID"]);
        }
        if self.relay.platform.is_none() {
            self.relay.platform = get(&["RELAY_PLATFORM"]);
        }
        if self.relay.server_url == DEFAULT_RELAY_URL {
            if let Some(url) = get(&["RELAY_SERVER_URL"]) {
                self.relay.server_url = url;
            }
        }

        fill_string(&mut self.wecom.corp_id, get(&["WECOM_CORP_ID"]));
        fill_string(&mut self.wecom.agent_id, get(&["WECOM_AGENT_ID"]));
        fill_secret(&mut self.wecom.secret, get(&["WECOM_SECRET"]));
        fill_secret(&mut self.wecom.token, get(&["WECOM_TOKEN"]));
        fill_secret(&mut self.wecom.aes_key, get(&["WECOM_AES_KEY"]));
    }

    /// Decide which platforms can start.
    ///
    /// Missing credentials skip a platform. The only fatal cases are no
    /// platform at all, and a single platform with no AI API key (unless the
    /// relay runs in verify-only mode, which never calls the AI backend).
    pub fn platform_plan(&self) -> Result<PlatformPlan> {
        let mut plan = PlatformPlan::default();

        let mut check = |platform: &'static str, fields: &[(&'static str, bool)]| {
            let missing: Vec<&'static str> = fields
                .iter()
                .filter(|(_, present)| !present)
                .map(|(name, _)| *name)
                .collect();
            if missing.is_empty() {
                plan.direct.push(platform);
            } else if missing.len() < fields.len() {
                // Partially configured: worth telling the operator about.
                plan.skipped.push(SkippedPlatform {
                    platform: platform.to_string(),
                    missing,
                });
            } else {
                info!(platform, "credentials not provided, skipping");
            }
        };

        let ch = &self.channels;
        check(
            SLACK,
            &[
                ("bot_token", !ch.slack.bot_token.is_empty()),
                ("app_token", !ch.slack.app_token.is_empty()),
            ],
        );
        check(
            FEISHU,
            &[
                ("app_id", !ch.feishu.app_id.trim().is_empty()),
                ("app_secret", !ch.feishu.app_secret.is_empty()),
            ],
        );
        check(TELEGRAM, &[("bot_token", !ch.telegram.bot_token.is_empty())]);
        check(DISCORD, &[("bot_token", !ch.discord.bot_token.is_empty())]);

        match (&self.relay.user_id, &self.relay.platform) {
            (Some(user), Some(platform)) if !user.is_empty() && !platform.is_empty() => {
                let missing = if platform == WECOM {
                    self.wecom.missing_fields()
                } else {
                    Vec::new()
                };
                if missing.is_empty() {
                    plan.relay = Some(platform.clone());
                } else {
                    plan.skipped.push(SkippedPlatform {
                        platform: platform.clone(),
                        missing,
                    });
                }
            }
            (None, None) => {}
            _ => plan.skipped.push(SkippedPlatform {
                platform: "relay".to_string(),
                missing: vec!["user_id/platform"],
            }),
        }

        if plan.configured_count() == 0 {
            return Err(SwitchboardError::Config(
                "no platform has complete credentials".to_string(),
            ));
        }
        if plan.configured_count() == 1 && self.ai.api_key.is_empty() && !self.ai.is_verify_only()
        {
            return Err(SwitchboardError::Config(
                "AI_API_KEY is required".to_string(),
            ));
        }
        Ok(plan)
    }
}

fn fill_secret(slot: &mut Secret, value: Option<String>) {
    if slot.is_empty() {
        if let Some(v) = value {
            *slot = Secret(v);
        }
    }
}

fn fill_string(slot: &mut String, value: Option<String>) {
    if slot.trim().is_empty() {
        if let Some(v) = value {
            *slot = v;
        }
    }
}

fn default_shutdown_grace_ms() -> u64 {
    SHUTDOWN_GRACE_MS
}
fn default_adapter_stop_timeout_ms() -> u64 {
    ADAPTER_STOP_TIMEOUT_MS
}
fn default_inbound_queue_capacity() -> usize {
    INBOUND_QUEUE_CAPACITY
}
fn default_session_queue_capacity() -> usize {
    SESSION_QUEUE_CAPACITY
}
fn default_session_idle_ms() -> u64 {
    SESSION_IDLE_MS
}
fn default_relay_url() -> String {
    DEFAULT_RELAY_URL.to_string()
}
fn default_reconnect_base_ms() -> u64 {
    RECONNECT_BASE_MS
}
fn default_reconnect_max_ms() -> u64 {
    RECONNECT_MAX_MS
}
fn default_connect_timeout_ms() -> u64 {
    CONNECT_TIMEOUT_MS
}
fn default_outbox_capacity() -> usize {
    OUTBOX_CAPACITY
}
fn default_provider() -> String {
    DEFAULT_PROVIDER.to_string()
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.switchboard/switchboard.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    fn full_wecom() -> WeComCredentials {
        WeComCredentials {
            corp_id: "ww123".into(),
            agent_id: "1000002".into(),
            secret: "s".into(),
            token: "t".into(),
            aes_key: "k".into(),
        }
    }

    #[test]
    fn secret_debug_is_redacted() {
        let creds = full_wecom();
        let dbg = format!("{:?}", creds);
        assert!(dbg.contains("ww123"));
        assert!(!dbg.contains("\"t\""));
        assert!(dbg.contains("***"));
    }

    #[test]
    fn wecom_missing_fields_in_order() {
        let creds = WeComCredentials {
            corp_id: "ww123".into(),
            ..Default::default()
        };
        assert_eq!(
            creds.missing_fields(),
            vec!["agent_id", "secret", "token", "aes_key"]
        );
        assert!(full_wecom().is_complete());
    }

    #[test]
    fn env_fills_only_unset_fields() {
        let mut cfg = SwitchboardConfig::default();
        cfg.channels.telegram.bot_token = "from-file".into();
        cfg.fill_from_env(env(&[
            ("TELEGRAM_BOT_TOKEN", "from-env"),
            ("SLACK_BOT_TOKEN", "xoxb"),
            ("ANTHROPIC_API_KEY", "legacy-key"),
            ("WECOM_CORP_ID", "ww1"),
        ]));
        assert_eq!(cfg.channels.telegram.bot_token.expose(), "from-file");
        assert_eq!(cfg.channels.slack.bot_token.expose(), "xoxb");
        assert_eq!(cfg.ai.api_key.expose(), "legacy-key");
        assert_eq!(cfg.wecom.corp_id, "ww1");
    }

    #[test]
    fn ai_api_key_prefers_new_variable() {
        let mut cfg = SwitchboardConfig::default();
        cfg.fill_from_env(env(&[("AI_API_KEY", "new"), ("ANTHROPIC_API_KEY", "old")]));
        assert_eq!(cfg.ai.api_key.expose(), "new");
    }

    #[test]
    fn plan_skips_partial_platforms() {
        let mut cfg = SwitchboardConfig::default();
        cfg.channels.telegram.bot_token = "tg".into();
        cfg.channels.slack.bot_token = "xoxb".into();
        cfg.ai.api_key = "key".into();
        let plan = cfg.platform_plan().expect("telegram is configured");
        assert_eq!(plan.direct, vec![TELEGRAM]);
        assert_eq!(plan.skipped.len(), 1);
        assert_eq!(plan.skipped[0].platform, SLACK);
        assert_eq!(plan.skipped[0].missing, vec!["app_token"]);
    }

    #[test]
    fn plan_single_platform_without_api_key_is_fatal() {
        let mut cfg = SwitchboardConfig::default();
        cfg.channels.discord.bot_token = "d".into();
        let err = cfg.platform_plan().unwrap_err();
        assert!(err.to_string().contains("AI_API_KEY"));
    }

    #[test]
    fn plan_two_platforms_without_api_key_is_not_fatal() {
        let mut cfg = SwitchboardConfig::default();
        cfg.channels.discord.bot_token = "d".into();
        cfg.channels.telegram.bot_token = "t".into();
        let plan = cfg.platform_plan().expect("two platforms configured");
        assert_eq!(plan.configured_count(), 2);
    }

    #[test]
    fn plan_without_any_platform_is_fatal() {
        let cfg = SwitchboardConfig::default();
        assert!(cfg.platform_plan().is_err());
    }

    #[test]
    fn plan_relay_wecom_needs_full_tuple() {
        let mut cfg = SwitchboardConfig::default();
        cfg.ai.provider = VERIFY_PROVIDER.to_string();
        cfg.relay.user_id = Some("u1".into());
        cfg.relay.platform = Some(WECOM.into());
        cfg.wecom.corp_id = "ww1".into();
        assert!(cfg.platform_plan().is_err());

        cfg.wecom = full_wecom();
        let plan = cfg.platform_plan().expect("verify-only relay needs no api key");
        assert_eq!(plan.relay.as_deref(), Some(WECOM));
    }

    #[test]
    fn load_reads_toml_and_env_overrides() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "switchboard.toml",
                r#"
                [relay]
                user_id = "u-42"
                platform = "wecom"
                reconnect_max_ms = 5000

                [wecom]
                corp_id = "ww-file"
                "#,
            )?;
            jail.set_env("SWITCHBOARD_WECOM__AGENT_ID", "1000002");
            let cfg = SwitchboardConfig::load(Some("switchboard.toml"))
                .map_err(|e| e.to_string())?;
            assert_eq!(cfg.relay.user_id.as_deref(), Some("u-42"));
            assert_eq!(cfg.relay.reconnect_max_ms, 5000);
            assert_eq!(cfg.relay.server_url, DEFAULT_RELAY_URL);
            assert_eq!(cfg.wecom.corp_id, "ww-file");
            assert_eq!(cfg.wecom.agent_id, "1000002");
            assert_eq!(cfg.router.shutdown_grace_ms, SHUTDOWN_GRACE_MS);
            assert_eq!(cfg.router.session_idle_ms, SESSION_IDLE_MS);
            Ok(())
        });
    }
}
