use clap::{Args, Parser, Subcommand, ValueEnum};

use switchboard_core::config::{Secret, SwitchboardConfig, WeComCredentials};

#[derive(Debug, Parser)]
#[command(
    name = "switchboard",
    version,
    about = "Route chat platform messages to an AI assistant"
)]
pub struct Cli {
    /// Log verbosity. Without it `RUST_LOG` decides.
    #[arg(long, global = true, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Config file (default: ~/.switchboard/switchboard.toml).
    #[arg(long, global = true, env = "SWITCHBOARD_CONFIG")]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Answer a platform's callback URL verification through the cloud relay.
    ///
    /// Run this once while configuring the callback URL in the platform's
    /// admin console, then switch to `switchboard relay`.
    Verify(VerifyArgs),
    /// Connect to the cloud relay and answer messages with the AI provider.
    Relay(RelayArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// Errors only.
    #[value(alias = "s")]
    Silent,
    #[value(alias = "i")]
    Info,
    /// Debug output from the switchboard crates.
    #[value(alias = "v")]
    Verbose,
    /// Everything, including dependencies.
    #[value(aliases = ["very-verbose", "vv"])]
    Debug,
}

const OWN_CRATES: &[&str] = &[
    "switchboard_gateway",
    "switchboard_channels",
    "switchboard_relay",
    "switchboard_agent",
    "switchboard_wecom",
    "switchboard_sessions",
    "switchboard_core",
];

pub const DEFAULT_FILTER: &str =
    "switchboard_gateway=info,switchboard_channels=info,switchboard_relay=info";

impl LogLevel {
    /// `EnvFilter` directive for this level.
    pub fn filter(self) -> String {
        match self {
            LogLevel::Silent => "error".to_string(),
            LogLevel::Info => format!("warn,{DEFAULT_FILTER}"),
            LogLevel::Verbose => {
                let own: Vec<String> = OWN_CRATES.iter().map(|c| format!("{c}=debug")).collect();
                format!("info,{}", own.join(","))
            }
            LogLevel::Debug => "trace".to_string(),
        }
    }
}

#[derive(Debug, Args)]
pub struct VerifyArgs {
    /// Platform to verify (currently: wecom).
    #[arg(long, env = "RELAY_PLATFORM")]
    pub platform: Option<String>,

    /// Relay WebSocket URL (default: wss://bot.lingti.com/ws).
    #[arg(long, env = "RELAY_SERVER_URL")]
    pub server: Option<String>,

    /// Give up after this many seconds.
    #[arg(long, default_value_t = switchboard_core::config::DEFAULT_VERIFY_TIMEOUT_SECS)]
    pub timeout: u64,

    #[command(flatten)]
    pub wecom: WeComArgs,
}

/// WeCom credentials given on the command line.
#[derive(Debug, Clone, Default, Args)]
pub struct WeComArgs {
    #[arg(long = "wecom-corp-id")]
    pub corp_id: Option<String>,
    #[arg(long = "wecom-agent-id")]
    pub agent_id: Option<String>,
    #[arg(long = "wecom-secret")]
    pub secret: Option<String>,
    #[arg(long = "wecom-token")]
    pub token: Option<String>,
    #[arg(long = "wecom-aes-key")]
    pub aes_key: Option<String>,
}

impl WeComArgs {
    /// Fill flags that were not given from the `WECOM_*` variables.
    pub fn with_env_fallback<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let fields = [
            (&mut self.corp_id, "WECOM_CORP_ID"),
            (&mut self.agent_id, "WECOM_AGENT_ID"),
            (&mut self.secret, "WECOM_SECRET"),
            (&mut self.token, "WECOM_TOKEN"),
            (&mut self.aes_key, "WECOM_AES_KEY"),
        ];
        for (field, var) in fields {
            if non_empty(field).is_none() {
                *field = lookup(var).filter(|v| !v.trim().is_empty());
            }
        }
        self
    }

    pub fn credentials(&self) -> WeComCredentials {
        WeComCredentials {
            corp_id: non_empty(&self.corp_id).unwrap_or_default(),
            agent_id: non_empty(&self.agent_id).unwrap_or_default(),
            secret: Secret::new(non_empty(&self.secret).unwrap_or_default()),
            token: Secret::new(non_empty(&self.token).unwrap_or_default()),
            aes_key: Secret::new(non_empty(&self.aes_key).unwrap_or_default()),
        }
    }
}

/// Relay mode flags. Anything given here overrides the config file.
#[derive(Debug, Args)]
pub struct RelayArgs {
    /// Relay account id.
    #[arg(long)]
    pub user_id: Option<String>,
    /// Platform the relay forwards (slack, telegram, discord, feishu, wecom).
    #[arg(long)]
    pub platform: Option<String>,
    /// Relay WebSocket URL.
    #[arg(long)]
    pub server: Option<String>,
    /// AI provider: claude, deepseek or kimi.
    #[arg(long)]
    pub provider: Option<String>,
    #[arg(long)]
    pub api_key: Option<String>,
    #[arg(long)]
    pub base_url: Option<String>,
    #[arg(long)]
    pub model: Option<String>,

    #[command(flatten)]
    pub wecom: WeComArgs,
}

impl RelayArgs {
    pub fn apply(&self, config: &mut SwitchboardConfig) {
        set(&mut config.relay.user_id, &self.user_id);
        set(&mut config.relay.platform, &self.platform);
        if let Some(url) = non_empty(&self.server) {
            config.relay.server_url = url;
        }
        if let Some(provider) = non_empty(&self.provider) {
            config.ai.provider = provider;
        }
        if let Some(key) = non_empty(&self.api_key) {
            config.ai.api_key = Secret::new(key);
        }
        set(&mut config.ai.base_url, &self.base_url);
        set(&mut config.ai.model, &self.model);

        let w = &self.wecom;
        let creds = &mut config.wecom;
        if let Some(v) = non_empty(&w.corp_id) {
            creds.corp_id = v;
        }
        if let Some(v) = non_empty(&w.agent_id) {
            creds.agent_id = v;
        }
        if let Some(v) = non_empty(&w.secret) {
            creds.secret = Secret::new(v);
        }
        if let Some(v) = non_empty(&w.token) {
            creds.token = Secret::new(v);
        }
        if let Some(v) = non_empty(&w.aes_key) {
            creds.aes_key = Secret::new(v);
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn set(target: &mut Option<String>, value: &Option<String>) {
    if let Some(v) = non_empty(value) {
        *target = Some(v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn verify_timeout_defaults_to_five_minutes() {
        let cli = Cli::try_parse_from(["switchboard", "verify", "--platform", "wecom"]).unwrap();
        let Command::Verify(args) = cli.command else {
            panic!("expected verify");
        };
        assert_eq!(args.timeout, 300);
        assert_eq!(args.platform.as_deref(), Some("wecom"));
    }

    #[test]
    fn log_level_aliases() {
        let cli = Cli::try_parse_from(["switchboard", "--log-level", "vv", "relay"]).unwrap();
        assert_eq!(cli.log_level, Some(LogLevel::Debug));
        assert_eq!(LogLevel::Silent.filter(), "error");
        assert!(LogLevel::Verbose.filter().contains("switchboard_relay=debug"));
    }

    #[test]
    fn relay_flags_override_config() {
        let cli = Cli::try_parse_from([
            "switchboard",
            "relay",
            "--user-id",
            "u1",
            "--platform",
            "wecom",
            "--provider",
            "deepseek",
            "--api-key",
            "sk-1",
            "--wecom-corp-id",
            "ww1",
        ])
        .unwrap();
        let Command::Relay(args) = cli.command else {
            panic!("expected relay");
        };

        let mut config = SwitchboardConfig::default();
        config.wecom.agent_id = "1000002".into();
        args.apply(&mut config);

        assert_eq!(config.relay.user_id.as_deref(), Some("u1"));
        assert_eq!(config.ai.provider, "deepseek");
        assert_eq!(config.ai.api_key.expose(), "sk-1");
        assert_eq!(config.wecom.corp_id, "ww1");
        // untouched fields keep their configured value
        assert_eq!(config.wecom.agent_id, "1000002");
    }

    #[test]
    fn wecom_flags_win_over_env() {
        let args = WeComArgs {
            corp_id: Some("from-flag".into()),
            ..Default::default()
        };
        let env = |name: &str| match name {
            "WECOM_CORP_ID" => Some("from-env".to_string()),
            "WECOM_TOKEN" => Some("tok".to_string()),
            "WECOM_SECRET" => Some("  ".to_string()),
            _ => None,
        };
        let creds = args.with_env_fallback(env).credentials();
        assert_eq!(creds.corp_id, "from-flag");
        assert_eq!(creds.token.expose(), "tok");
        assert_eq!(creds.missing_fields(), vec!["agent_id", "secret", "aes_key"]);
    }
}
