use serde::{Deserialize, Serialize};
use std::fmt;

pub const SLACK: &str = "slack";
pub const TELEGRAM: &str = "telegram";
pub const DISCORD: &str = "discord";
pub const FEISHU: &str = "feishu";
pub const WECOM: &str = "wecom";

/// Platform-qualified conversation key.
///
/// Format: `{platform}:{chat_id}`. The platform prefix keeps keys unique
/// across platforms, so `slack:U1` and `telegram:U1` never share settings
/// or a dispatch queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(pub String);

impl SessionKey {
    pub fn for_chat(platform: &str, chat_id: &str) -> Self {
        Self(format!("{}:{}", platform, chat_id))
    }

    /// Parse a wire-format key. The chat part may itself contain colons.
    pub fn parse(s: &str) -> Option<Self> {
        let (platform, chat) = s.split_once(':')?;
        if platform.is_empty() || chat.is_empty() {
            return None;
        }
        Some(Self(s.to_string()))
    }

    /// The platform prefix (`"slack"` for `slack:U1`).
    pub fn platform(&self) -> &str {
        self.0.split_once(':').map(|(p, _)| p).unwrap_or(&self.0)
    }

    /// The platform-local chat identifier (`"U1"` for `slack:U1`).
    pub fn chat_id(&self) -> &str {
        self.0.split_once(':').map(|(_, c)| c).unwrap_or("")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SessionKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}
