use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use switchboard_core::types::SessionKey;

/// A message received from a platform adapter (Slack, Telegram, WeCom, …).
///
/// Produced once by the adapter, consumed once by the router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Name of the adapter that produced the message; replies go back here.
    pub channel: String,

    /// Platform-qualified conversation key.
    pub session_key: SessionKey,

    /// Platform-native identifier for the sender.
    pub sender_id: String,

    /// Human-readable display name for the sender, if available.
    pub sender_name: Option<String>,

    /// Plain text content of the message.
    pub content: String,

    pub timestamp: DateTime<Utc>,

    /// Full raw payload from the platform for cases that need extra fields.
    pub raw_payload: Option<serde_json::Value>,
}

impl InboundMessage {
    pub fn new(channel: &str, session_key: SessionKey, sender_id: &str, content: &str) -> Self {
        Self {
            channel: channel.to_string(),
            session_key,
            sender_id: sender_id.to_string(),
            sender_name: None,
            content: content.to_string(),
            timestamp: Utc::now(),
            raw_payload: None,
        }
    }
}

/// A reply addressed to one session on one adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Adapter that must deliver this message.
    pub channel: String,

    pub session_key: SessionKey,

    pub content: String,

    /// Formatting hint for the target platform.
    #[serde(default)]
    pub format: MessageFormat,
}

impl OutboundMessage {
    /// Build the reply to `inbound`, addressed to the same adapter and session.
    pub fn reply_to(inbound: &InboundMessage, content: impl Into<String>) -> Self {
        Self {
            channel: inbound.channel.clone(),
            session_key: inbound.session_key.clone(),
            content: content.into(),
            format: MessageFormat::default(),
        }
    }
}

/// Formatting hint for outbound message content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageFormat {
    #[default]
    PlainText,
    Markdown,
}

/// Runtime connection state of a channel adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Connected,

    /// Attempting to establish or re-establish the connection.
    Connecting,

    /// Cleanly disconnected, or never started.
    Disconnected,

    Error(String),
}
