use serde::{Deserialize, Serialize};
use serde_json::Value;

use switchboard_core::config::Secret;
use switchboard_core::types::SessionKey;

/// Client → Relay frame.
/// Wire: `{ "type": "reply", "id": "...", ... }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Auth(AuthFrame),
    Reply(ReplyFrame),
    VerifyResponse(VerifyResponse),
    /// Acknowledges receipt of an envelope so the relay stops redelivering it.
    Ack { id: String },
    Pong,
}

/// Relay → Client frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    AuthOk {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    AuthError {
        message: String,
    },
    Envelope(RelayEnvelope),
    /// The relay accepted the reply with this id; it can leave the outbox.
    Ack {
        id: String,
    },
    Ping,
}

/// First frame on every connection.
///
/// `ai_provider` = `"verify"` announces verify-only mode. The WeCom fields
/// are present only for the `wecom` platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthFrame {
    pub user_id: String,
    pub platform: String,
    pub ai_provider: String,
    pub ai_model: String,
    #[serde(default)]
    pub verify_only: bool,
    pub client_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corp_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<Secret>,
}

/// A reply addressed to one session on the relayed platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyFrame {
    /// Client-generated id; the relay acks with it.
    pub id: String,
    /// Envelope id of the message being answered, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,
    pub user_id: String,
    pub platform: String,
    pub session_key: SessionKey,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyResponse {
    /// Id of the `verify_challenge` envelope being answered.
    pub challenge_id: String,
    pub ok: bool,
    /// Decrypted echostr, to be returned verbatim to the platform.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plaintext: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorShape>,
}

impl VerifyResponse {
    pub fn ok(challenge_id: impl Into<String>, plaintext: impl Into<String>) -> Self {
        Self {
            challenge_id: challenge_id.into(),
            ok: true,
            plaintext: Some(plaintext.into()),
            error: None,
        }
    }

    pub fn err(challenge_id: impl Into<String>, code: &str, message: &str) -> Self {
        Self {
            challenge_id: challenge_id.into(),
            ok: false,
            plaintext: None,
            error: Some(ErrorShape {
                code: code.to_string(),
                message: message.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorShape {
    pub code: String,
    pub message: String,
}

/// One unit of platform traffic pushed by the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayEnvelope {
    pub id: String,
    pub user_id: String,
    pub platform: String,
    pub kind: EnvelopeKind,
    pub payload: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    Chat,
    VerifyChallenge,
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Chat payload for platforms the relay delivers in the clear.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPayload {
    pub chat_id: String,
    pub sender_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    pub text: String,
}

/// WeCom chat payload: the callback query parameters plus the `<Encrypt>` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeComChatPayload {
    pub msg_signature: String,
    pub timestamp: String,
    pub nonce: String,
    pub encrypt: String,
}

/// Callback URL verification challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengePayload {
    pub msg_signature: String,
    pub timestamp: String,
    pub nonce: String,
    pub echostr: String,
}

/// Reply payload for clear-text platforms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextReplyPayload {
    pub chat_id: String,
    pub text: String,
}

/// Reply payload for WeCom: the encrypted passive-reply envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeComReplyPayload {
    pub to_user: String,
    pub encrypted_xml: String,
}
