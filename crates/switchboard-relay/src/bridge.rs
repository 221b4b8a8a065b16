use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use switchboard_channels::{
    Backoff, Channel, ChannelError, ChannelStatus, InboundMessage, OutboundMessage, StartContext,
};
use switchboard_core::config::{SwitchboardConfig, WeComCredentials, VERIFY_PROVIDER};
use switchboard_core::types::{SessionKey, WECOM};
use switchboard_wecom::message::{encrypted_envelope_xml, text_reply_xml, WeComMessage};
use switchboard_wecom::WeComCrypto;

use crate::frames::{
    AuthFrame, ChallengePayload, ChatPayload, ClientFrame, EnvelopeKind, RelayEnvelope,
    ReplyFrame, ServerFrame, TextReplyPayload, VerifyResponse, WeComChatPayload,
    WeComReplyPayload,
};
use crate::outbox::{Outbox, Route, Routes, SeenIds};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How many envelope ids are remembered for de-duplication.
const SEEN_CAPACITY: usize = 1024;
/// Sessions whose reply route is remembered.
const ROUTE_CAPACITY: usize = 4096;

/// Reply sent for every chat message while in verify-only mode.
pub const VERIFY_ONLY_REPLY: &str =
    "This bot is in verification mode and is not connected to an AI provider yet. \
     Finish the callback setup, then restart it with `switchboard relay`.";

/// Everything a [`RelayBridge`] needs to connect and authenticate.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub user_id: String,
    pub platform: String,
    pub server_url: String,
    pub ai_provider: String,
    pub ai_model: String,
    pub wecom: Option<WeComCredentials>,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
    pub connect_timeout_ms: u64,
    pub outbox_capacity: usize,
}

impl BridgeConfig {
    /// Build from the loaded configuration. Requires the relay identity.
    pub fn from_config(config: &SwitchboardConfig) -> Result<Self, ChannelError> {
        let relay = &config.relay;
        let user_id = relay
            .user_id
            .clone()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ChannelError::ConfigError("relay.user_id is required".to_string()))?;
        let platform = relay
            .platform
            .clone()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ChannelError::ConfigError("relay.platform is required".to_string()))?;

        let wecom = (platform == WECOM).then(|| config.wecom.clone());
        Ok(Self {
            user_id,
            platform,
            server_url: relay.server_url.clone(),
            ai_provider: config.ai.provider.clone(),
            ai_model: config.ai.model.clone().unwrap_or_default(),
            wecom,
            reconnect_base_ms: relay.reconnect_base_ms,
            reconnect_max_ms: relay.reconnect_max_ms,
            connect_timeout_ms: relay.connect_timeout_ms,
            outbox_capacity: relay.outbox_capacity,
        })
    }

    /// A verify-only bridge: full handshake, but chat is never forwarded.
    pub fn verify_only(
        user_id: impl Into<String>,
        platform: impl Into<String>,
        server_url: impl Into<String>,
        wecom: Option<WeComCredentials>,
    ) -> Self {
        let defaults = switchboard_core::config::RelayConfig::default();
        Self {
            user_id: user_id.into(),
            platform: platform.into(),
            server_url: server_url.into(),
            ai_provider: VERIFY_PROVIDER.to_string(),
            ai_model: VERIFY_PROVIDER.to_string(),
            wecom,
            reconnect_base_ms: defaults.reconnect_base_ms,
            reconnect_max_ms: defaults.reconnect_max_ms,
            connect_timeout_ms: defaults.connect_timeout_ms,
            outbox_capacity: defaults.outbox_capacity,
        }
    }

    pub fn is_verify_only(&self) -> bool {
        self.ai_provider == VERIFY_PROVIDER
    }

    fn auth_frame(&self) -> AuthFrame {
        AuthFrame {
            user_id: self.user_id.clone(),
            platform: self.platform.clone(),
            ai_provider: self.ai_provider.clone(),
            ai_model: self.ai_model.clone(),
            verify_only: self.is_verify_only(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            corp_id: self.wecom.as_ref().map(|w| w.corp_id.clone()),
            agent_id: self.wecom.as_ref().map(|w| w.agent_id.clone()),
            secret: self.wecom.as_ref().map(|w| w.secret.clone()),
        }
    }
}

struct Shared {
    config: BridgeConfig,
    crypto: Option<WeComCrypto>,
    outbox: Mutex<Outbox>,
    outbox_ready: Notify,
    seen: Mutex<SeenIds>,
    routes: RwLock<Routes>,
    status: RwLock<ChannelStatus>,
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// A [`Channel`] that multiplexes one platform over a persistent WebSocket
/// connection to the cloud relay.
///
/// Replies are queued in an outbox and written on the live connection; an
/// entry stays until the relay acks it, so nothing queued is lost across
/// reconnects. Envelope ids are remembered so a redelivered message reaches
/// the router once.
pub struct RelayBridge {
    shared: Arc<Shared>,
    running: tokio::sync::Mutex<Option<Running>>,
}

impl RelayBridge {
    pub fn new(config: BridgeConfig) -> Result<Self, ChannelError> {
        let crypto = match &config.wecom {
            Some(creds) => {
                let missing = creds.missing_fields();
                if !missing.is_empty() {
                    return Err(ChannelError::ConfigError(format!(
                        "wecom credentials incomplete: missing {}",
                        missing.join(", ")
                    )));
                }
                Some(
                    WeComCrypto::from_credentials(creds)
                        .map_err(|e| ChannelError::ConfigError(e.to_string()))?,
                )
            }
            None => None,
        };

        Ok(Self {
            shared: Arc::new(Shared {
                outbox: Mutex::new(Outbox::new(config.outbox_capacity)),
                outbox_ready: Notify::new(),
                seen: Mutex::new(SeenIds::new(SEEN_CAPACITY)),
                routes: RwLock::new(Routes::new(ROUTE_CAPACITY)),
                status: RwLock::new(ChannelStatus::Disconnected),
                crypto,
                config,
            }),
            running: tokio::sync::Mutex::new(None),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.shared.config
    }

    /// Replies not yet acknowledged by the relay.
    pub fn pending_replies(&self) -> usize {
        lock(&self.shared.outbox).len()
    }
}

#[async_trait]
impl Channel for RelayBridge {
    fn name(&self) -> &str {
        &self.shared.config.platform
    }

    async fn start(&self, ctx: StartContext) -> Result<(), ChannelError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(());
        }

        self.shared.set_status(ChannelStatus::Connecting);
        let ws = match self.shared.connect().await {
            Ok(ws) => ws,
            Err(e) => {
                self.shared.set_status(ChannelStatus::Error(e.to_string()));
                return Err(e);
            }
        };

        let cancel = ctx.shutdown.child_token();
        let task = tokio::spawn(connection_loop(
            Arc::clone(&self.shared),
            ws,
            ctx.inbound,
            cancel.clone(),
        ));
        *running = Some(Running { cancel, task });
        Ok(())
    }

    async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };
        running.cancel.cancel();
        if let Err(e) = running.task.await {
            error!(channel = %self.name(), error = %e, "relay connection task panicked");
        }
        self.shared.set_status(ChannelStatus::Disconnected);
        info!(channel = %self.name(), pending = self.pending_replies(), "relay bridge stopped");
    }

    async fn send(&self, msg: &OutboundMessage) -> Result<(), ChannelError> {
        let route = self
            .shared
            .routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&msg.session_key)
            .cloned()
            .ok_or_else(|| ChannelError::UnknownSession(msg.session_key.to_string()))?;

        let payload = self.shared.reply_payload(&route.chat_id, &msg.content)?;
        self.shared
            .enqueue(msg.session_key.clone(), Some(route.last_envelope), payload)
    }

    fn status(&self) -> ChannelStatus {
        self.shared
            .status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Shared {
    fn set_status(&self, status: ChannelStatus) {
        *self.status.write().unwrap_or_else(PoisonError::into_inner) = status;
    }

    /// Open the socket and complete auth, all within the connect timeout.
    async fn connect(&self) -> Result<WsStream, ChannelError> {
        let budget = self.config.connect_timeout_ms;
        match timeout(Duration::from_millis(budget), self.handshake()).await {
            Ok(result) => result,
            Err(_) => Err(ChannelError::Timeout { ms: budget }),
        }
    }

    async fn handshake(&self) -> Result<WsStream, ChannelError> {
        let url = &self.config.server_url;
        debug!(url = %url, "connecting to relay");
        let (mut ws, _) = connect_async(url.as_str())
            .await
            .map_err(|e| ChannelError::ConnectionFailed(format!("{url}: {e}")))?;

        let auth = ClientFrame::Auth(self.config.auth_frame());
        write_frame(&mut ws, &auth)
            .await
            .map_err(ChannelError::ConnectionFailed)?;

        loop {
            let msg = ws
                .next()
                .await
                .ok_or_else(|| ChannelError::ConnectionFailed("closed during auth".to_string()))?
                .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;
            let text = match msg {
                Message::Text(text) => text,
                Message::Close(_) => {
                    return Err(ChannelError::ConnectionFailed(
                        "closed during auth".to_string(),
                    ))
                }
                _ => continue,
            };
            match serde_json::from_str::<ServerFrame>(&text) {
                Ok(ServerFrame::AuthOk { session_id }) => {
                    info!(
                        platform = %self.config.platform,
                        user_id = %self.config.user_id,
                        session_id = session_id.as_deref().unwrap_or("-"),
                        verify_only = self.config.is_verify_only(),
                        "relay authenticated"
                    );
                    return Ok(ws);
                }
                Ok(ServerFrame::AuthError { message }) => {
                    return Err(ChannelError::AuthFailed(message));
                }
                Ok(ServerFrame::Ping) => {
                    write_frame(&mut ws, &ClientFrame::Pong)
                        .await
                        .map_err(ChannelError::ConnectionFailed)?;
                }
                Ok(other) => {
                    return Err(ChannelError::AuthFailed(format!(
                        "unexpected frame before auth_ok: {other:?}"
                    )));
                }
                Err(e) => {
                    return Err(ChannelError::AuthFailed(format!("malformed auth reply: {e}")));
                }
            }
        }
    }

    fn reply_payload(&self, chat_id: &str, text: &str) -> Result<serde_json::Value, ChannelError> {
        let value = match &self.crypto {
            Some(crypto) => {
                let now = chrono::Utc::now().timestamp();
                let xml = text_reply_xml(chat_id, crypto.corp_id(), now, text);
                let nonce = rand::random::<u32>().to_string();
                let reply = crypto
                    .encrypt_message(&xml, &now.to_string(), &nonce)
                    .map_err(|e| ChannelError::SendFailed(e.to_string()))?;
                serde_json::to_value(WeComReplyPayload {
                    to_user: chat_id.to_string(),
                    encrypted_xml: encrypted_envelope_xml(&reply),
                })
            }
            None => serde_json::to_value(TextReplyPayload {
                chat_id: chat_id.to_string(),
                text: text.to_string(),
            }),
        };
        value.map_err(|e| ChannelError::SendFailed(e.to_string()))
    }

    fn enqueue(
        &self,
        session_key: SessionKey,
        in_reply_to: Option<String>,
        payload: serde_json::Value,
    ) -> Result<(), ChannelError> {
        let frame = ReplyFrame {
            id: uuid::Uuid::new_v4().to_string(),
            in_reply_to,
            user_id: self.config.user_id.clone(),
            platform: self.config.platform.clone(),
            session_key,
            payload,
        };
        let id = frame.id.clone();
        lock(&self.outbox).push(frame).map_err(|_| {
            ChannelError::SendFailed(format!(
                "outbox full ({} unacknowledged replies)",
                self.config.outbox_capacity
            ))
        })?;
        debug!(reply_id = %id, "reply queued");
        self.outbox_ready.notify_one();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Connection task
// ---------------------------------------------------------------------------

/// Serve `first`, then keep reconnecting with backoff until cancelled.
async fn connection_loop(
    shared: Arc<Shared>,
    first: WsStream,
    inbound: mpsc::Sender<InboundMessage>,
    cancel: CancellationToken,
) {
    let platform = shared.config.platform.clone();
    let mut backoff = Backoff::from_millis(
        shared.config.reconnect_base_ms,
        shared.config.reconnect_max_ms,
    );
    let mut next = Some(first);

    loop {
        let ws = match next.take() {
            Some(ws) => ws,
            None => {
                let delay = backoff.next_delay();
                warn!(
                    channel = %platform,
                    attempt = backoff.attempt(),
                    retry_after_ms = delay.as_millis() as u64,
                    "relay connection lost, reconnecting"
                );
                shared.set_status(ChannelStatus::Connecting);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
                let attempt = tokio::select! {
                    _ = cancel.cancelled() => break,
                    r = shared.connect() => r,
                };
                match attempt {
                    Ok(ws) => ws,
                    Err(e) => {
                        warn!(channel = %platform, error = %e, "relay reconnect failed");
                        shared.set_status(ChannelStatus::Error(e.to_string()));
                        continue;
                    }
                }
            }
        };

        backoff.reset();
        shared.set_status(ChannelStatus::Connected);
        match serve(&shared, ws, &inbound, &cancel).await {
            Ok(()) => break,
            Err(reason) => {
                warn!(channel = %platform, reason = %reason, "relay connection ended");
            }
        }
    }

    shared.set_status(ChannelStatus::Disconnected);
    debug!(channel = %platform, "relay connection task exiting");
}

/// Drive one authenticated connection. `Ok` means shutdown was requested,
/// `Err` carries the reason the connection was lost.
async fn serve(
    shared: &Shared,
    ws: WsStream,
    inbound: &mpsc::Sender<InboundMessage>,
    cancel: &CancellationToken,
) -> Result<(), String> {
    let (mut sink, mut source) = ws.split();
    // Every unacked reply is written again on a fresh connection.
    let mut next_seq = 0u64;

    loop {
        let pending = lock(&shared.outbox).since(next_seq);
        for (seq, frame) in pending {
            debug!(reply_id = %frame.id, seq, "writing reply");
            write_frame(&mut sink, &ClientFrame::Reply(frame)).await?;
            next_seq = seq + 1;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return Ok(());
            }
            _ = shared.outbox_ready.notified() => {}
            msg = source.next() => match msg {
                None => return Err("closed by relay".to_string()),
                Some(Err(e)) => return Err(e.to_string()),
                Some(Ok(Message::Text(text))) => {
                    for frame in handle_text(shared, &text, inbound).await {
                        write_frame(&mut sink, &frame).await?;
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    sink.send(Message::Pong(data)).await.map_err(|e| e.to_string())?;
                }
                Some(Ok(Message::Close(_))) => return Err("closed by relay".to_string()),
                Some(Ok(_)) => {}
            },
        }
    }
}

/// Process one relay frame; returns the frames to write back.
async fn handle_text(
    shared: &Shared,
    text: &str,
    inbound: &mpsc::Sender<InboundMessage>,
) -> Vec<ClientFrame> {
    let frame = match serde_json::from_str::<ServerFrame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "ignoring malformed relay frame");
            return Vec::new();
        }
    };

    match frame {
        ServerFrame::Ping => vec![ClientFrame::Pong],
        ServerFrame::Ack { id } => {
            if lock(&shared.outbox).ack(&id) {
                debug!(reply_id = %id, "reply acknowledged");
            }
            Vec::new()
        }
        ServerFrame::AuthOk { .. } => Vec::new(),
        ServerFrame::AuthError { message } => {
            warn!(message = %message, "relay reported auth error on live connection");
            Vec::new()
        }
        ServerFrame::Envelope(env) => match env.kind {
            EnvelopeKind::VerifyChallenge => vec![answer_challenge(shared, &env)],
            EnvelopeKind::Chat => handle_chat(shared, env, inbound).await,
        },
    }
}

fn answer_challenge(shared: &Shared, env: &RelayEnvelope) -> ClientFrame {
    let response = match (&shared.crypto, serde_json::from_value::<ChallengePayload>(env.payload.clone())) {
        (None, _) => VerifyResponse::err(
            &env.id,
            "NOT_CONFIGURED",
            "no callback credentials for this platform",
        ),
        (Some(_), Err(e)) => VerifyResponse::err(&env.id, "MALFORMED_PAYLOAD", &e.to_string()),
        (Some(crypto), Ok(p)) => {
            match crypto.verify_url(&p.msg_signature, &p.timestamp, &p.nonce, &p.echostr) {
                Ok(plaintext) => {
                    info!(challenge_id = %env.id, "callback verification challenge answered");
                    VerifyResponse::ok(&env.id, plaintext)
                }
                Err(e) => {
                    warn!(challenge_id = %env.id, code = e.code(), error = %e, "callback verification rejected");
                    VerifyResponse::err(&env.id, e.code(), &e.to_string())
                }
            }
        }
    };
    ClientFrame::VerifyResponse(response)
}

async fn handle_chat(
    shared: &Shared,
    env: RelayEnvelope,
    inbound: &mpsc::Sender<InboundMessage>,
) -> Vec<ClientFrame> {
    let ack = ClientFrame::Ack { id: env.id.clone() };

    if !lock(&shared.seen).insert(&env.id) {
        debug!(envelope_id = %env.id, "duplicate envelope, acknowledging only");
        return vec![ack];
    }

    let parsed = match &shared.crypto {
        Some(crypto) => decode_wecom(crypto, &env),
        None => serde_json::from_value::<ChatPayload>(env.payload.clone())
            .map(Some)
            .map_err(|e| e.to_string()),
    };
    let chat = match parsed {
        Ok(Some(chat)) => chat,
        Ok(None) => {
            debug!(envelope_id = %env.id, "non-text message ignored");
            return vec![ack];
        }
        Err(reason) => {
            // Hostile or broken input is dropped, not retried.
            warn!(envelope_id = %env.id, reason = %reason, "rejected chat envelope");
            return vec![ack];
        }
    };

    let platform = &shared.config.platform;
    let session_key = SessionKey::for_chat(platform, &chat.chat_id);

    if shared.config.is_verify_only() {
        let queued = shared
            .reply_payload(&chat.chat_id, VERIFY_ONLY_REPLY)
            .and_then(|payload| shared.enqueue(session_key, Some(env.id.clone()), payload));
        if let Err(e) = queued {
            warn!(envelope_id = %env.id, error = %e, "could not queue verify-mode reply");
        }
        return vec![ack];
    }

    shared
        .routes
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(
            session_key.clone(),
            Route {
                chat_id: chat.chat_id.clone(),
                last_envelope: env.id.clone(),
            },
        );

    let mut msg = InboundMessage::new(platform, session_key, &chat.sender_id, &chat.text);
    msg.sender_name = chat.sender_name;
    msg.raw_payload = Some(env.payload);

    if inbound.send(msg).await.is_err() {
        // Router is gone; leave it unacked and unseen so a redelivery gets through.
        lock(&shared.seen).remove(&env.id);
        warn!(envelope_id = %env.id, "router inbound closed, envelope not acknowledged");
        return Vec::new();
    }
    vec![ack]
}

/// Signature check, decrypt and parse a WeCom chat payload.
/// `Ok(None)` for messages without text (events, images, …).
fn decode_wecom(crypto: &WeComCrypto, env: &RelayEnvelope) -> Result<Option<ChatPayload>, String> {
    let p: WeComChatPayload =
        serde_json::from_value(env.payload.clone()).map_err(|e| e.to_string())?;
    let xml = crypto
        .decrypt_message(&p.msg_signature, &p.timestamp, &p.nonce, &p.encrypt)
        .map_err(|e| format!("{}: {e}", e.code()))?;
    let msg = WeComMessage::parse(&xml).map_err(|e| e.to_string())?;
    Ok(msg.text().map(|text| ChatPayload {
        chat_id: msg.from_user_name.clone(),
        sender_id: msg.from_user_name.clone(),
        sender_name: None,
        text: text.to_string(),
    }))
}

async fn write_frame<S>(sink: &mut S, frame: &ClientFrame) -> Result<(), String>
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let json = serde_json::to_string(frame).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json)).await.map_err(|e| e.to_string())
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
