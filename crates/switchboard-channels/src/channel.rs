use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    error::ChannelError,
    types::{ChannelStatus, InboundMessage, OutboundMessage},
};

/// What an adapter receives when the router starts it.
#[derive(Debug, Clone)]
pub struct StartContext {
    /// Shared queue every adapter pushes inbound messages into.
    pub inbound: mpsc::Sender<InboundMessage>,

    /// Cancelled when the router stops; background tasks must exit on it.
    pub shutdown: CancellationToken,
}

/// Common interface implemented by every platform adapter (Slack, Telegram,
/// the WeCom relay bridge, …).
///
/// Implementations must be `Send + Sync` so they can be stored in the
/// [`Router`](crate::router::Router) and driven from multiple Tokio tasks.
/// All methods take `&self`; adapters keep their mutable connection state
/// behind their own locks.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Stable lowercase identifier for this adapter (e.g. `"telegram"`).
    ///
    /// Used as the registry key inside the router and must be unique across
    /// all registered adapters.
    fn name(&self) -> &str;

    /// Connect and begin producing inbound messages into `ctx.inbound`.
    ///
    /// Returns once the adapter is connected; receiving continues on a
    /// background task until `ctx.shutdown` fires or [`stop`](Channel::stop)
    /// is called.
    async fn start(&self, ctx: StartContext) -> Result<(), ChannelError>;

    /// Stop receiving and release the connection.
    ///
    /// Best effort. Safe to call repeatedly, and safe to call when `start`
    /// never ran or failed.
    async fn stop(&self);

    /// Deliver a single outbound message.
    ///
    /// Returns [`ChannelError::UnknownSession`] when the adapter cannot map
    /// `msg.session_key` to a destination.
    async fn send(&self, msg: &OutboundMessage) -> Result<(), ChannelError>;

    /// Return the current runtime status without blocking.
    fn status(&self) -> ChannelStatus;
}
