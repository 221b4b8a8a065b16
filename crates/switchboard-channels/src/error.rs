use thiserror::Error;

/// Errors that can occur within any channel adapter.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The underlying transport could not be established.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The remote side rejected the supplied credentials or identity.
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// A message could not be delivered to the remote endpoint.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// The reply targets a session this adapter does not track.
    #[error("Unknown session: {0}")]
    UnknownSession(String),

    /// An operation exceeded its allowed time budget.
    #[error("Operation timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// The channel-specific configuration is invalid or missing.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ChannelError {
    /// `true` for failures to bring the transport up (network or auth).
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            ChannelError::ConnectionFailed(_) | ChannelError::AuthFailed(_) | ChannelError::Timeout { .. }
        )
    }
}

/// Failure reported by the message handler (the AI round trip).
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Errors from the router's registration and lifecycle API.
#[derive(Debug, Error)]
pub enum RouterError {
    /// The API was used out of order (register after start, double start, …).
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    /// One or more adapters failed to start; every started adapter was stopped.
    #[error("Startup aborted: {}", format_failures(failures))]
    Startup {
        failures: Vec<(String, ChannelError)>,
    },
}

fn format_failures(failures: &[(String, ChannelError)]) -> String {
    failures
        .iter()
        .map(|(name, err)| format!("{name}: {err}"))
        .collect::<Vec<_>>()
        .join("; ")
}
