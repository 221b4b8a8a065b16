pub mod backoff;
pub mod channel;
pub mod error;
pub mod handler;
pub mod router;
pub mod types;

pub use backoff::Backoff;
pub use channel::{Channel, StartContext};
pub use error::{ChannelError, HandlerError, RouterError};
pub use handler::{handler_fn, MessageHandler};
pub use router::{Router, BUSY_REPLY, SHUTDOWN_REPLY};
pub use types::{ChannelStatus, InboundMessage, MessageFormat, OutboundMessage};
