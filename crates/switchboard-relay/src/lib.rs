//! Bridge to the cloud relay that forwards platform callbacks over a single
//! outbound WebSocket.

pub mod bridge;
pub mod frames;
pub mod outbox;

pub use bridge::{BridgeConfig, RelayBridge, VERIFY_ONLY_REPLY};
pub use frames::{ClientFrame, EnvelopeKind, RelayEnvelope, ServerFrame};
