//! WeCom (Enterprise WeChat) callback cryptography and message envelopes.

pub mod crypto;
pub mod error;
pub mod message;

pub use crypto::{EncryptedReply, WeComCrypto};
pub use error::CryptoError;
pub use message::WeComMessage;
