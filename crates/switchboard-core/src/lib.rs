pub mod config;
pub mod error;
pub mod types;

pub use config::{Secret, SwitchboardConfig, WeComCredentials};
pub use error::SwitchboardError;
pub use types::SessionKey;
