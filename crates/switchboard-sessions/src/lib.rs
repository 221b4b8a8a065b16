pub mod store;
pub mod thinking;

pub use store::{SessionSettings, SessionStore, SettingsHandle};
pub use thinking::{thinking_prompt, ThinkingLevel};
