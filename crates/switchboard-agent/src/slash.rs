//! Slash commands, intercepted before the message reaches the provider.
//!
//! They only touch per-session settings, so every platform gets the same
//! behaviour without the adapters knowing about them.

use tracing::info;

use switchboard_core::types::SessionKey;
use switchboard_sessions::{SessionStore, ThinkingLevel};

/// What the commands may read besides the session store.
pub struct SlashContext<'a> {
    pub sessions: &'a SessionStore,
    pub provider: &'a str,
    pub model: &'a str,
}

/// Handle a slash command.
///
/// Returns `Some(reply)` if the message was a recognized command, `None` if it
/// should be forwarded to the provider.
///
/// Recognized commands:
///   `/help`                 list all available commands
///   `/think`                show the thinking level
///   `/think <level>`        set it (`off`, `low`, `medium`, `high`)
///   `/verbose [on|off]`     show or set verbose replies
///   `/reset`                restore default settings for this chat
///   `/status`               show provider, model and settings
pub fn handle_slash_command(message: &str, key: &SessionKey, ctx: &SlashContext<'_>) -> Option<String> {
    let trimmed = message.trim();
    if !trimmed.starts_with('/') {
        return None;
    }

    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let command = parts.next().unwrap_or_default().to_ascii_lowercase();
    let arg = parts.next().map(str::trim).filter(|a| !a.is_empty());

    match (command.as_str(), arg) {
        ("/help", _) => Some(help_text()),

        ("/think", None) => {
            let level = ctx.sessions.get(key).thinking_level;
            Some(format!(
                "Thinking level: **{level}**\n\nChange it with `/think off|low|medium|high`"
            ))
        }
        ("/think", Some(arg)) => match ThinkingLevel::parse(arg) {
            Some(level) => {
                ctx.sessions.set_thinking_level(key, level);
                info!(session = %key, %level, "thinking level changed via /think");
                Some(format!("Thinking level set to **{level}**"))
            }
            None => Some(format!(
                "Unknown thinking level: `{arg}`. Available: `off`, `low`, `medium`, `high`"
            )),
        },

        ("/verbose", None) => {
            let verbose = ctx.sessions.get(key).verbose;
            Some(format!("Verbose mode is **{}**", on_off(verbose)))
        }
        ("/verbose", Some(arg)) => match arg.to_ascii_lowercase().as_str() {
            "on" | "true" | "1" => {
                ctx.sessions.set_verbose(key, true);
                Some("Verbose mode **on**".to_string())
            }
            "off" | "false" | "0" => {
                ctx.sessions.set_verbose(key, false);
                Some("Verbose mode **off**".to_string())
            }
            other => Some(format!("Unknown option: `{other}`. Use `/verbose on` or `/verbose off`")),
        },

        ("/reset", _) => {
            ctx.sessions.clear(key);
            info!(session = %key, "session settings reset");
            Some("Session settings restored to defaults.".to_string())
        }

        ("/status", _) => {
            let settings = ctx.sessions.get(key);
            Some(format!(
                "**Status**\n- Provider: `{}`\n- Model: `{}`\n- Thinking: `{}`\n- Verbose: `{}`",
                ctx.provider,
                ctx.model,
                settings.thinking_level,
                on_off(settings.verbose),
            ))
        }

        // Not one of ours.
        _ => None,
    }
}

fn help_text() -> String {
    "**Commands**\n\
     - `/help`: show this help\n\
     - `/think`: show the thinking level\n\
     - `/think <off|low|medium|high>`: change how deeply the AI reasons\n\
     - `/verbose [on|off]`: show or toggle detailed replies\n\
     - `/reset`: restore default settings for this chat\n\
     - `/status`: show provider, model and settings"
        .to_string()
}

fn on_off(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(store: &SessionStore, key: &SessionKey, msg: &str) -> Option<String> {
        let ctx = SlashContext {
            sessions: store,
            provider: "claude",
            model: "claude-sonnet-4-20250514",
        };
        handle_slash_command(msg, key, &ctx)
    }

    #[test]
    fn plain_text_is_not_a_command() {
        let store = SessionStore::new();
        let key = SessionKey::for_chat("slack", "C1");
        assert!(run(&store, &key, "hello /think high").is_none());
        // unknown commands go to the AI too
        assert!(run(&store, &key, "/weather").is_none());
    }

    #[test]
    fn think_sets_level_case_insensitively() {
        let store = SessionStore::new();
        let key = SessionKey::for_chat("slack", "C1");
        let reply = run(&store, &key, "/THINK High").unwrap();
        assert!(reply.contains("high"));
        assert_eq!(store.get(&key).thinking_level, ThinkingLevel::High);
    }

    #[test]
    fn think_rejects_unknown_level_without_changing_it() {
        let store = SessionStore::new();
        let key = SessionKey::for_chat("slack", "C1");
        let reply = run(&store, &key, "/think extreme").unwrap();
        assert!(reply.contains("Unknown thinking level"));
        assert_eq!(store.get(&key).thinking_level, ThinkingLevel::Medium);
    }

    #[test]
    fn verbose_toggles_and_reports() {
        let store = SessionStore::new();
        let key = SessionKey::for_chat("telegram", "42");
        assert!(run(&store, &key, "/verbose").unwrap().contains("off"));
        run(&store, &key, "/verbose on").unwrap();
        assert!(store.get(&key).verbose);
        assert!(run(&store, &key, "/verbose maybe").unwrap().contains("Unknown option"));
        assert!(store.get(&key).verbose);
    }

    #[test]
    fn reset_restores_defaults() {
        let store = SessionStore::new();
        let key = SessionKey::for_chat("wecom", "zhangsan");
        run(&store, &key, "/think off").unwrap();
        run(&store, &key, "/verbose on").unwrap();
        run(&store, &key, "/reset").unwrap();
        let settings = store.get(&key);
        assert_eq!(settings.thinking_level, ThinkingLevel::Medium);
        assert!(!settings.verbose);
    }

    #[test]
    fn settings_are_per_session() {
        let store = SessionStore::new();
        let a = SessionKey::for_chat("slack", "A");
        let b = SessionKey::for_chat("slack", "B");
        run(&store, &a, "/think low").unwrap();
        assert_eq!(store.get(&b).thinking_level, ThinkingLevel::Medium);
    }

    #[test]
    fn status_lists_provider_and_settings() {
        let store = SessionStore::new();
        let key = SessionKey::for_chat("discord", "1");
        let status = run(&store, &key, "/status").unwrap();
        assert!(status.contains("claude-sonnet-4-20250514"));
        assert!(status.contains("medium"));
    }
}
