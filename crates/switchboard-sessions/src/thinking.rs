use serde::{Deserialize, Serialize};
use std::fmt;

/// How much reasoning depth is requested from the model for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingLevel {
    /// No thinking instruction is added to the prompt.
    Off,
    Low,
    Medium,
    High,
}

impl ThinkingLevel {
    pub const ALL: [ThinkingLevel; 4] = [
        ThinkingLevel::Off,
        ThinkingLevel::Low,
        ThinkingLevel::Medium,
        ThinkingLevel::High,
    ];

    /// Parse from a string slug. Case-insensitive.
    ///
    /// Accepted values: `"off"`, `"low"`, `"medium"`, `"high"`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "off" => Some(ThinkingLevel::Off),
            "low" => Some(ThinkingLevel::Low),
            "medium" => Some(ThinkingLevel::Medium),
            "high" => Some(ThinkingLevel::High),
            _ => None,
        }
    }
}

/// New sessions start at `Medium`.
impl Default for ThinkingLevel {
    fn default() -> Self {
        ThinkingLevel::Medium
    }
}

impl fmt::Display for ThinkingLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ThinkingLevel::Off => "off",
            ThinkingLevel::Low => "low",
            ThinkingLevel::Medium => "medium",
            ThinkingLevel::High => "high",
        };
        f.write_str(label)
    }
}

/// Instruction fragment appended to the system prompt for `level`.
///
/// Empty for [`ThinkingLevel::Off`].
pub fn thinking_prompt(level: ThinkingLevel) -> &'static str {
    match level {
        ThinkingLevel::Off => "",
        ThinkingLevel::Low => {
            "\n\n## Thinking Mode: Low\nThink briefly before responding. Consider the main points."
        }
        ThinkingLevel::Medium => {
            "\n\n## Thinking Mode: Medium\nThink through the problem step by step. Consider multiple approaches."
        }
        ThinkingLevel::High => {
            "\n\n## Thinking Mode: High\nThink deeply and thoroughly. Analyze from multiple angles, consider edge cases, and reason carefully before responding."
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn off_prompt_is_empty() {
        assert_eq!(thinking_prompt(ThinkingLevel::Off), "");
    }

    #[test]
    fn high_prompt_differs_from_low() {
        let high = thinking_prompt(ThinkingLevel::High);
        let low = thinking_prompt(ThinkingLevel::Low);
        assert!(!high.is_empty());
        assert!(!low.is_empty());
        assert_ne!(high, low);
    }

    #[test]
    fn every_enabled_level_has_a_distinct_prompt() {
        let prompts: std::collections::HashSet<&str> = ThinkingLevel::ALL
            .iter()
            .map(|l| thinking_prompt(*l))
            .collect();
        assert_eq!(prompts.len(), ThinkingLevel::ALL.len());
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(ThinkingLevel::parse("HIGH"), Some(ThinkingLevel::High));
        assert_eq!(ThinkingLevel::parse(" off "), Some(ThinkingLevel::Off));
        assert_eq!(ThinkingLevel::parse("xhigh"), None);
    }

    #[test]
    fn display_round_trips() {
        for level in ThinkingLevel::ALL {
            assert_eq!(ThinkingLevel::parse(&level.to_string()), Some(level));
        }
    }

    #[test]
    fn default_is_medium() {
        assert_eq!(ThinkingLevel::default(), ThinkingLevel::Medium);
    }
}
