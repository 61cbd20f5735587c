//! Message categories and their cooldown policy.

use std::fmt;

/// Classification used to pick a cooldown window for a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    SessionCompletion,
    SessionStart,
    Error,
    Warning,
    Completion,
    General,
    /// Caller-supplied label outside the fixed set (lowercased, trimmed).
    Custom(String),
}

/// Keyword table for inference, checked top to bottom. The first matching
/// row wins, so more specific phrases must come first.
const KEYWORDS: &[(&[&str], &str)] = &[
    (
        &["session completed", "session complete", "session ended"],
        "session_completion",
    ),
    (&["session started", "session start"], "session_start"),
    (&["error", "failed", "failure"], "error"),
    (&["warning"], "warning"),
    (&["finished", "completed", "done"], "completion"),
];

impl Category {
    /// Parse an explicit category label. Blank labels become `General`.
    pub fn parse(label: &str) -> Self {
        let label = label.trim().to_lowercase();
        match label.as_str() {
            "" | "general" => Self::General,
            "session_completion" => Self::SessionCompletion,
            "session_start" => Self::SessionStart,
            "error" => Self::Error,
            "warning" => Self::Warning,
            "completion" => Self::Completion,
            _ => Self::Custom(label),
        }
    }

    /// Infer a category from free text by keyword match.
    ///
    /// Texts are scanned in order; for each text the keyword table is
    /// applied in priority order. Falls back to `General`.
    pub fn infer<'a>(texts: impl IntoIterator<Item = &'a str>) -> Self {
        for text in texts {
            let lowered = text.to_lowercase();
            for (keywords, label) in KEYWORDS {
                if keywords.iter().any(|k| lowered.contains(k)) {
                    return Self::parse(label);
                }
            }
        }
        Self::General
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::SessionCompletion => "session_completion",
            Self::SessionStart => "session_start",
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Completion => "completion",
            Self::General => "general",
            Self::Custom(label) => label,
        }
    }

    /// Built-in cooldown in seconds. `None` for custom categories, which use
    /// the configured default.
    pub fn builtin_cooldown_secs(&self) -> Option<u64> {
        match self {
            Self::SessionCompletion => Some(300),
            Self::SessionStart => Some(300),
            Self::Error => Some(60),
            Self::Warning => Some(120),
            Self::Completion => Some(180),
            Self::General => Some(300),
            Self::Custom(_) => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
