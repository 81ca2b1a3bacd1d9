// matcher.rs - Forbidden-action patterns.
//
// A pattern with glob metacharacters (`*`, `?`, `[`) is matched as a glob
// against the whole action. Anything else is a substring match. Both are
// case-insensitive. A glob that does not compile falls back to a substring
// match on its literal text, so a typo never silently unforbids an action.

use glob::{MatchOptions, Pattern};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone)]
pub struct ForbiddenPattern {
    raw: String,
    lowered: String,
    glob: Option<Pattern>,
}

impl ForbiddenPattern {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let lowered = raw.trim().to_lowercase();
        let glob = if lowered.contains(['*', '?', '[']) {
            match Pattern::new(&lowered) {
                Ok(p) => Some(p),
                Err(e) => {
                    tracing::warn!(pattern = %raw, error = %e, "forbidden pattern is not a valid glob; matching literally");
                    None
                }
            }
        } else {
            None
        };
        Self { raw, lowered, glob }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, action: &str) -> bool {
        if self.lowered.is_empty() {
            return false;
        }
        match &self.glob {
            Some(glob) => glob.matches_with(action, MATCH_OPTIONS),
            None => action.to_lowercase().contains(&self.lowered),
        }
    }
}
