//! Kernel execution state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Execution state as reported by `status` messages.
///
/// Providers may report states beyond the well-known ones; those are kept
/// verbatim in `Other`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum KernelState {
    /// No status observed yet.
    #[default]
    Unknown,
    Starting,
    Idle,
    Busy,
    Restarting,
    Dead,
    Other(String),
}

impl KernelState {
    /// Wire name of the state.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Unknown => "unknown",
            Self::Starting => "starting",
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Restarting => "restarting",
            Self::Dead => "dead",
            Self::Other(s) => s,
        }
    }

    /// Whether an execution is in progress.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy)
    }
}

impl From<&str> for KernelState {
    fn from(s: &str) -> Self {
        match s {
            "" | "unknown" => Self::Unknown,
            "starting" => Self::Starting,
            "idle" => Self::Idle,
            "busy" => Self::Busy,
            "restarting" => Self::Restarting,
            "dead" => Self::Dead,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for KernelState {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<KernelState> for String {
    fn from(state: KernelState) -> Self {
        match state {
            KernelState::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for KernelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_states() {
        assert_eq!(KernelState::from("busy"), KernelState::Busy);
        assert_eq!(KernelState::from("idle"), KernelState::Idle);
        assert_eq!(KernelState::from(""), KernelState::Unknown);
        assert!(KernelState::Busy.is_busy());
        assert!(!KernelState::Idle.is_busy());
    }

    #[test]
    fn test_provider_defined_state() {
        let state = KernelState::from("autorestarting");
        assert_eq!(state, KernelState::Other("autorestarting".into()));
        assert_eq!(state.to_string(), "autorestarting");
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&KernelState::Starting).unwrap();
        assert_eq!(json, "\"starting\"");
        let parsed: KernelState = serde_json::from_str("\"dead\"").unwrap();
        assert_eq!(parsed, KernelState::Dead);
    }
}
