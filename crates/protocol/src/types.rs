//! Core types shared across the protocol

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Activity label driving what an avatar displays.
///
/// The seven canonical labels are always available. Avatar packages may
/// declare extra labels, which round-trip through [`AvatarState::Custom`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AvatarState {
    #[default]
    Idle,
    Thinking,
    Writing,
    Bash,
    Error,
    Success,
    Waiting,
    Custom(String),
}

impl AvatarState {
    /// Canonical labels, in display order.
    pub const CANONICAL: [AvatarState; 7] = [
        AvatarState::Idle,
        AvatarState::Thinking,
        AvatarState::Writing,
        AvatarState::Bash,
        AvatarState::Error,
        AvatarState::Success,
        AvatarState::Waiting,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            AvatarState::Idle => "idle",
            AvatarState::Thinking => "thinking",
            AvatarState::Writing => "writing",
            AvatarState::Bash => "bash",
            AvatarState::Error => "error",
            AvatarState::Success => "success",
            AvatarState::Waiting => "waiting",
            AvatarState::Custom(name) => name,
        }
    }

    pub fn is_canonical(&self) -> bool {
        !matches!(self, AvatarState::Custom(_))
    }

    /// Look up a canonical label by name.
    pub fn canonical(name: &str) -> Option<AvatarState> {
        Self::CANONICAL
            .iter()
            .find(|state| state.as_str() == name)
            .cloned()
    }
}

impl From<String> for AvatarState {
    fn from(value: String) -> Self {
        AvatarState::canonical(&value).unwrap_or(AvatarState::Custom(value))
    }
}

impl From<&str> for AvatarState {
    fn from(value: &str) -> Self {
        AvatarState::canonical(value).unwrap_or_else(|| AvatarState::Custom(value.to_string()))
    }
}

impl From<AvatarState> for String {
    fn from(value: AvatarState) -> Self {
        match value {
            AvatarState::Custom(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

impl FromStr for AvatarState {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(AvatarState::from(s))
    }
}

impl fmt::Display for AvatarState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The authoritative state plus the instant it was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRecord {
    pub state: AvatarState,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl StateRecord {
    pub fn new(state: AvatarState, timestamp: u64) -> Self {
        Self { state, timestamp }
    }

    /// Initial record: `idle`, stamped now.
    pub fn initial() -> Self {
        Self::new(AvatarState::Idle, now_millis())
    }
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
