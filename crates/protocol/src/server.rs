//! Server → Client messages

use serde::{Deserialize, Serialize};

use crate::types::{AvatarState, StateRecord};

/// Messages sent from server to viewers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once, right after a viewer connects.
    Welcome {
        state: AvatarState,
        timestamp: u64,
    },
    /// Sent to every open viewer on each accepted write.
    State {
        state: AvatarState,
        timestamp: u64,
    },
    Pong,
}

impl ServerMessage {
    pub fn welcome(record: &StateRecord) -> Self {
        ServerMessage::Welcome {
            state: record.state.clone(),
            timestamp: record.timestamp,
        }
    }

    pub fn state(record: &StateRecord) -> Self {
        ServerMessage::State {
            state: record.state.clone(),
            timestamp: record.timestamp,
        }
    }

    /// The carried state record, for the messages that have one.
    pub fn record(&self) -> Option<StateRecord> {
        match self {
            ServerMessage::Welcome { state, timestamp } | ServerMessage::State { state, timestamp } => {
                Some(StateRecord::new(state.clone(), *timestamp))
            }
            ServerMessage::Pong => None,
        }
    }
}
