//! Client → Server messages

use serde::{Deserialize, Serialize};

/// Messages sent from viewers to the server.
///
/// The channel is best-effort: anything that does not parse into one of
/// these variants is dropped by the server without a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
}
