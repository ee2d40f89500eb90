//! agent-avatar protocol
//!
//! Shared types for communication between the agent-avatar server and its
//! viewers. Real-time messages are serialized as JSON over WebSocket; the
//! request types travel over the small HTTP API used by hook triggers.

pub mod api;
pub mod client;
pub mod server;
pub mod types;

pub use api::{AvatarDescriptor, SetStateRejection, SetStateRequest, SetStateResponse, StateAssets};
pub use client::ClientMessage;
pub use server::ServerMessage;
pub use types::*;
