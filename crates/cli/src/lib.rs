//! agent-avatar CLI
//!
//! Client-side pieces of agent-avatar: the short-lived `set`/`get`
//! triggers hooks invoke, and the terminal viewer that renders the avatar
//! from the server's real-time channel.

pub mod animation;
pub mod client;
pub mod detect;
pub mod frames;
pub mod render;
pub mod trigger;
pub mod viewer;

pub use viewer::{run_viewer, ViewerSettings};
