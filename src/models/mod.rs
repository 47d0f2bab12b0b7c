//! Data models for the partner-interaction features.
//!
//! Field names serialize in camelCase to match the mobile client's records.

mod burst;
mod heartbeat;
mod quest;
mod status;
mod synchro;

pub use burst::*;
pub use heartbeat::*;
pub use quest::*;
pub use status::*;
pub use synchro::*;
