//! Data models for the Command Center backend.
//!
//! Field names are camelCase on the wire to match the dashboard client.

mod document;
mod presence;

pub use document::*;
pub use presence::*;
