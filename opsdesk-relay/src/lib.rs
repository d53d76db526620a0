//! Reference relay for `OpsDesk` presence.
//!
//! Accepts WebSocket connections at `/ws`, registers each by username and
//! fans `chat` envelopes out by their `to` field. Used by the integration
//! tests and for local development.

pub mod config;
pub mod relay;
