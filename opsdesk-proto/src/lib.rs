//! Shared wire definitions for `OpsDesk` presence messaging.

pub mod codec;
pub mod envelope;
