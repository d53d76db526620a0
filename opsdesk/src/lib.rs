//! `OpsDesk` presence: real-time messaging layer of the operations console.

pub mod client;
pub mod config;
pub mod connection;
pub mod console;
pub mod focus;
pub mod router;
pub mod session;
pub mod transport;
