//! Controller link for operator consoles
//!
//! This module handles:
//! - Accepting console connections on the configured listener
//! - Routing received commands to the command executor
//! - Streaming status transitions, engine log lines and heartbeats back

mod server;

pub use server::{log_forwarder, LinkConfig, LinkServer};
