//! Command handling for the controller link
//!
//! This module handles:
//! - Validating commands received from a console
//! - Dispatching them to the execution engine
//! - Generating ACK responses

mod executor;
pub mod handlers;

pub use executor::{CommandExecutor, CommandResult};
