//! Command handlers for different command types

mod script;
mod status;
mod stop;

pub use script::handle_run_script;
pub use status::handle_status_request;
pub use stop::handle_stop;

use crate::engine::Engine;

/// Context passed to command handlers
#[derive(Clone)]
pub struct HandlerContext {
    pub engine: Engine,
    pub command_id: u64,
}
