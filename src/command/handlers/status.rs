//! Status request command handler

use super::HandlerContext;
use crate::command::CommandResult;
use rc_shared::Command;

/// Handle STATUS_REQUEST
pub fn handle_status_request(ctx: &HandlerContext, _command: &Command) -> CommandResult {
    CommandResult::Completed {
        message: format!("{} run={}", ctx.engine.status(), ctx.engine.run_id()),
    }
}
