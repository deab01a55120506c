//! Stop command handler

use super::HandlerContext;
use crate::command::CommandResult;
use rc_shared::{Command, ExecutionStatus};

/// Handle STOP
///
/// Always accepted: stopping is idempotent, so asking while nothing runs is
/// not an error.
pub fn handle_stop(ctx: &HandlerContext, _command: &Command) -> CommandResult {
    let before = ctx.engine.status();
    ctx.engine.stop();

    let message = if before == ExecutionStatus::Running {
        format!("Stop requested for run {}", ctx.engine.run_id())
    } else {
        format!("Nothing running ({before})")
    };
    CommandResult::Completed { message }
}
