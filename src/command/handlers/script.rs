//! Run-script command handler

use super::HandlerContext;
use crate::command::CommandResult;
use rc_shared::Command;
use tracing::info;

/// Handle RUN_SCRIPT
///
/// The script is only queued; whether it runs is reported through status
/// updates and log records, not through the ACK.
pub fn handle_run_script(ctx: &HandlerContext, command: &Command) -> CommandResult {
    if command.source.trim().is_empty() {
        return CommandResult::Rejected {
            message: "Empty script".into(),
        };
    }

    info!(
        "[CMD] Queueing script from command {} ({} bytes)",
        ctx.command_id,
        command.source.len()
    );
    ctx.engine.run(command.source.as_str());

    CommandResult::Accepted {
        message: format!("Script queued, current status {}", ctx.engine.status()),
    }
}
