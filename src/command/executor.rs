//! Command executor - validates and dispatches incoming commands

use super::handlers::{self, HandlerContext};
use crate::engine::Engine;
use rc_shared::{envelope, now_ms, Ack, AckStatus, Command, CommandType, Envelope, Header, MessageType};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of command execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    /// Command handled to completion
    Completed { message: String },
    /// Command queued; its effect shows up in later status updates
    Accepted { message: String },
    /// Command rejected (malformed, expired, unknown)
    Rejected { message: String },
}

/// Executes commands received from a console
pub struct CommandExecutor {
    device_id: String,
    sequence_id: Arc<AtomicU64>,
    engine: Engine,
}

impl CommandExecutor {
    /// Create a new command executor
    pub fn new(device_id: String, sequence_id: Arc<AtomicU64>, engine: Engine) -> Self {
        Self {
            device_id,
            sequence_id,
            engine,
        }
    }

    /// Execute a command and return the appropriate ACK envelope
    pub fn execute(&self, command: &Command, header: &Header) -> Envelope {
        let start_time = now_ms();
        let cmd_type = CommandType::try_from(command.cmd_type).unwrap_or(CommandType::CmdUnknown);

        debug!(
            "[CMD] Executing command: id={} type={:?} from={}",
            command.command_id, cmd_type, header.device_id
        );

        if command.is_expired() {
            warn!("[CMD] Command {} expired", command.command_id);
            return self.create_ack(
                Ack::expired(header.sequence_id, command.command_id),
                0,
            );
        }

        let ctx = HandlerContext {
            engine: self.engine.clone(),
            command_id: command.command_id,
        };

        let result = match cmd_type {
            CommandType::CmdRunScript => handlers::handle_run_script(&ctx, command),
            CommandType::CmdStop => handlers::handle_stop(&ctx, command),
            CommandType::CmdStatusRequest => handlers::handle_status_request(&ctx, command),
            CommandType::CmdUnknown => CommandResult::Rejected {
                message: "Unknown command type".into(),
            },
        };

        let processing_time = now_ms().saturating_sub(start_time);
        let (status, message) = match result {
            CommandResult::Completed { message } => (AckStatus::AckCompleted, message),
            CommandResult::Accepted { message } => (AckStatus::AckAccepted, message),
            CommandResult::Rejected { message } => (AckStatus::AckRejected, message),
        };
        info!("[CMD] Command {} -> {:?}: {}", command.command_id, status, message);

        self.create_ack(
            Ack::with_status(header.sequence_id, command.command_id, status, message),
            processing_time,
        )
    }

    /// Wrap an ACK in an envelope with the next sequence ID
    fn create_ack(&self, mut ack: Ack, processing_time_ms: u64) -> Envelope {
        let seq = self.sequence_id.fetch_add(1, Ordering::SeqCst) + 1;
        ack.processing_time_ms = processing_time_ms;
        Envelope::new(
            &self.device_id,
            MessageType::MsgAck,
            seq,
            envelope::Payload::Ack(ack),
        )
    }
}
