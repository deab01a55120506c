//! RC Controller Shared Protocol Types
//!
//! This crate provides the wire messages, the frame codec and the execution
//! status rules shared by the controller and the operator console.

pub mod codec;
pub mod proto;
pub mod status;

use std::time::{SystemTime, UNIX_EPOCH};

// Re-export commonly used types at crate root
pub use proto::*;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Timing parameters shared by both ends of the link
pub mod timing {
    /// Heartbeat interval in milliseconds
    pub const HEARTBEAT_INTERVAL_MS: u64 = 1000;

    /// Interval at which the dispatch loop looks at the pending command
    pub const DISPATCH_INTERVAL_MS: u64 = 200;

    /// Interval at which a running script is polled for completion
    pub const SUPERVISOR_POLL_MS: u64 = 100;

    /// Maximum age for a command before it's considered expired
    pub const COMMAND_MAX_AGE_MS: u64 = 30000;
}

/// Builder helpers for creating messages
impl Header {
    /// Create a new header with the given device ID and message type
    pub fn new(device_id: impl Into<String>, msg_type: MessageType, sequence_id: u64) -> Self {
        Self {
            device_id: device_id.into(),
            sequence_id,
            timestamp_ms: now_ms(),
            msg_type: msg_type.into(),
        }
    }
}

impl Heartbeat {
    /// Create a new heartbeat message
    pub fn new(uptime_ms: u64, status: ExecutionStatus, healthy: bool) -> Self {
        Self {
            uptime_ms,
            status: status.into(),
            healthy,
        }
    }
}

impl Ack {
    /// Create an ACK with an explicit status
    pub fn with_status(
        sequence_id: u64,
        command_id: u64,
        status: AckStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            ack_sequence_id: sequence_id,
            command_id,
            status: status.into(),
            message: message.into(),
            processing_time_ms: 0,
        }
    }

    /// Create an ACK for an expired command
    pub fn expired(sequence_id: u64, command_id: u64) -> Self {
        Self::with_status(
            sequence_id,
            command_id,
            AckStatus::AckExpired,
            "Command expired",
        )
    }
}

impl Command {
    /// Build a run-script command
    pub fn run_script(command_id: u64, source: impl Into<String>) -> Self {
        Self {
            command_id,
            cmd_type: CommandType::CmdRunScript.into(),
            source: source.into(),
            expires_at_ms: now_ms() + timing::COMMAND_MAX_AGE_MS,
        }
    }

    /// Build a command that carries no script
    pub fn control(command_id: u64, cmd_type: CommandType) -> Self {
        Self {
            command_id,
            cmd_type: cmd_type.into(),
            source: String::new(),
            expires_at_ms: now_ms() + timing::COMMAND_MAX_AGE_MS,
        }
    }

    /// Check if this command has expired
    pub fn is_expired(&self) -> bool {
        if self.expires_at_ms == 0 {
            return false; // No expiry set
        }
        now_ms() > self.expires_at_ms
    }
}

impl LogRecord {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            message: message.into(),
        }
    }
}

impl Envelope {
    /// Wrap a payload with a freshly stamped header
    pub fn new(
        device_id: &str,
        msg_type: MessageType,
        sequence_id: u64,
        payload: envelope::Payload,
    ) -> Self {
        Self {
            header: Some(Header::new(device_id, msg_type, sequence_id)),
            payload: Some(payload),
        }
    }
}
