//! Wire messages exchanged between the controller and its consoles.
//!
//! Declared with prost derives directly instead of generated from a `.proto`
//! file; tags are stable and must never be reused.

use prost::{Enumeration, Message};

/// Kind of message carried by an [`Envelope`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum MessageType {
    MsgUnknown = 0,
    MsgHeartbeat = 1,
    MsgCommand = 2,
    MsgAck = 3,
    MsgStatus = 4,
    MsgLog = 5,
}

/// Commands a console can issue
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum CommandType {
    CmdUnknown = 0,
    CmdRunScript = 1,
    CmdStop = 2,
    CmdStatusRequest = 3,
}

/// Outcome reported back for a command
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum AckStatus {
    AckUnknown = 0,
    AckReceived = 1,
    AckAccepted = 2,
    AckCompleted = 3,
    AckFailed = 4,
    AckRejected = 5,
    AckExpired = 6,
}

/// The single current state of the script execution engine
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum ExecutionStatus {
    Idle = 0,
    Running = 1,
    Done = 2,
    Error = 3,
    Cancelled = 4,
}

/// Severity of a forwarded log line
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum LogLevel {
    LogDebug = 0,
    LogInfo = 1,
    LogWarn = 2,
    LogError = 3,
}

#[derive(Clone, PartialEq, Message)]
pub struct Header {
    #[prost(string, tag = "1")]
    pub device_id: String,
    #[prost(uint64, tag = "2")]
    pub sequence_id: u64,
    #[prost(uint64, tag = "3")]
    pub timestamp_ms: u64,
    #[prost(enumeration = "MessageType", tag = "4")]
    pub msg_type: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct Heartbeat {
    #[prost(uint64, tag = "1")]
    pub uptime_ms: u64,
    #[prost(enumeration = "ExecutionStatus", tag = "2")]
    pub status: i32,
    #[prost(bool, tag = "3")]
    pub healthy: bool,
}

#[derive(Clone, PartialEq, Message)]
pub struct Command {
    #[prost(uint64, tag = "1")]
    pub command_id: u64,
    #[prost(enumeration = "CommandType", tag = "2")]
    pub cmd_type: i32,
    /// Script text for `CmdRunScript`, empty otherwise
    #[prost(string, tag = "3")]
    pub source: String,
    /// Zero means the command never expires
    #[prost(uint64, tag = "4")]
    pub expires_at_ms: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct Ack {
    #[prost(uint64, tag = "1")]
    pub ack_sequence_id: u64,
    #[prost(uint64, tag = "2")]
    pub command_id: u64,
    #[prost(enumeration = "AckStatus", tag = "3")]
    pub status: i32,
    #[prost(string, tag = "4")]
    pub message: String,
    #[prost(uint64, tag = "5")]
    pub processing_time_ms: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct StatusReport {
    #[prost(enumeration = "ExecutionStatus", tag = "1")]
    pub status: i32,
    /// Monotonic id of the run the status belongs to, zero before the first run
    #[prost(uint64, tag = "2")]
    pub run_id: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct LogRecord {
    #[prost(enumeration = "LogLevel", tag = "1")]
    pub level: i32,
    #[prost(string, tag = "2")]
    pub message: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct Envelope {
    #[prost(message, optional, tag = "1")]
    pub header: Option<Header>,
    #[prost(oneof = "envelope::Payload", tags = "10, 11, 12, 13, 14")]
    pub payload: Option<envelope::Payload>,
}

pub mod envelope {
    use prost::Oneof;

    #[derive(Clone, PartialEq, Oneof)]
    pub enum Payload {
        #[prost(message, tag = "10")]
        Heartbeat(super::Heartbeat),
        #[prost(message, tag = "11")]
        Command(super::Command),
        #[prost(message, tag = "12")]
        Ack(super::Ack),
        #[prost(message, tag = "13")]
        Status(super::StatusReport),
        #[prost(message, tag = "14")]
        Log(super::LogRecord),
    }
}
