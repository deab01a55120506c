//! Error taxonomy of the execution engine
//!
//! None of these ever escape the engine: each one is resolved into a log line
//! and, for errors raised while a task runs, a terminal status.

use std::fmt;

use thiserror::Error;

/// Script text could not be turned into a program; no task is started
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct CompileError {
    /// 1-based line in the executable body
    pub line: usize,
    pub message: String,
}

impl CompileError {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// Failure raised by a running script
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    /// A module or symbol the script imports is not available
    #[error("unresolved dependency (line {line}): {message}")]
    Dependency { line: usize, message: String },

    #[error("runtime error (line {line}): {message}")]
    Runtime { line: usize, message: String },
}

impl ScriptError {
    pub fn dependency(message: impl Into<String>) -> Self {
        Self::Dependency {
            line: 0,
            message: message.into(),
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime {
            line: 0,
            message: message.into(),
        }
    }

    /// Attach the statement line unless one is already set
    pub fn at_line(mut self, at: usize) -> Self {
        match &mut self {
            Self::Dependency { line, .. } | Self::Runtime { line, .. } if *line == 0 => *line = at,
            _ => {}
        }
        self
    }

    pub fn line(&self) -> usize {
        match self {
            Self::Dependency { line, .. } | Self::Runtime { line, .. } => *line,
        }
    }
}

/// Why a submission was refused before any task started
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("unsafe command '{entry}' in line: {line}")]
    RejectedUnsafe { entry: String, line: String },

    #[error("compile error at {location}: {source}")]
    Compile {
        location: String,
        #[source]
        source: CompileError,
    },
}

/// How a run reached its terminal status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed(ScriptError),
    /// The task panicked or was torn down by the runtime
    Crashed(String),
    Timeout,
    ManualCancel,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Completed => write!(f, "completed"),
            RunOutcome::Failed(e) => write!(f, "failed: {e}"),
            RunOutcome::Crashed(reason) => write!(f, "crashed: {reason}"),
            RunOutcome::Timeout => write!(f, "timed out"),
            RunOutcome::ManualCancel => write!(f, "stopped manually"),
        }
    }
}
