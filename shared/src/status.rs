//! Execution status rules
//!
//! Defines which status transitions the engine may perform. Every run moves
//! strictly `Idle/terminal -> Running -> terminal`.

use std::fmt;

use crate::ExecutionStatus;

impl ExecutionStatus {
    /// Upper-case name used in logs and on the console
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Idle => "IDLE",
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Done => "DONE",
            ExecutionStatus::Error => "ERROR",
            ExecutionStatus::Cancelled => "CANCELLED",
        }
    }

    /// A run ended in this status; only a new submission leaves it
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Done | ExecutionStatus::Error | ExecutionStatus::Cancelled
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check if a transition from one status to another is valid
pub fn is_valid_transition(from: ExecutionStatus, to: ExecutionStatus) -> bool {
    use ExecutionStatus::*;

    match (from, to) {
        // A new run starts from idle or any terminal status
        (Idle | Done | Error | Cancelled, Running) => true,

        // A run ends in exactly one terminal status
        (Running, Done | Error | Cancelled) => true,

        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ExecutionStatus::*;

    #[test]
    fn test_initial_status() {
        assert_eq!(ExecutionStatus::default(), Idle);
        assert!(!Idle.is_terminal());
    }

    #[test]
    fn test_run_lifecycle() {
        assert!(is_valid_transition(Idle, Running));
        assert!(is_valid_transition(Running, Done));
        assert!(is_valid_transition(Running, Error));
        assert!(is_valid_transition(Running, Cancelled));
        assert!(is_valid_transition(Cancelled, Running));
        assert!(is_valid_transition(Done, Running));
    }

    #[test]
    fn test_invalid_transition() {
        // Nothing skips Running, nothing returns to Idle
        assert!(!is_valid_transition(Idle, Done));
        assert!(!is_valid_transition(Done, Cancelled));
        assert!(!is_valid_transition(Running, Running));
        assert!(!is_valid_transition(Running, Idle));
        assert!(!is_valid_transition(Error, Idle));
    }

    #[test]
    fn test_names() {
        assert_eq!(Cancelled.to_string(), "CANCELLED");
        assert_eq!(Running.as_str(), "RUNNING");
        assert!(Error.is_terminal());
    }
}
