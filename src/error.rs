use thiserror::Error;

use crate::isa::ParseError;

/// Errors raised by the simulator.
///
/// Runtime errors never escape the execution engine: they terminate the
/// offending process and are reported through its step outcome.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("unknown register: {0}")]
    UnknownRegister(String),

    #[error("stack overflow in process {0}")]
    StackOverflow(String),

    #[error("stack underflow in process {0}")]
    StackUnderflow(String),

    #[error("jump target {target} outside of process range [0, {size})")]
    OutOfRangeJump { target: i64, size: usize },

    #[error("no space for {requested} instructions")]
    NoSpace { requested: usize },

    #[error("placement does not belong to the {0} allocator")]
    InvalidPlacement(String),

    #[error("unsupported interrupt: {0}")]
    UnsupportedInterrupt(String),

    #[error("no instruction found at address {0}")]
    InstructionNotFound(usize),

    #[error("malformed instruction: {0}")]
    MalformedInstruction(String),

    #[error("instruction register is empty")]
    EmptyInstructionRegister,

    #[error("invalid PCB slot: {0}")]
    InvalidSlot(usize),

    #[error("no free PCB slot")]
    NoFreeSlot,

    #[error("{0} queue is full")]
    QueueFull(&'static str),

    #[error("cannot dispatch finished process {0}")]
    ProcessFinished(String),

    #[error("PCB slot {slot} is already running on CPU {cpu}")]
    SlotBusy { slot: usize, cpu: usize },

    #[error("program not found: {0}")]
    ProgramNotFound(String),

    #[error("program {0} has no instructions")]
    EmptyProgram(String),

    #[error("program {0} is already on disk")]
    DuplicateProgram(String),

    #[error("no programs waiting for admission")]
    NoPendingPrograms,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("the system is running")]
    SystemRunning,
}

impl SimError {
    /// Allocator exhaustion and a full PCB table clear up once memory is freed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SimError::NoSpace { .. } | SimError::NoFreeSlot)
    }
}

pub type Result<T> = std::result::Result<T, SimError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        assert!(SimError::NoSpace { requested: 4 }.is_retryable());
        assert!(SimError::NoFreeSlot.is_retryable());
        assert!(!SimError::UnknownRegister("EX".to_string()).is_retryable());
    }

    #[test]
    fn test_error_messages() {
        let err = SimError::OutOfRangeJump { target: 7, size: 3 };
        assert_eq!(err.to_string(), "jump target 7 outside of process range [0, 3)");
        assert_eq!(
            SimError::UnsupportedInterrupt("21H".into()).to_string(),
            "unsupported interrupt: 21H"
        );
    }
}
