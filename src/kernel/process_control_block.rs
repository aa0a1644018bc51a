use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};
use crate::isa::{Instruction, Register};

pub const STACK_SIZE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessState {
    /// Admitted, not yet in the ready queue.
    New,
    Ready,
    Running,
    Finished,
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcessState::New => "New",
            ProcessState::Ready => "Ready",
            ProcessState::Running => "Running",
            ProcessState::Finished => "Finished",
        };
        f.write_str(name)
    }
}

/// Where the allocator placed a process in the user area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Partition {
        index: usize,
        size: usize,
        internal_fragmentation: usize,
    },
    Buddy {
        block_index: usize,
        block_size: usize,
        level: u32,
        address: usize,
        internal_fragmentation: usize,
    },
}

impl Placement {
    pub fn assigned_size(&self) -> usize {
        match *self {
            Placement::Partition { size, .. } => size,
            Placement::Buddy { block_size, .. } => block_size,
        }
    }

    pub fn internal_fragmentation(&self) -> usize {
        match *self {
            Placement::Partition { internal_fragmentation, .. } => internal_fragmentation,
            Placement::Buddy { internal_fragmentation, .. } => internal_fragmentation,
        }
    }
}

/// The process control block. Holds a process's saved execution state.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessControlBlock {
    pub program_counter: usize,
    /// `[AC, AX, BX, CX, DX]`
    pub registers: [i32; 5],
    pub instruction_register: Option<Instruction>,
    pub comparison_flag: i32,
    pub state: ProcessState,

    pub priority: u32,
    pub cpu_time: u64,
    pub wait_time: u64,
    pub remaining_quantum: u32,
    /// Clock tick at which the process last entered the ready queue.
    pub ready_since: Option<u64>,

    id: u32,
    name: String,
    base_address: usize,
    instruction_count: usize,
    arrival_time: u64,

    stack: [i32; STACK_SIZE],
    stack_pointer: usize,

    placement: Option<Placement>,
}

impl ProcessControlBlock {
    pub fn new(
        id: u32,
        name: &str,
        base_address: usize,
        instruction_count: usize,
        arrival_time: u64,
    ) -> ProcessControlBlock {
        ProcessControlBlock {
            program_counter: 0,
            registers: [0; 5],
            instruction_register: None,
            comparison_flag: 0,
            state: ProcessState::New,
            priority: 0,
            cpu_time: 0,
            wait_time: 0,
            remaining_quantum: 0,
            ready_since: None,
            id,
            name: name.to_string(),
            base_address,
            instruction_count,
            arrival_time,
            stack: [0; STACK_SIZE],
            stack_pointer: 0,
            placement: None,
        }
    }

    pub fn get_id(&self) -> u32 {
        self.id
    }

    pub fn get_name(&self) -> &str {
        &self.name
    }

    pub fn get_base_address(&self) -> usize {
        self.base_address
    }

    pub fn get_instruction_count(&self) -> usize {
        self.instruction_count
    }

    pub fn get_arrival_time(&self) -> u64 {
        self.arrival_time
    }

    pub fn get_stack_pointer(&self) -> usize {
        self.stack_pointer
    }

    /// The occupied part of the stack, bottom first.
    pub fn stack(&self) -> &[i32] {
        &self.stack[..self.stack_pointer]
    }

    pub fn push(&mut self, value: i32) -> Result<()> {
        if self.stack_pointer >= STACK_SIZE {
            return Err(SimError::StackOverflow(self.name.clone()));
        }
        self.stack[self.stack_pointer] = value;
        self.stack_pointer += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> Result<i32> {
        if self.stack_pointer == 0 {
            return Err(SimError::StackUnderflow(self.name.clone()));
        }
        self.stack_pointer -= 1;
        Ok(self.stack[self.stack_pointer])
    }

    pub fn register(&self, register: Register) -> i32 {
        self.registers[register.index()]
    }

    pub fn set_register(&mut self, register: Register, value: i32) {
        self.registers[register.index()] = value;
    }

    pub fn remaining_instructions(&self) -> usize {
        self.instruction_count.saturating_sub(self.program_counter)
    }

    pub fn has_finished(&self) -> bool {
        self.state == ProcessState::Finished || self.program_counter >= self.instruction_count
    }

    /// Percentage of the program already executed.
    pub fn progress(&self) -> f64 {
        if self.instruction_count == 0 {
            return 0.0;
        }
        self.program_counter as f64 * 100.0 / self.instruction_count as f64
    }

    pub fn placement(&self) -> Option<&Placement> {
        self.placement.as_ref()
    }

    pub fn assign_placement(&mut self, placement: Placement) {
        self.placement = Some(placement);
    }

    pub fn release_placement(&mut self) -> Option<Placement> {
        self.placement.take()
    }

    pub fn internal_fragmentation(&self) -> usize {
        self.placement.map(|placement| placement.internal_fragmentation()).unwrap_or(0)
    }
}

impl fmt::Display for ProcessControlBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (ID: {}, State: {}, PC: {}/{})",
            self.name, self.id, self.state, self.program_counter, self.instruction_count
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcb_new() {
        let pcb = ProcessControlBlock::new(1, "sum", 1000, 3, 7);
        assert_eq!(pcb.get_id(), 1);
        assert_eq!(pcb.get_name(), "sum");
        assert_eq!(pcb.state, ProcessState::New);
        assert_eq!(pcb.remaining_instructions(), 3);
        assert_eq!(pcb.get_arrival_time(), 7);
        assert!(pcb.placement().is_none());
    }

    #[test]
    fn test_pcb_stack_overflow() {
        let mut pcb = ProcessControlBlock::new(1, "p", 0, 1, 0);
        for value in 0..5 {
            pcb.push(value).unwrap();
        }
        assert_eq!(pcb.get_stack_pointer(), 5);
        assert_eq!(pcb.push(5), Err(SimError::StackOverflow("p".to_string())));
        assert_eq!(pcb.stack(), &[0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_pcb_stack_underflow() {
        let mut pcb = ProcessControlBlock::new(1, "p", 0, 1, 0);
        pcb.push(9).unwrap();
        assert_eq!(pcb.pop(), Ok(9));
        assert_eq!(pcb.pop(), Err(SimError::StackUnderflow("p".to_string())));
        assert_eq!(pcb.get_stack_pointer(), 0);
    }

    #[test]
    fn test_pcb_registers() {
        let mut pcb = ProcessControlBlock::new(1, "p", 0, 1, 0);
        pcb.set_register(Register::Dx, 42);
        assert_eq!(pcb.register(Register::Dx), 42);
        assert_eq!(pcb.registers, [0, 0, 0, 0, 42]);
    }

    #[test]
    fn test_pcb_placement_fragmentation() {
        let mut pcb = ProcessControlBlock::new(1, "p", 128, 100, 0);
        pcb.assign_placement(Placement::Buddy {
            block_index: 1,
            block_size: 128,
            level: 7,
            address: 128,
            internal_fragmentation: 28,
        });
        assert_eq!(pcb.internal_fragmentation(), 28);
        assert_eq!(pcb.placement().map(|p| p.assigned_size()), Some(128));

        pcb.release_placement();
        assert_eq!(pcb.internal_fragmentation(), 0);
    }

    #[test]
    fn test_pcb_progress_and_finished() {
        let mut pcb = ProcessControlBlock::new(1, "p", 0, 4, 0);
        pcb.program_counter = 2;
        assert_eq!(pcb.progress(), 50.0);
        assert!(!pcb.has_finished());
        pcb.program_counter = 4;
        assert!(pcb.has_finished());
    }
}
