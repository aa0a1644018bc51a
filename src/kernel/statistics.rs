use std::fmt;

use serde::{Deserialize, Serialize};

use super::process_control_block::{ProcessControlBlock, ProcessState};

/// Per-process figures recorded when a process terminates. Times are in
/// clock ticks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessStatistics {
    pub process_id: u32,
    pub name: String,
    pub cpu: usize,
    pub start_timestamp: u64,
    pub finish_timestamp: u64,
    pub cpu_time_used: u64,
    pub wait_time: u64,
    pub instruction_count: usize,
    pub final_state: ProcessState,
    /// The runtime error that ended the process, if any.
    pub fault: Option<String>,
}

impl ProcessStatistics {
    pub fn from_pcb(
        pcb: &ProcessControlBlock,
        cpu: usize,
        finish_timestamp: u64,
        fault: Option<String>,
    ) -> ProcessStatistics {
        ProcessStatistics {
            process_id: pcb.get_id(),
            name: pcb.get_name().to_string(),
            cpu,
            start_timestamp: pcb.get_arrival_time(),
            finish_timestamp,
            cpu_time_used: pcb.cpu_time,
            wait_time: pcb.wait_time,
            instruction_count: pcb.get_instruction_count(),
            final_state: pcb.state,
            fault,
        }
    }

    pub fn turnaround_time(&self) -> u64 {
        self.finish_timestamp.saturating_sub(self.start_timestamp)
    }
}

impl fmt::Display for ProcessStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = match (&self.fault, self.final_state) {
            (Some(fault), _) => fault.as_str(),
            (None, ProcessState::Finished) => "ok",
            (None, _) => "-",
        };

        write!(
            f,
            "... {:02} | {:<12} | {:>3} | {:>5} | {:>6} | {:>8} | {:>4} | {:>10} | {}",
            self.process_id,
            self.name,
            self.cpu,
            self.start_timestamp,
            self.finish_timestamp,
            self.cpu_time_used,
            self.wait_time,
            self.turnaround_time(),
            result
        )
    }
}
