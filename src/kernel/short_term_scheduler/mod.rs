mod fifo;
mod hrrn;
mod round_robin;
mod sjf;
mod srt;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::dispatcher::Dispatcher;
use super::memory::MemoryStore;
use super::process_control_block::ProcessControlBlock;
use crate::error::Result;

pub use fifo::FifoScheduler;
pub use hrrn::HrrnScheduler;
pub use round_robin::RoundRobinScheduler;
pub use sjf::SjfScheduler;
pub use srt::SrtScheduler;

pub const DEFAULT_QUANTUM: u32 = 3;

/// What a CPU should run next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Dispatch this slot. Preemptive policies have already moved the
    /// incumbent back to the ready queue.
    Dispatch(usize),
    KeepCurrent,
    Idle,
}

/// A CPU scheduling policy. One instance serves one CPU.
pub trait Scheduler: Send {
    fn select_next(
        &mut self,
        store: &mut MemoryStore,
        dispatcher: &Dispatcher,
    ) -> Result<Selection>;

    fn on_process_added(&mut self, _pcb: &ProcessControlBlock) {}

    fn on_process_finished(&mut self, _pcb: &ProcessControlBlock) {}

    fn reset(&mut self) {}

    fn name(&self) -> &'static str;

    /// Non-preemptive schedulers are only consulted while their CPU is idle.
    fn is_preemptive(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchedulingAlgorithm {
    Fifo,
    Sjf,
    Srt,
    RoundRobin { quantum: u32 },
    Hrrn,
}

impl SchedulingAlgorithm {
    pub fn build(&self) -> Box<dyn Scheduler> {
        match *self {
            SchedulingAlgorithm::Fifo => Box::new(FifoScheduler::new()),
            SchedulingAlgorithm::Sjf => Box::new(SjfScheduler::new()),
            SchedulingAlgorithm::Srt => Box::new(SrtScheduler::new()),
            SchedulingAlgorithm::RoundRobin { quantum } => {
                Box::new(RoundRobinScheduler::new(quantum))
            }
            SchedulingAlgorithm::Hrrn => Box::new(HrrnScheduler::new()),
        }
    }
}

impl Default for SchedulingAlgorithm {
    fn default() -> SchedulingAlgorithm {
        SchedulingAlgorithm::Fifo
    }
}

impl fmt::Display for SchedulingAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulingAlgorithm::Fifo => f.write_str("FIFO"),
            SchedulingAlgorithm::Sjf => f.write_str("SJF"),
            SchedulingAlgorithm::Srt => f.write_str("SRT"),
            SchedulingAlgorithm::RoundRobin { quantum } => write!(f, "RR (quantum {})", quantum),
            SchedulingAlgorithm::Hrrn => f.write_str("HRRN"),
        }
    }
}

/// Accepts `fifo`, `sjf`, `srt`, `hrrn`, `rr` and `rr:<quantum>`.
impl FromStr for SchedulingAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let (kind, quantum) = match lower.split_once(':') {
            Some((kind, quantum)) => (kind, Some(quantum)),
            None => (lower.as_str(), None),
        };

        match (kind, quantum) {
            ("fifo" | "fcfs", None) => Ok(SchedulingAlgorithm::Fifo),
            ("sjf", None) => Ok(SchedulingAlgorithm::Sjf),
            ("srt" | "srtf", None) => Ok(SchedulingAlgorithm::Srt),
            ("hrrn", None) => Ok(SchedulingAlgorithm::Hrrn),
            ("rr" | "round_robin", None) => Ok(SchedulingAlgorithm::RoundRobin {
                quantum: DEFAULT_QUANTUM,
            }),
            ("rr" | "round_robin", Some(quantum)) => match quantum.parse::<u32>() {
                Ok(quantum) if quantum >= 1 => Ok(SchedulingAlgorithm::RoundRobin { quantum }),
                _ => Err(format!("invalid quantum: {}", quantum)),
            },
            _ => Err(format!("unknown scheduling algorithm: {}", s)),
        }
    }
}
