pub mod cpu;
pub mod dispatcher;
pub mod driver;
pub mod executor;
pub mod long_term_scheduler;
pub mod memory;
pub mod observer;
pub mod process_control_block;
pub mod short_term_scheduler;
pub mod statistics;

pub use cpu::Cpu;
pub use dispatcher::Dispatcher;
pub use driver::Driver;
pub use executor::{ExecutionEngine, StepOutcome};
pub use long_term_scheduler::LongTermScheduler;
pub use memory::MemoryStore;
pub use observer::{LogObserver, SystemObserver};
pub use process_control_block::{Placement, ProcessControlBlock, ProcessState};
pub use short_term_scheduler::{Scheduler, SchedulingAlgorithm, Selection};
pub use statistics::ProcessStatistics;
