use std::collections::VecDeque;

use log::{info, warn};

use super::memory::MemoryStore;
use crate::error::{Result, SimError};
use crate::io::ProgramSource;
use crate::isa::parse_program;

/// Admits programs from secondary storage into main memory.
pub struct LongTermScheduler {
    program_queue: VecDeque<String>,
}

impl LongTermScheduler {
    pub fn new() -> LongTermScheduler {
        LongTermScheduler {
            program_queue: VecDeque::new(),
        }
    }

    pub fn enqueue_programs<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.program_queue.extend(names.into_iter().map(Into::into));
    }

    pub fn has_programs(&self) -> bool {
        !self.program_queue.is_empty()
    }

    pub fn pending(&self) -> Vec<String> {
        self.program_queue.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.program_queue.clear();
    }

    /// Drops the program at the front of the queue without admitting it.
    pub fn skip(&mut self) -> Option<String> {
        self.program_queue.pop_front()
    }

    /// Admits the program at the front of the queue and returns its slot.
    ///
    /// On a retryable error the program stays at the front; any other error
    /// drops it.
    pub fn step(&mut self, source: &dyn ProgramSource, store: &mut MemoryStore) -> Result<usize> {
        let name = self.program_queue.front().cloned().ok_or(SimError::NoPendingPrograms)?;

        let result = admit(&name, source, store);
        match &result {
            Err(err) if err.is_retryable() => {}
            _ => {
                self.program_queue.pop_front();
            }
        }

        result
    }

    /// Admits programs until the queue is empty or memory runs out.
    pub fn batch_step(
        &mut self,
        source: &dyn ProgramSource,
        store: &mut MemoryStore,
    ) -> Vec<usize> {
        let mut slots = Vec::new();

        while self.has_programs() {
            match self.step(source, store) {
                Ok(slot) => slots.push(slot),
                Err(err) if err.is_retryable() => {
                    warn!("Admission paused: {}", err);
                    break;
                }
                Err(err) => warn!("Program rejected: {}", err),
            }
        }

        slots
    }
}

impl Default for LongTermScheduler {
    fn default() -> LongTermScheduler {
        LongTermScheduler::new()
    }
}

fn admit(name: &str, source: &dyn ProgramSource, store: &mut MemoryStore) -> Result<usize> {
    let lines = source
        .read_program(name)
        .ok_or_else(|| SimError::ProgramNotFound(name.to_string()))?;

    let instructions = parse_program(&lines)?;
    if instructions.is_empty() {
        return Err(SimError::EmptyProgram(name.to_string()));
    }

    let slot = store.create_process(name, &instructions)?;
    store.enqueue_job(slot)?;
    store.promote_jobs()?;

    info!("Admitted {} into slot {}", store.pcb(slot)?, slot);
    Ok(slot)
}
