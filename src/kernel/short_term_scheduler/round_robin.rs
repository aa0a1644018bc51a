use log::debug;

use super::{Scheduler, Selection};
use crate::error::Result;
use crate::kernel::dispatcher::Dispatcher;
use crate::kernel::memory::MemoryStore;
use crate::kernel::process_control_block::ProcessControlBlock;

/// Round robin over the ready queue.
///
/// Every consultation while a process runs counts as one elapsed tick; the
/// process is demoted when the count reaches the quantum.
#[derive(Debug)]
pub struct RoundRobinScheduler {
    quantum: u32,
    elapsed: u32,
}

impl RoundRobinScheduler {
    pub fn new(quantum: u32) -> RoundRobinScheduler {
        RoundRobinScheduler {
            quantum: quantum.max(1),
            elapsed: 0,
        }
    }

    pub fn quantum(&self) -> u32 {
        self.quantum
    }

    fn dispatch_next(&mut self, store: &mut MemoryStore) -> Result<Selection> {
        self.elapsed = 0;

        let slot = match store.dequeue_ready() {
            Some(slot) => slot,
            None => return Ok(Selection::Idle),
        };
        store.pcb_mut(slot)?.remaining_quantum = self.quantum;
        Ok(Selection::Dispatch(slot))
    }
}

impl Scheduler for RoundRobinScheduler {
    fn select_next(
        &mut self,
        store: &mut MemoryStore,
        dispatcher: &Dispatcher,
    ) -> Result<Selection> {
        let current = match dispatcher.current(store) {
            Some(slot) => slot,
            None => return self.dispatch_next(store),
        };

        self.elapsed += 1;
        if self.elapsed < self.quantum {
            store.pcb_mut(current)?.remaining_quantum = self.quantum - self.elapsed;
            return Ok(Selection::KeepCurrent);
        }

        debug!("Quantum of {} expired for slot {}", self.quantum, current);
        store.pcb_mut(current)?.remaining_quantum = 0;
        dispatcher.preempt(store)?;
        self.dispatch_next(store)
    }

    fn on_process_finished(&mut self, _pcb: &ProcessControlBlock) {
        self.elapsed = 0;
    }

    fn reset(&mut self) {
        self.elapsed = 0;
    }

    fn name(&self) -> &'static str {
        "Round Robin"
    }

    fn is_preemptive(&self) -> bool {
        true
    }
}
