use log::debug;

use super::memory::MemoryStore;
use super::process_control_block::ProcessState;
use crate::error::{Result, SimError};

/// Performs context switches for one CPU.
///
/// The current slot of each CPU is kept in the store, so a dispatcher holds
/// nothing but the id of the CPU it serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatcher {
    cpu_id: usize,
}

impl Dispatcher {
    pub fn new(cpu_id: usize) -> Dispatcher {
        Dispatcher { cpu_id }
    }

    pub fn cpu_id(&self) -> usize {
        self.cpu_id
    }

    pub fn current(&self, store: &MemoryStore) -> Option<usize> {
        store.running_on(self.cpu_id)
    }

    pub fn dispatch(&self, store: &mut MemoryStore, slot: usize) -> Result<()> {
        if let Some(cpu) = store.cpu_running(slot).filter(|&cpu| cpu != self.cpu_id) {
            return Err(SimError::SlotBusy { slot, cpu });
        }

        let pcb = store.pcb_mut(slot)?;
        if pcb.state == ProcessState::Finished {
            return Err(SimError::ProcessFinished(pcb.get_name().to_string()));
        }

        pcb.state = ProcessState::Running;
        debug!("CPU {} dispatching {}", self.cpu_id, pcb);
        store.set_running(self.cpu_id, Some(slot));
        Ok(())
    }

    /// Leaves the CPU idle. Returns the slot that was current.
    pub fn stop(&self, store: &mut MemoryStore) -> Option<usize> {
        let slot = store.running_on(self.cpu_id);
        store.set_running(self.cpu_id, None);
        slot
    }

    /// Moves the current process back to the ready queue.
    pub fn preempt(&self, store: &mut MemoryStore) -> Result<Option<usize>> {
        let slot = match self.current(store) {
            Some(slot) => slot,
            None => return Ok(None),
        };

        if store.pcb(slot)?.state != ProcessState::Finished {
            store.enqueue_ready(slot)?;
        }
        store.set_running(self.cpu_id, None);
        debug!("CPU {} preempted slot {}", self.cpu_id, slot);
        Ok(Some(slot))
    }
}
