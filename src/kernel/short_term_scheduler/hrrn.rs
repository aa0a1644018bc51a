use std::collections::HashMap;

use log::debug;

use super::{Scheduler, Selection};
use crate::error::Result;
use crate::kernel::dispatcher::Dispatcher;
use crate::kernel::memory::MemoryStore;
use crate::kernel::process_control_block::{ProcessControlBlock, ProcessState};

/// Highest response ratio next, non-preemptive.
///
/// ratio = (wait + service) / service, where service is the remaining
/// instruction count (at least 1) and wait is measured in clock ticks.
#[derive(Debug, Default)]
pub struct HrrnScheduler {
    /// Tick at which each process id entered the ready queue.
    entries: HashMap<u32, u64>,
}

impl HrrnScheduler {
    pub fn new() -> HrrnScheduler {
        HrrnScheduler::default()
    }

    /// Number of processes with a recorded entry tick.
    pub fn tracked(&self) -> usize {
        self.entries.len()
    }

    pub fn response_ratio(&self, pcb: &ProcessControlBlock, now: u64) -> f64 {
        let entered = self
            .entries
            .get(&pcb.get_id())
            .copied()
            .or(pcb.ready_since)
            .unwrap_or(now);

        let wait = now.saturating_sub(entered) + pcb.wait_time;
        let service = pcb.remaining_instructions().max(1) as f64;
        (wait as f64 + service) / service
    }
}

impl Scheduler for HrrnScheduler {
    fn select_next(
        &mut self,
        store: &mut MemoryStore,
        dispatcher: &Dispatcher,
    ) -> Result<Selection> {
        if dispatcher.current(store).is_some() {
            return Ok(Selection::KeepCurrent);
        }

        let now = store.clock();
        let mut best: Option<(usize, u32, f64)> = None;
        let mut queued = Vec::new();

        for (index, slot) in store.ready_slots().into_iter().enumerate() {
            let pcb = match store.pcb(slot) {
                Ok(pcb) => pcb,
                Err(_) => continue,
            };
            queued.push(pcb.get_id());
            if pcb.state != ProcessState::Ready {
                continue;
            }

            let ratio = self.response_ratio(pcb, now);
            if best.map_or(true, |(_, _, highest)| ratio > highest) {
                best = Some((index, pcb.get_id(), ratio));
            }
        }

        // Processes taken or finished by another CPU leave the queue.
        self.entries.retain(|id, _| queued.contains(id));

        let (index, id, ratio) = match best {
            Some(best) => best,
            None => return Ok(Selection::Idle),
        };

        self.entries.remove(&id);
        debug!("HRRN selected process {} with ratio {:.2}", id, ratio);
        Ok(store.remove_ready(index).map_or(Selection::Idle, Selection::Dispatch))
    }

    fn on_process_added(&mut self, pcb: &ProcessControlBlock) {
        let entered = pcb.ready_since.unwrap_or_else(|| pcb.get_arrival_time());
        self.entries.insert(pcb.get_id(), entered);
    }

    fn on_process_finished(&mut self, pcb: &ProcessControlBlock) {
        self.entries.remove(&pcb.get_id());
    }

    fn reset(&mut self) {
        self.entries.clear();
    }

    fn name(&self) -> &'static str {
        "HRRN"
    }

    fn is_preemptive(&self) -> bool {
        false
    }
}
