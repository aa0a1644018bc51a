use log::debug;

use super::sjf::shortest_ready;
use super::{Scheduler, Selection};
use crate::error::Result;
use crate::kernel::dispatcher::Dispatcher;
use crate::kernel::memory::MemoryStore;

/// Shortest remaining time. Preempts the running process when a ready one
/// has strictly fewer instructions left.
#[derive(Debug, Default)]
pub struct SrtScheduler;

impl SrtScheduler {
    pub fn new() -> SrtScheduler {
        SrtScheduler
    }
}

impl Scheduler for SrtScheduler {
    fn select_next(
        &mut self,
        store: &mut MemoryStore,
        dispatcher: &Dispatcher,
    ) -> Result<Selection> {
        let candidate = shortest_ready(store);

        let current = match dispatcher.current(store) {
            Some(slot) => slot,
            None => {
                let selection = candidate
                    .and_then(|(index, _)| store.remove_ready(index))
                    .map_or(Selection::Idle, Selection::Dispatch);
                return Ok(selection);
            }
        };

        let running_remaining = store.pcb(current)?.remaining_instructions();
        let (index, remaining) = match candidate {
            Some(candidate) if candidate.1 < running_remaining => candidate,
            _ => return Ok(Selection::KeepCurrent),
        };

        // Take the candidate out before the incumbent joins the back of the queue.
        let slot = match store.remove_ready(index) {
            Some(slot) => slot,
            None => return Ok(Selection::KeepCurrent),
        };
        dispatcher.preempt(store)?;

        debug!(
            "SRT preempting slot {} ({} left) for slot {} ({} left)",
            current, running_remaining, slot, remaining
        );
        Ok(Selection::Dispatch(slot))
    }

    fn name(&self) -> &'static str {
        "SRT"
    }

    fn is_preemptive(&self) -> bool {
        true
    }
}
