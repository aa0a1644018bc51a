use super::{Scheduler, Selection};
use crate::error::Result;
use crate::kernel::dispatcher::Dispatcher;
use crate::kernel::memory::MemoryStore;
use crate::kernel::process_control_block::ProcessState;

/// Shortest job first, non-preemptive.
#[derive(Debug, Default)]
pub struct SjfScheduler;

impl SjfScheduler {
    pub fn new() -> SjfScheduler {
        SjfScheduler
    }
}

/// Index in the ready queue of the ready process with the fewest remaining
/// instructions. Ties go to the earliest entry.
pub(super) fn shortest_ready(store: &MemoryStore) -> Option<(usize, usize)> {
    let mut best: Option<(usize, usize)> = None;

    for (index, slot) in store.ready_slots().into_iter().enumerate() {
        let remaining = match store.pcb(slot) {
            Ok(pcb) if pcb.state == ProcessState::Ready => pcb.remaining_instructions(),
            _ => continue,
        };

        if best.map_or(true, |(_, shortest)| remaining < shortest) {
            best = Some((index, remaining));
        }
    }

    best
}

impl Scheduler for SjfScheduler {
    fn select_next(
        &mut self,
        store: &mut MemoryStore,
        dispatcher: &Dispatcher,
    ) -> Result<Selection> {
        if dispatcher.current(store).is_some() {
            return Ok(Selection::KeepCurrent);
        }

        let selection = shortest_ready(store)
            .and_then(|(index, _)| store.remove_ready(index))
            .map_or(Selection::Idle, Selection::Dispatch);
        Ok(selection)
    }

    fn name(&self) -> &'static str {
        "SJF"
    }

    fn is_preemptive(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::short_term_scheduler::tests::ready_store;

    #[test]
    fn test_sjf_picks_shortest() {
        let (mut store, slots) = ready_store(&[6, 2, 4, 2]);
        let dispatcher = Dispatcher::new(0);
        let mut scheduler = SjfScheduler::new();

        let order: Vec<Selection> = (0..4)
            .map(|_| scheduler.select_next(&mut store, &dispatcher).unwrap())
            .collect();

        assert_eq!(
            order,
            vec![
                Selection::Dispatch(slots[1]),
                Selection::Dispatch(slots[3]),
                Selection::Dispatch(slots[2]),
                Selection::Dispatch(slots[0]),
            ]
        );
        assert_eq!(scheduler.select_next(&mut store, &dispatcher), Ok(Selection::Idle));
    }

    #[test]
    fn test_sjf_uses_remaining_instructions() {
        let (mut store, slots) = ready_store(&[6, 4]);
        store.pcb_mut(slots[0]).unwrap().program_counter = 5;

        let mut scheduler = SjfScheduler::new();
        assert_eq!(
            scheduler.select_next(&mut store, &Dispatcher::new(0)),
            Ok(Selection::Dispatch(slots[0]))
        );
    }
}
