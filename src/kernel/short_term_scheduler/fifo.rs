use super::{Scheduler, Selection};
use crate::error::Result;
use crate::kernel::dispatcher::Dispatcher;
use crate::kernel::memory::MemoryStore;

/// First come, first served.
#[derive(Debug, Default)]
pub struct FifoScheduler;

impl FifoScheduler {
    pub fn new() -> FifoScheduler {
        FifoScheduler
    }
}

impl Scheduler for FifoScheduler {
    fn select_next(
        &mut self,
        store: &mut MemoryStore,
        dispatcher: &Dispatcher,
    ) -> Result<Selection> {
        if dispatcher.current(store).is_some() {
            return Ok(Selection::KeepCurrent);
        }

        Ok(match store.dequeue_ready() {
            Some(slot) => Selection::Dispatch(slot),
            None => Selection::Idle,
        })
    }

    fn name(&self) -> &'static str {
        "FIFO"
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
    fn test_fifo_preserves_arrival_order() {
        let (mut store, slots) = ready_store(&[5, 1, 3]);
        let dispatcher = Dispatcher::new(0);
        let mut scheduler = FifoScheduler::new();

        for &expected in &slots {
            assert_eq!(
                scheduler.select_next(&mut store, &dispatcher),
                Ok(Selection::Dispatch(expected))
            );
        }
        assert_eq!(scheduler.select_next(&mut store, &dispatcher), Ok(Selection::Idle));
    }

    #[test]
    fn test_fifo_keeps_running_process() {
        let (mut store, slots) = ready_store(&[2, 2]);
        let dispatcher = Dispatcher::new(0);
        let mut scheduler = FifoScheduler::new();

        let Ok(Selection::Dispatch(slot)) = scheduler.select_next(&mut store, &dispatcher) else {
            panic!("expected a dispatch");
        };
        dispatcher.dispatch(&mut store, slot).unwrap();

        assert_eq!(scheduler.select_next(&mut store, &dispatcher), Ok(Selection::KeepCurrent));
        assert_eq!(store.ready_slots(), vec![slots[1]]);
    }
}
