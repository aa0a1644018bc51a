pub mod allocator;
pub mod buddy;
pub mod fixed_partition;

use std::collections::VecDeque;
use std::fmt::Write;

use log::debug;

use super::process_control_block::{ProcessControlBlock, ProcessState};
use crate::error::{Result, SimError};
use crate::isa::Instruction;

pub use allocator::{Allocation, MemoryAllocator};
pub use buddy::BuddyAllocator;
pub use fixed_partition::{FixedPartitionAllocator, PartitionLayout};

/// Cells reserved for the operating system. User addresses start here.
pub const KERNEL_SIZE: usize = 1000;
pub const MAX_PROCESSES: usize = 25;
pub const QUEUE_CAPACITY: usize = 25;

/// Main memory: the PCB table, the job and ready queues, and the user
/// instruction space managed by the active allocator.
pub struct MemoryStore {
    user_space: Vec<Option<Instruction>>,
    allocator: Box<dyn MemoryAllocator>,
    pcb_table: Vec<Option<ProcessControlBlock>>,
    job_queue: VecDeque<usize>,
    ready_queue: VecDeque<usize>,
    /// Slot currently dispatched on each CPU.
    running: Vec<Option<usize>>,
    next_process_id: u32,
    clock: u64,
}

impl MemoryStore {
    pub fn new(
        user_size: usize,
        mut allocator: Box<dyn MemoryAllocator>,
        cpu_count: usize,
    ) -> Result<MemoryStore> {
        allocator.initialize(user_size, KERNEL_SIZE)?;

        Ok(MemoryStore {
            user_space: vec![None; user_size],
            allocator,
            pcb_table: vec![None; MAX_PROCESSES],
            job_queue: VecDeque::with_capacity(QUEUE_CAPACITY),
            ready_queue: VecDeque::with_capacity(QUEUE_CAPACITY),
            running: vec![None; cpu_count.max(1)],
            next_process_id: 1,
            clock: 0,
        })
    }

    pub fn total_size(&self) -> usize {
        KERNEL_SIZE + self.user_space.len()
    }

    pub fn user_size(&self) -> usize {
        self.user_space.len()
    }

    pub fn clock(&self) -> u64 {
        self.clock
    }

    pub fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    pub fn allocator(&self) -> &dyn MemoryAllocator {
        self.allocator.as_ref()
    }

    /// Swaps the allocation strategy. Only allowed while no process is loaded.
    pub fn replace_allocator(&mut self, mut allocator: Box<dyn MemoryAllocator>) -> Result<()> {
        if self.active_processes() > 0 {
            return Err(SimError::SystemRunning);
        }

        allocator.initialize(self.user_space.len(), KERNEL_SIZE)?;
        self.user_space.iter_mut().for_each(|cell| *cell = None);
        self.allocator = allocator;
        Ok(())
    }

    pub fn instruction_at(&self, address: usize) -> Result<&Instruction> {
        address
            .checked_sub(KERNEL_SIZE)
            .and_then(|offset| self.user_space.get(offset))
            .and_then(|cell| cell.as_ref())
            .ok_or(SimError::InstructionNotFound(address))
    }

    /// Allocates space for `instructions` and copies them in.
    pub fn load_program(&mut self, instructions: &[Instruction]) -> Result<Allocation> {
        let allocation = self.allocator.allocate(instructions.len())?;
        let offset = allocation.base_address - KERNEL_SIZE;

        for (cell, instruction) in self.user_space[offset..offset + instructions.len()]
            .iter_mut()
            .zip(instructions)
        {
            *cell = Some(instruction.clone());
        }

        Ok(allocation)
    }

    /// Loads a program and registers its PCB in a free slot.
    ///
    /// The new PCB is `New` and belongs to no queue yet.
    pub fn create_process(&mut self, name: &str, instructions: &[Instruction]) -> Result<usize> {
        let slot = self.free_slot().ok_or(SimError::NoFreeSlot)?;
        let allocation = self.load_program(instructions)?;

        let mut pcb = ProcessControlBlock::new(
            self.next_process_id,
            name,
            allocation.base_address,
            instructions.len(),
            self.clock,
        );
        pcb.assign_placement(allocation.placement);
        self.next_process_id += 1;

        debug!("{} loaded at {} in slot {}", pcb, allocation.base_address, slot);
        self.pcb_table[slot] = Some(pcb);
        Ok(slot)
    }

    /// Removes a process: frees its memory, clears its cells and drops it
    /// from every queue and CPU.
    pub fn release_process(&mut self, slot: usize) -> Result<ProcessControlBlock> {
        let mut pcb = self
            .pcb_table
            .get_mut(slot)
            .and_then(Option::take)
            .ok_or(SimError::InvalidSlot(slot))?;

        if let Some(placement) = pcb.release_placement() {
            let range = self.allocator.free(&placement)?;
            for cell in &mut self.user_space[range.start - KERNEL_SIZE..range.end - KERNEL_SIZE] {
                *cell = None;
            }
        }

        self.job_queue.retain(|&queued| queued != slot);
        self.ready_queue.retain(|&queued| queued != slot);
        for current in &mut self.running {
            if *current == Some(slot) {
                *current = None;
            }
        }

        Ok(pcb)
    }

    fn free_slot(&self) -> Option<usize> {
        self.pcb_table.iter().position(Option::is_none)
    }

    pub fn pcb(&self, slot: usize) -> Result<&ProcessControlBlock> {
        self.pcb_table
            .get(slot)
            .and_then(Option::as_ref)
            .ok_or(SimError::InvalidSlot(slot))
    }

    pub fn pcb_mut(&mut self, slot: usize) -> Result<&mut ProcessControlBlock> {
        self.pcb_table
            .get_mut(slot)
            .and_then(Option::as_mut)
            .ok_or(SimError::InvalidSlot(slot))
    }

    pub fn update_pcb(&mut self, slot: usize, pcb: ProcessControlBlock) -> Result<()> {
        *self.pcb_mut(slot)? = pcb;
        Ok(())
    }

    /// Occupied slots with their PCBs.
    pub fn pcbs(&self) -> impl Iterator<Item = (usize, &ProcessControlBlock)> {
        self.pcb_table
            .iter()
            .enumerate()
            .filter_map(|(slot, pcb)| pcb.as_ref().map(|pcb| (slot, pcb)))
    }

    pub fn active_processes(&self) -> usize {
        self.pcb_table.iter().filter(|pcb| pcb.is_some()).count()
    }

    pub fn enqueue_job(&mut self, slot: usize) -> Result<()> {
        self.pcb(slot)?;
        if self.job_queue.len() >= QUEUE_CAPACITY {
            return Err(SimError::QueueFull("job"));
        }
        self.job_queue.push_back(slot);
        Ok(())
    }

    pub fn dequeue_job(&mut self) -> Option<usize> {
        self.job_queue.pop_front()
    }

    pub fn job_slots(&self) -> Vec<usize> {
        self.job_queue.iter().copied().collect()
    }

    /// Moves every job to the ready queue, returning the slots moved.
    pub fn promote_jobs(&mut self) -> Result<Vec<usize>> {
        let mut promoted = Vec::new();
        while let Some(slot) = self.dequeue_job() {
            self.enqueue_ready(slot)?;
            promoted.push(slot);
        }
        Ok(promoted)
    }

    /// Appends `slot` to the ready queue and marks its PCB `Ready`.
    pub fn enqueue_ready(&mut self, slot: usize) -> Result<()> {
        if self.ready_queue.len() >= QUEUE_CAPACITY {
            return Err(SimError::QueueFull("ready"));
        }

        let clock = self.clock;
        let pcb = self.pcb_mut(slot)?;
        pcb.state = ProcessState::Ready;
        pcb.ready_since = Some(clock);

        self.ready_queue.push_back(slot);
        Ok(())
    }

    pub fn dequeue_ready(&mut self) -> Option<usize> {
        let slot = self.ready_queue.pop_front()?;
        self.account_wait(slot);
        Some(slot)
    }

    /// Removes the entry at `index` of the ready queue.
    pub fn remove_ready(&mut self, index: usize) -> Option<usize> {
        let slot = self.ready_queue.remove(index)?;
        self.account_wait(slot);
        Some(slot)
    }

    pub fn remove_ready_slot(&mut self, slot: usize) -> Option<usize> {
        let index = self.ready_queue.iter().position(|&queued| queued == slot)?;
        self.remove_ready(index)
    }

    pub fn ready_slots(&self) -> Vec<usize> {
        self.ready_queue.iter().copied().collect()
    }

    pub fn ready_len(&self) -> usize {
        self.ready_queue.len()
    }

    fn account_wait(&mut self, slot: usize) {
        let clock = self.clock;
        if let Ok(pcb) = self.pcb_mut(slot) {
            if let Some(since) = pcb.ready_since.take() {
                pcb.wait_time += clock.saturating_sub(since);
            }
        }
    }

    pub fn running_on(&self, cpu: usize) -> Option<usize> {
        self.running.get(cpu).copied().flatten()
    }

    pub fn set_running(&mut self, cpu: usize, slot: Option<usize>) {
        if cpu >= self.running.len() {
            self.running.resize(cpu + 1, None);
        }
        self.running[cpu] = slot;
    }

    /// The CPU on which `slot` is current, if any.
    pub fn cpu_running(&self, slot: usize) -> Option<usize> {
        self.running.iter().position(|&current| current == Some(slot))
    }

    pub fn report(&self) -> String {
        let mut report = String::new();
        let _ = writeln!(report, "=== Main memory ===");
        let _ = writeln!(
            report,
            "Total: {} | Kernel: {} | User: {}",
            self.total_size(),
            KERNEL_SIZE,
            self.user_space.len()
        );
        let _ = writeln!(report, "Clock: {}", self.clock);
        let _ = writeln!(report, "Active processes: {}/{}", self.active_processes(), MAX_PROCESSES);
        let _ = writeln!(report, "Job queue: {:?}", self.job_queue);
        let _ = writeln!(report, "Ready queue: {:?}", self.ready_queue);

        for (slot, pcb) in self.pcbs() {
            let _ = writeln!(report, "Slot {:02}: {}", slot, pcb);
        }

        let fragmentation: usize = self.pcbs().map(|(_, pcb)| pcb.internal_fragmentation()).sum();
        let _ = writeln!(report, "Internal fragmentation: {}", fragmentation);
        let _ = writeln!(report);
        report.push_str(&self.allocator.report());
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::parse_program;

    fn program(len: usize) -> Vec<Instruction> {
        let lines = vec!["INC AX"; len];
        parse_program(&lines).unwrap()
    }

    fn store() -> MemoryStore {
        MemoryStore::new(1024, Box::new(BuddyAllocator::default()), 1).unwrap()
    }

    #[test]
    fn test_memory_store_layout() {
        let store = store();
        assert_eq!(store.total_size(), 2024);
        assert_eq!(store.user_size(), 1024);
        assert_eq!(store.allocator().capacity(), 1024);
        assert_eq!(store.active_processes(), 0);
    }

    #[test]
    fn test_memory_store_create_process() {
        let mut store = store();
        let slot = store.create_process("inc", &program(3)).unwrap();

        let pcb = store.pcb(slot).unwrap();
        assert_eq!(pcb.get_id(), 1);
        assert_eq!(pcb.get_base_address(), KERNEL_SIZE);
        assert_eq!(pcb.get_instruction_count(), 3);
        assert_eq!(pcb.state, ProcessState::New);
        assert_eq!(pcb.internal_fragmentation(), 125);

        assert_eq!(store.instruction_at(KERNEL_SIZE + 2).unwrap().to_string(), "INC AX");
        assert_eq!(
            store.instruction_at(KERNEL_SIZE + 3),
            Err(SimError::InstructionNotFound(KERNEL_SIZE + 3))
        );
        assert_eq!(store.instruction_at(5), Err(SimError::InstructionNotFound(5)));
    }

    #[test]
    fn test_memory_store_release_process() {
        let mut store = store();
        let slot = store.create_process("inc", &program(3)).unwrap();
        store.enqueue_ready(slot).unwrap();
        store.set_running(0, Some(slot));

        let pcb = store.release_process(slot).unwrap();
        assert_eq!(pcb.get_name(), "inc");
        assert!(store.pcb(slot).is_err());
        assert_eq!(store.ready_len(), 0);
        assert_eq!(store.running_on(0), None);
        assert!(store.instruction_at(KERNEL_SIZE).is_err());
        assert_eq!(store.allocator().free_space_total(), 1024);

        assert_eq!(store.release_process(slot).unwrap_err(), SimError::InvalidSlot(slot));
    }

    #[test]
    fn test_memory_store_no_space_keeps_slot_free() {
        let mut store = store();
        assert_eq!(
            store.create_process("big", &program(1025)).unwrap_err(),
            SimError::NoSpace { requested: 1025 }
        );
        assert_eq!(store.active_processes(), 0);
    }

    #[test]
    fn test_memory_store_pcb_table_full() {
        let allocator = Box::new(FixedPartitionAllocator::equal(2));
        let mut store = MemoryStore::new(4096, allocator, 1).unwrap();
        for _ in 0..MAX_PROCESSES {
            store.create_process("p", &program(1)).unwrap();
        }
        assert_eq!(store.create_process("p", &program(1)), Err(SimError::NoFreeSlot));
    }

    #[test]
    fn test_memory_store_queues() {
        let mut store = store();
        let a = store.create_process("a", &program(1)).unwrap();
        let b = store.create_process("b", &program(1)).unwrap();

        store.enqueue_job(a).unwrap();
        store.enqueue_job(b).unwrap();
        assert_eq!(store.job_slots(), vec![a, b]);

        assert_eq!(store.promote_jobs().unwrap(), vec![a, b]);
        assert_eq!(store.ready_slots(), vec![a, b]);
        assert_eq!(store.pcb(b).unwrap().state, ProcessState::Ready);

        assert_eq!(store.remove_ready_slot(b), Some(b));
        assert_eq!(store.dequeue_ready(), Some(a));
        assert_eq!(store.dequeue_ready(), None);
    }

    #[test]
    fn test_memory_store_wait_accounting() {
        let mut store = store();
        let slot = store.create_process("a", &program(1)).unwrap();

        store.enqueue_ready(slot).unwrap();
        for _ in 0..4 {
            store.tick();
        }
        store.dequeue_ready().unwrap();

        let pcb = store.pcb(slot).unwrap();
        assert_eq!(pcb.wait_time, 4);
        assert_eq!(pcb.ready_since, None);
    }

    #[test]
    fn test_memory_store_running_markers() {
        let mut store = MemoryStore::new(1024, Box::new(BuddyAllocator::default()), 2).unwrap();
        store.set_running(1, Some(3));
        assert_eq!(store.running_on(1), Some(3));
        assert_eq!(store.cpu_running(3), Some(1));
        assert_eq!(store.running_on(0), None);
        assert_eq!(store.running_on(7), None);
    }

    #[test]
    fn test_memory_store_replace_allocator() {
        let mut store = store();
        let slot = store.create_process("a", &program(1)).unwrap();
        assert_eq!(
            store.replace_allocator(Box::new(FixedPartitionAllocator::unequal())),
            Err(SimError::SystemRunning)
        );

        store.release_process(slot).unwrap();
        store.replace_allocator(Box::new(FixedPartitionAllocator::equal(64))).unwrap();
        assert_eq!(store.allocator().capacity(), 1024);
        assert!(store.report().contains("Fixed Partitioning"));
    }
}
