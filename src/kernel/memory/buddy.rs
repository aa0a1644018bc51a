use std::fmt::Write;
use std::ops::Range;

use log::{debug, info};

use super::allocator::{Allocation, MemoryAllocator};
use crate::error::{Result, SimError};
use crate::kernel::process_control_block::Placement;

pub const DEFAULT_MIN_ORDER: u32 = 7;
pub const DEFAULT_MAX_ORDER: u32 = 13;

/// Buddy-system allocator over a single top-level block.
///
/// Free lists hold block addresses, one list per level from `min_order` to
/// the effective maximum order. The maximum is lowered to fit the user area.
pub struct BuddyAllocator {
    min_order: u32,
    max_order: u32,
    effective_max_order: u32,
    base: usize,
    free_lists: Vec<Vec<usize>>,
}

impl BuddyAllocator {
    pub fn new(min_order: u32, max_order: u32) -> BuddyAllocator {
        BuddyAllocator {
            min_order,
            max_order,
            effective_max_order: max_order,
            base: 0,
            free_lists: Vec::new(),
        }
    }

    pub fn min_order(&self) -> u32 {
        self.min_order
    }

    pub fn max_order(&self) -> u32 {
        self.effective_max_order
    }

    /// Free block addresses at `level`, in list order.
    pub fn free_blocks(&self, level: u32) -> &[usize] {
        self.list_index(level)
            .and_then(|index| self.free_lists.get(index))
            .map(|list| list.as_slice())
            .unwrap_or(&[])
    }

    fn list_index(&self, level: u32) -> Option<usize> {
        if level < self.min_order || level > self.effective_max_order {
            return None;
        }
        Some((level - self.min_order) as usize)
    }

    /// Smallest level whose block holds `size` cells.
    fn level_for(&self, size: usize) -> Option<u32> {
        (self.min_order..=self.effective_max_order).find(|level| size <= 1 << level)
    }

    fn buddy_of(&self, address: usize, level: u32) -> usize {
        self.base + ((address - self.base) ^ (1 << level))
    }

    /// Takes a free block at `level`, splitting larger blocks on the way down.
    fn take_block(&mut self, level: u32) -> Option<usize> {
        if level > self.effective_max_order {
            return None;
        }

        let index = (level - self.min_order) as usize;
        if !self.free_lists[index].is_empty() {
            return Some(self.free_lists[index].remove(0));
        }

        let larger = self.take_block(level + 1)?;
        self.free_lists[index].push(larger + (1 << level));
        debug!(
            "Split block of {} at {} into two blocks of {}",
            1usize << (level + 1),
            larger,
            1usize << level
        );
        Some(larger)
    }

    fn fill_top_level(&mut self) {
        let levels = (self.effective_max_order - self.min_order + 1) as usize;
        self.free_lists = vec![Vec::new(); levels];
        self.free_lists[levels - 1].push(self.base);
    }
}

impl Default for BuddyAllocator {
    fn default() -> BuddyAllocator {
        BuddyAllocator::new(DEFAULT_MIN_ORDER, DEFAULT_MAX_ORDER)
    }
}

impl MemoryAllocator for BuddyAllocator {
    fn initialize(&mut self, user_size: usize, user_base: usize) -> Result<()> {
        if self.min_order > self.max_order || user_size < 1 << self.min_order {
            return Err(SimError::Config(format!(
                "buddy orders {}..={} do not fit a user area of {}",
                self.min_order, self.max_order, user_size
            )));
        }

        self.base = user_base;
        self.effective_max_order = self.max_order.min(user_size.ilog2());
        self.fill_top_level();

        info!(
            "Buddy system configured with blocks of {} to {} cells at {}",
            1usize << self.min_order,
            1usize << self.effective_max_order,
            self.base
        );
        Ok(())
    }

    fn allocate(&mut self, size: usize) -> Result<Allocation> {
        let level = self.level_for(size).ok_or(SimError::NoSpace { requested: size })?;
        let address = self.take_block(level).ok_or(SimError::NoSpace { requested: size })?;

        let block_size = 1usize << level;
        let internal_fragmentation = block_size - size;
        debug!("Block of {} at {} assigned to {} instructions", block_size, address, size);

        Ok(Allocation {
            base_address: address,
            assigned_size: block_size,
            internal_fragmentation,
            placement: Placement::Buddy {
                block_index: (address - self.base) / block_size,
                block_size,
                level,
                address,
                internal_fragmentation,
            },
        })
    }

    fn free(&mut self, placement: &Placement) -> Result<Range<usize>> {
        let (mut address, mut level) = match *placement {
            Placement::Buddy { address, level, .. } => (address, level),
            Placement::Partition { .. } => return Err(SimError::InvalidPlacement(self.name())),
        };

        let index = self.list_index(level).ok_or_else(|| SimError::InvalidPlacement(self.name()))?;
        let top = self.base + (1 << self.effective_max_order);
        if address < self.base
            || address + (1 << level) > top
            || self.free_lists[index].contains(&address)
        {
            return Err(SimError::InvalidPlacement(self.name()));
        }

        let range = address..address + (1 << level);

        while level < self.effective_max_order {
            let buddy = self.buddy_of(address, level);
            let list = &mut self.free_lists[(level - self.min_order) as usize];

            match list.iter().position(|&free| free == buddy) {
                Some(position) => {
                    list.remove(position);
                    address = address.min(buddy);
                    level += 1;
                    debug!("Merged buddies into a block of {} at {}", 1usize << level, address);
                }
                None => break,
            }
        }

        self.free_lists[(level - self.min_order) as usize].push(address);
        Ok(range)
    }

    fn free_space_total(&self) -> usize {
        self.free_lists
            .iter()
            .enumerate()
            .map(|(i, list)| list.len() << (self.min_order as usize + i))
            .sum()
    }

    fn capacity(&self) -> usize {
        1 << self.effective_max_order
    }

    fn report(&self) -> String {
        let mut report = String::new();
        let _ = writeln!(report, "=== {} ===", self.name());
        let _ = writeln!(
            report,
            "Levels: {} to {} ({} to {})",
            self.min_order,
            self.effective_max_order,
            1usize << self.min_order,
            1usize << self.effective_max_order
        );
        let _ = writeln!(report, "Free space: {}", self.free_space_total());

        for (i, list) in self.free_lists.iter().enumerate() {
            if list.is_empty() {
                continue;
            }
            let level = self.min_order as usize + i;
            let _ = writeln!(
                report,
                "Level {} ({}): {} free {:?}",
                level,
                1usize << level,
                list.len(),
                list
            );
        }

        report
    }

    fn name(&self) -> String {
        "Buddy System".to_string()
    }

    fn reset(&mut self) {
        self.fill_top_level();
    }
}
