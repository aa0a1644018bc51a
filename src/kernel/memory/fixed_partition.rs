use std::fmt::Write;
use std::ops::Range;

use log::{debug, info};

use super::allocator::{Allocation, MemoryAllocator};
use crate::error::{Result, SimError};
use crate::kernel::process_control_block::Placement;

pub const MAX_PARTITIONS: usize = 58;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionLayout {
    /// Every partition has the given size.
    Equal(usize),
    /// Sizes 2, 4, 6, ... until the user area runs out.
    Unequal,
}

#[derive(Debug, Clone, Copy)]
struct Partition {
    start: usize,
    size: usize,
    occupied: bool,
}

pub struct FixedPartitionAllocator {
    layout: PartitionLayout,
    partitions: Vec<Partition>,
    unused: usize,
}

impl FixedPartitionAllocator {
    pub fn new(layout: PartitionLayout) -> FixedPartitionAllocator {
        FixedPartitionAllocator {
            layout,
            partitions: Vec::new(),
            unused: 0,
        }
    }

    pub fn equal(partition_size: usize) -> FixedPartitionAllocator {
        FixedPartitionAllocator::new(PartitionLayout::Equal(partition_size))
    }

    pub fn unequal() -> FixedPartitionAllocator {
        FixedPartitionAllocator::new(PartitionLayout::Unequal)
    }

    pub fn layout(&self) -> PartitionLayout {
        self.layout
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Sizes of the partitions, in address order.
    pub fn partition_sizes(&self) -> Vec<usize> {
        self.partitions.iter().map(|partition| partition.size).collect()
    }

    /// Index of the smallest free partition that can hold `size` cells.
    fn best_fit(&self, size: usize) -> Option<usize> {
        self.partitions
            .iter()
            .enumerate()
            .filter(|(_, partition)| !partition.occupied && partition.size >= size)
            .min_by_key(|(_, partition)| partition.size - size)
            .map(|(index, _)| index)
    }
}

impl MemoryAllocator for FixedPartitionAllocator {
    fn initialize(&mut self, user_size: usize, user_base: usize) -> Result<()> {
        self.partitions.clear();
        let mut address = user_base;

        match self.layout {
            PartitionLayout::Equal(size) => {
                if size == 0 || size > user_size {
                    return Err(SimError::Config(format!("invalid partition size: {}", size)));
                }

                let count = (user_size / size).min(MAX_PARTITIONS);
                for _ in 0..count {
                    self.partitions.push(Partition { start: address, size, occupied: false });
                    address += size;
                }
                self.unused = user_size - count * size;
            }
            PartitionLayout::Unequal => {
                let mut remaining = user_size;
                let mut size = 2;

                while remaining >= size && self.partitions.len() < MAX_PARTITIONS {
                    self.partitions.push(Partition { start: address, size, occupied: false });
                    address += size;
                    remaining -= size;
                    size += 2;
                }
                self.unused = remaining;
            }
        }

        info!(
            "{} configured with {} partitions ({} cells unused)",
            self.name(),
            self.partitions.len(),
            self.unused
        );
        Ok(())
    }

    fn allocate(&mut self, size: usize) -> Result<Allocation> {
        let index = self.best_fit(size).ok_or(SimError::NoSpace { requested: size })?;
        let partition = &mut self.partitions[index];
        partition.occupied = true;

        let internal_fragmentation = partition.size - size;
        debug!(
            "Partition {} [{}..{}) assigned to {} instructions",
            index,
            partition.start,
            partition.start + partition.size,
            size
        );

        Ok(Allocation {
            base_address: partition.start,
            assigned_size: partition.size,
            internal_fragmentation,
            placement: Placement::Partition {
                index,
                size: partition.size,
                internal_fragmentation,
            },
        })
    }

    fn free(&mut self, placement: &Placement) -> Result<Range<usize>> {
        let index = match *placement {
            Placement::Partition { index, .. } => index,
            Placement::Buddy { .. } => return Err(SimError::InvalidPlacement(self.name())),
        };

        let partition = self
            .partitions
            .get_mut(index)
            .filter(|partition| partition.occupied)
            .ok_or_else(|| {
                SimError::InvalidPlacement(format!("partition {} of the fixed", index))
            })?;

        partition.occupied = false;
        debug!("Partition {} released", index);
        Ok(partition.start..partition.start + partition.size)
    }

    fn free_space_total(&self) -> usize {
        self.partitions
            .iter()
            .filter(|partition| !partition.occupied)
            .map(|partition| partition.size)
            .sum()
    }

    fn capacity(&self) -> usize {
        self.partitions.iter().map(|partition| partition.size).sum()
    }

    fn report(&self) -> String {
        let mut report = String::new();
        let _ = writeln!(report, "=== {} ===", self.name());
        let _ = writeln!(report, "Partitions: {}", self.partitions.len());
        let _ = writeln!(report, "Free space: {}", self.free_space_total());
        let _ = writeln!(report, "Unused space: {}", self.unused);

        for (i, partition) in self.partitions.iter().enumerate() {
            let _ = writeln!(
                report,
                "Partition {:02}: [{}-{}] {} - {}",
                i,
                partition.start,
                partition.start + partition.size - 1,
                partition.size,
                if partition.occupied { "occupied" } else { "free" }
            );
        }

        report
    }

    fn name(&self) -> String {
        match self.layout {
            PartitionLayout::Equal(size) => format!("Fixed Partitioning (equal, {})", size),
            PartitionLayout::Unequal => "Fixed Partitioning (unequal)".to_string(),
        }
    }

    fn reset(&mut self) {
        for partition in &mut self.partitions {
            partition.occupied = false;
        }
    }
}
