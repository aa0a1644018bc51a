use std::ops::Range;

use crate::error::Result;
use crate::kernel::process_control_block::Placement;

/// The outcome of a successful allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub base_address: usize,
    pub assigned_size: usize,
    pub internal_fragmentation: usize,
    pub placement: Placement,
}

/// A strategy for placing programs in the user area.
///
/// Addresses handed out are absolute: they already include the user base
/// passed to `initialize`.
pub trait MemoryAllocator: Send {
    fn initialize(&mut self, user_size: usize, user_base: usize) -> Result<()>;

    /// Fails with `SimError::NoSpace` when no block can hold `size` cells.
    fn allocate(&mut self, size: usize) -> Result<Allocation>;

    /// Returns the address range whose cells must be cleared.
    fn free(&mut self, placement: &Placement) -> Result<Range<usize>>;

    fn free_space_total(&self) -> usize;

    /// Cells under management. Free space plus assigned sizes always add up to this.
    fn capacity(&self) -> usize;

    fn report(&self) -> String;

    fn name(&self) -> String;

    /// Forgets every allocation.
    fn reset(&mut self);
}
