//! Per-thread view handed to host kernels.

use bytemuck::Pod;

use crate::grid::Extent3;
use crate::kernel::{BindingAccess, BindingSlot};

/// Contents of one bound buffer while the device owns it.
pub(crate) struct SlotData {
    pub(crate) slot: BindingSlot,
    pub(crate) bytes: Vec<u8>,
}

/// What a host kernel sees for one thread: its position and the bound
/// buffers. Every access is bounds-checked; an out-of-range access or a
/// store into a read-only binding faults the whole dispatch.
pub struct KernelInvocation<'a> {
    thread_in_grid: Extent3,
    group_in_grid: Extent3,
    thread_in_group: Extent3,
    threads_per_grid: Extent3,
    slots: &'a mut [SlotData],
}

impl<'a> KernelInvocation<'a> {
    pub(crate) fn new(
        group_in_grid: Extent3,
        thread_in_group: Extent3,
        group_size: Extent3,
        threads_per_grid: Extent3,
        slots: &'a mut [SlotData],
    ) -> Self {
        let thread_in_grid = Extent3::new(
            group_in_grid.width * group_size.width + thread_in_group.width,
            group_in_grid.height * group_size.height + thread_in_group.height,
            group_in_grid.depth * group_size.depth + thread_in_group.depth,
        );
        KernelInvocation {
            thread_in_grid,
            group_in_grid,
            thread_in_group,
            threads_per_grid,
            slots,
        }
    }

    pub fn thread_position_in_grid(&self) -> Extent3 {
        self.thread_in_grid
    }

    pub fn threadgroup_position_in_grid(&self) -> Extent3 {
        self.group_in_grid
    }

    pub fn thread_position_in_threadgroup(&self) -> Extent3 {
        self.thread_in_group
    }

    /// Threads launched along each axis (groups × group size).
    pub fn threads_per_grid(&self) -> Extent3 {
        self.threads_per_grid
    }

    /// Row-major linear index of this thread in the launched grid.
    pub fn linear_index(&self) -> usize {
        let grid = self.threads_per_grid;
        let pos = self.thread_in_grid;
        pos.width + grid.width * (pos.height + grid.height * pos.depth)
    }

    /// Number of `T` elements in the buffer bound at `slot`.
    pub fn len<T: Pod>(&self, slot: u32) -> Result<usize, String> {
        let data = self.find(slot)?;
        Ok(data.bytes.len() / std::mem::size_of::<T>().max(1))
    }

    pub fn load<T: Pod>(&self, slot: u32, index: usize) -> Result<T, String> {
        let data = self.find(slot)?;
        let range = element_range::<T>(slot, index, data.bytes.len())?;
        Ok(bytemuck::pod_read_unaligned(&data.bytes[range]))
    }

    pub fn store<T: Pod>(&mut self, slot: u32, index: usize, value: T) -> Result<(), String> {
        let data = self
            .slots
            .iter_mut()
            .find(|data| data.slot.index == slot)
            .ok_or_else(|| format!("no buffer bound at slot {}", slot))?;
        if data.slot.access == BindingAccess::ReadOnly {
            return Err(format!("store into read-only slot {}", slot));
        }
        let range = element_range::<T>(slot, index, data.bytes.len())?;
        data.bytes[range].copy_from_slice(bytemuck::bytes_of(&value));
        Ok(())
    }

    fn find(&self, slot: u32) -> Result<&SlotData, String> {
        self.slots
            .iter()
            .find(|data| data.slot.index == slot)
            .ok_or_else(|| format!("no buffer bound at slot {}", slot))
    }
}

fn element_range<T: Pod>(
    slot: u32,
    index: usize,
    byte_len: usize,
) -> Result<std::ops::Range<usize>, String> {
    let size = std::mem::size_of::<T>();
    let end = index
        .checked_mul(size)
        .and_then(|start| start.checked_add(size))
        .ok_or_else(|| format!("index {} overflows slot {}", index, slot))?;
    let start = end - size;
    if end > byte_len {
        return Err(format!(
            "out-of-bounds access at index {} of slot {} ({} bytes)",
            index, slot, byte_len
        ));
    }
    Ok(start..end)
}
