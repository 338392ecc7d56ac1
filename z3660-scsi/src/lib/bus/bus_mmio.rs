use std::ptr;
use std::sync::atomic::{fence, Ordering};

use super::bus_interface::RegisterBus;
use crate::regs::{SCRATCH_OFFSET, SCRATCH_SIZE};

/// CPU cache maintenance around a DMA transfer.
pub trait CacheControl {
    /// Push CPU writes to `len` bytes at `buffer` out to memory.
    fn pre_dma(&self, buffer: *const u8, len: usize);
    /// Discard any cached copy of `len` bytes at `buffer`.
    fn post_dma(&self, buffer: *const u8, len: usize);
}

/// Cache control for cache-coherent hosts: a full fence either side.
#[derive(Debug, Default, Clone, Copy)]
pub struct FenceCache;

impl CacheControl for FenceCache {
    fn pre_dma(&self, _buffer: *const u8, _len: usize) {
        fence(Ordering::SeqCst);
    }

    fn post_dma(&self, _buffer: *const u8, _len: usize) {
        fence(Ordering::SeqCst);
    }
}

/// A memory-mapped board. The controller services a command while the
/// store to its register is in flight, so `wait_complete` keeps its default.
pub struct MmioBus<C = FenceCache> {
    board: *mut u8,
    registers: *mut u8,
    cache: C,
}

// The mapping is fixed for the life of the bus and only touched through `&mut self`.
unsafe impl<C: Send> Send for MmioBus<C> {}

impl MmioBus<FenceCache> {
    /// # Safety
    /// `board` must be 4-byte aligned and valid for volatile reads and writes
    /// over the register window at `register_offset` and over the scratch
    /// window, for as long as the bus exists.
    pub unsafe fn new(board: *mut u8, register_offset: u32) -> Self {
        MmioBus::with_cache(board, register_offset, FenceCache)
    }
}

impl<C: CacheControl> MmioBus<C> {
    /// # Safety
    /// As for `MmioBus::new`.
    pub unsafe fn with_cache(board: *mut u8, register_offset: u32, cache: C) -> Self {
        MmioBus {
            board,
            registers: board.add(register_offset as usize),
            cache,
        }
    }

    fn scratch(&self) -> *mut u8 {
        // SAFETY: the scratch window is inside the mapping by construction.
        unsafe { self.board.add(SCRATCH_OFFSET as usize) }
    }
}

impl<C: CacheControl> RegisterBus for MmioBus<C> {
    fn write_long(&mut self, offset: u32, value: u32) {
        // SAFETY: register offsets are word aligned and within the window.
        unsafe { ptr::write_volatile(self.registers.add(offset as usize) as *mut u32, value) }
    }

    fn read_long(&mut self, offset: u32) -> u32 {
        // SAFETY: as for `write_long`.
        unsafe { ptr::read_volatile(self.registers.add(offset as usize) as *const u32) }
    }

    fn bus_address(&self, buffer: &[u8]) -> u32 {
        // The board sits on a 32-bit bus.
        buffer.as_ptr() as usize as u32
    }

    fn scratch_len(&self) -> usize {
        SCRATCH_SIZE
    }

    fn copy_to_scratch(&mut self, data: &[u8]) {
        let scratch = self.scratch();
        for (i, &byte) in data.iter().take(SCRATCH_SIZE).enumerate() {
            // SAFETY: bounded by the scratch window size.
            unsafe { ptr::write_volatile(scratch.add(i), byte) }
        }
    }

    fn copy_from_scratch(&mut self, data: &mut [u8]) {
        let scratch = self.scratch();
        for (i, byte) in data.iter_mut().take(SCRATCH_SIZE).enumerate() {
            // SAFETY: bounded by the scratch window size.
            *byte = unsafe { ptr::read_volatile(scratch.add(i)) };
        }
    }

    fn pre_dma(&mut self, buffer: &[u8]) {
        self.cache.pre_dma(buffer.as_ptr(), buffer.len());
    }

    fn post_dma(&mut self, buffer: &mut [u8]) {
        self.cache.post_dma(buffer.as_ptr(), buffer.len());
    }
}
