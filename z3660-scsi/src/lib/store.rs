//! Backing stores for simulated units. `store_file` keeps a unit's blocks in
//! a host image file; `store_memory` keeps them in lazily allocated pages.
//!
//! Both implement `BlockStore`, which is all the simulated controller needs.

use std::io;

mod store_file;
mod store_memory;

pub use store_file::FileStore;
pub use store_memory::MemoryStore;

/// Byte-addressed storage behind a simulated unit.
pub trait BlockStore: Send {
    /// Total size in bytes.
    fn size(&self) -> u64;

    /// Fill `buf` from the given byte offset.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Store `buf` at the given byte offset.
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()>;
}

/// Reject accesses that run past the end of a store.
fn check_range(size: u64, offset: u64, len: usize) -> io::Result<()> {
    match offset.checked_add(len as u64) {
        Some(end) if end <= size => Ok(()),
        _ => Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("access of {} bytes at {:#X} is outside a store of {} bytes",
                    len, offset, size))),
    }
}
