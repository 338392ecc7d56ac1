use ahash::AHashMap;
use std::io;

use super::{check_range, BlockStore};

const PAGE_SHIFT: u64 = 12;
const PAGE_SIZE: usize = 1 << PAGE_SHIFT;
const PAGE_MASK: u64 = PAGE_SIZE as u64 - 1;

/// A unit held in memory. Pages are only allocated once written, so large
/// blank units are cheap.
pub struct MemoryStore {
    /// `ahash` is faster than the standard hasher, and cryptographic security
    /// doesn't matter here.
    pages: AHashMap<u64, Vec<u8>>,
    size: u64,
}

impl MemoryStore {
    pub fn new(size: u64) -> Self {
        MemoryStore {
            pages: AHashMap::new(),
            size,
        }
    }

    /// Number of pages that have been written to.
    pub fn pages_allocated(&self) -> usize {
        self.pages.len()
    }
}

impl BlockStore for MemoryStore {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        check_range(self.size, offset, buf.len())?;
        let mut done = 0;
        while done < buf.len() {
            let pos = offset + done as u64;
            let within = (pos & PAGE_MASK) as usize;
            let n = (PAGE_SIZE - within).min(buf.len() - done);
            match self.pages.get(&(pos >> PAGE_SHIFT)) {
                Some(page) => buf[done..done + n].copy_from_slice(&page[within..within + n]),
                None => buf[done..done + n].fill(0),
            }
            done += n;
        }
        Ok(())
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        check_range(self.size, offset, buf.len())?;
        let mut done = 0;
        while done < buf.len() {
            let pos = offset + done as u64;
            let within = (pos & PAGE_MASK) as usize;
            let n = (PAGE_SIZE - within).min(buf.len() - done);
            let page = self
                .pages
                .entry(pos >> PAGE_SHIFT)
                .or_insert_with(|| vec![0; PAGE_SIZE]);
            page[within..within + n].copy_from_slice(&buf[done..done + n]);
            done += n;
        }
        Ok(())
    }
}
