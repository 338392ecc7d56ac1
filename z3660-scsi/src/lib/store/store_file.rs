use log::debug;
use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::{check_range, BlockStore};

/// A unit backed by a disk image on the host filesystem.
pub struct FileStore {
    path: PathBuf,
    file: fs::File,
    size: u64,
}

impl FileStore {
    /// Open an existing image for reading and writing. The image must be a
    /// regular file whose size is a non-zero multiple of `block_size`.
    pub fn open(path: impl Into<PathBuf>, block_size: u32) -> io::Result<Self> {
        let path = path.into();
        let metadata = fs::metadata(&path)?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("'{}' is not a regular file", path.display())));
        }
        let size = metadata.len();
        if block_size == 0 || size == 0 || size % block_size as u64 != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("'{}' is {} bytes, not a whole number of {}-byte blocks",
                        path.display(), size, block_size)));
        }
        let file = fs::OpenOptions::new().read(true).write(true).open(&path)?;
        debug!("Opened image '{}' with {} blocks.", path.display(), size / block_size as u64);
        Ok(FileStore { path, file, size })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BlockStore for FileStore {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        check_range(self.size, offset, buf.len())?;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        check_range(self.size, offset, buf.len())?;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)?;
        self.file.flush()
    }
}
