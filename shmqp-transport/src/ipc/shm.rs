//! File-backed shared memory regions.

use memmap2::{MmapMut, MmapOptions};
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Configuration for a shared memory region.
#[derive(Debug, Clone)]
pub struct SharedMemoryConfig {
    /// Size of the region in bytes.
    pub size: usize,
    /// Whether to create the backing file if it doesn't exist.
    pub create: bool,
}

/// Shared memory region backed by a file.
///
/// Both peers map the same file; writes through one mapping are visible
/// through the other. Cross-process ordering is the caller's job.
pub struct SharedMemory {
    mmap: MmapMut,
    size: usize,
    path: PathBuf,
}

impl SharedMemory {
    /// Creates or opens a region without truncating existing contents.
    ///
    /// The file is grown to `config.size` if it is smaller; a peer that
    /// already mapped it keeps a valid mapping.
    ///
    /// # Errors
    /// Returns IO error if file operations fail.
    pub fn open(path: &Path, config: SharedMemoryConfig) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(config.create)
            .truncate(false)
            .open(path)?;

        if file.metadata()?.len() < config.size as u64 {
            file.set_len(config.size as u64)?;
        }

        // SAFETY: the file stays mapped for the lifetime of `mmap`; concurrent
        // modification by the peer is serialized by the mailbox gate.
        let mmap = unsafe { MmapOptions::new().len(config.size).map_mut(&file)? };

        Ok(Self {
            mmap,
            size: config.size,
            path: path.to_path_buf(),
        })
    }

    /// Returns the size of the region.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns a slice of the region.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.mmap
    }

    /// Returns a mutable slice of the region.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.mmap
    }

    /// Unlinks the backing file. Existing mappings stay valid.
    ///
    /// # Errors
    /// Returns IO error if the file cannot be removed. A missing file is
    /// reported as `NotFound`.
    pub fn unlink(&self) -> io::Result<()> {
        fs::remove_file(&self.path)
    }
}

impl std::fmt::Debug for SharedMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedMemory")
            .field("size", &self.size)
            .field("path", &self.path)
            .finish()
    }
}
