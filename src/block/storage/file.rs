use std::{
    fs::{File, OpenOptions},
    io,
    os::unix::fs::FileExt,
    path::Path,
};

use libc::EIO;

use crate::block::{
    BLOCK_SIZE, Block, BlockAddr,
    storage::{Result, Storage},
};

/// Storage that uses a file to store data.
pub struct FileStorage {
    file: File,
    block_count: u64,
}

impl FileStorage {
    /// Opens a file to be used as `FileStorage`.
    /// If file's size is not a multiple of `BLOCK_SIZE` the remaining bytes are not addressable.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .into_errno()?;
        let block_count = file.metadata().into_errno()?.len() / BLOCK_SIZE;
        Ok(Self { file, block_count })
    }

    /// Creates a file to be used as `FileStorage`.
    /// The file's size is `block_count * BLOCK_SIZE` bytes.
    pub fn create(path: impl AsRef<Path>, block_count: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .into_errno()?;
        file.set_len(block_count * BLOCK_SIZE).into_errno()?;
        Ok(Self { file, block_count })
    }

    fn check_bounds(&self, addr: BlockAddr) -> Result<()> {
        if addr >= self.block_count {
            return Err(EIO);
        }
        Ok(())
    }
}

impl Storage for FileStorage {
    fn read_block(&self, block: &mut Block, addr: BlockAddr) -> Result<()> {
        self.check_bounds(addr)?;
        self.file
            .read_exact_at(&mut block.data, addr * BLOCK_SIZE)
            .into_errno()
    }

    fn write_block(&mut self, block: &Block, addr: BlockAddr) -> Result<()> {
        self.check_bounds(addr)?;
        self.file
            .write_all_at(&block.data, addr * BLOCK_SIZE)
            .into_errno()
    }

    fn capacity(&self) -> Result<u64> {
        Ok(self.block_count)
    }

    fn extend(&mut self, additional: u64) -> Result<u64> {
        let block_count = self.block_count + additional;
        self.file.set_len(block_count * BLOCK_SIZE).into_errno()?;
        self.block_count = block_count;
        Ok(block_count)
    }
}

trait IntoErrno {
    type T;

    fn into_errno(self) -> Result<Self::T>;
}

impl<T> IntoErrno for io::Result<T> {
    type T = T;

    fn into_errno(self) -> Result<Self::T> {
        self.map_err(|e| e.raw_os_error().unwrap_or(EIO))
    }
}
