use std::ops::Range;

use bitvec::prelude::*;

use crate::kernel::error::{Error, Result};

/// Size of a user memory page in bytes.
pub const PAGE_SIZE: usize = 1024;

/// A user virtual address.
pub type VirtAddr = usize;

/// How user memory is accessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// A process's user memory.
///
/// Every range is validated before any byte is copied, so a bad buffer is rejected as a whole
/// and never partially read or written.
pub struct AddressSpace {
    memory: Box<[u8]>,
    read_only: BitVec,
}

impl AddressSpace {
    /// Constructs an address space of `pages` zeroed, writable pages.
    pub fn new(pages: usize) -> Self {
        Self {
            memory: vec![0; pages * PAGE_SIZE].into_boxed_slice(),
            read_only: bitvec![0; pages],
        }
    }

    /// Returns the size of the address space in bytes.
    pub fn len(&self) -> usize {
        self.memory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    pub fn page_count(&self) -> usize {
        self.read_only.len()
    }

    /// Marks a page as read-only (or writable again).
    pub fn set_read_only(&mut self, page: usize, read_only: bool) -> Result<()> {
        if page >= self.page_count() {
            return Err(Error::BadAddress);
        }
        self.read_only.set(page, read_only);
        Ok(())
    }

    /// Checks that `len` bytes at `vaddr` are mapped and allow `access`.
    pub fn validate(&self, vaddr: VirtAddr, len: usize, access: Access) -> Result<Range<usize>> {
        let end = vaddr.checked_add(len).ok_or(Error::BadAddress)?;
        if end > self.len() {
            return Err(Error::BadAddress);
        }
        if access == Access::Write && len != 0 {
            let pages = vaddr / PAGE_SIZE..=(end - 1) / PAGE_SIZE;
            if self.read_only[pages].any() {
                return Err(Error::BadAddress);
            }
        }
        Ok(vaddr..end)
    }

    /// Copies user memory at `vaddr` into `buf`.
    pub fn read(&self, vaddr: VirtAddr, buf: &mut [u8]) -> Result<()> {
        let range = self.validate(vaddr, buf.len(), Access::Read)?;
        buf.copy_from_slice(&self.memory[range]);
        Ok(())
    }

    /// Copies `buf` into user memory at `vaddr`. Fails on read-only pages.
    pub fn write(&mut self, vaddr: VirtAddr, buf: &[u8]) -> Result<()> {
        let range = self.validate(vaddr, buf.len(), Access::Write)?;
        self.memory[range].copy_from_slice(buf);
        Ok(())
    }

    /// Reads a NUL-terminated string of at most `max_len` bytes (excluding the terminator).
    pub fn read_string(&self, vaddr: VirtAddr, max_len: usize) -> Result<String> {
        if vaddr >= self.len() {
            return Err(Error::BadAddress);
        }

        let window = &self.memory[vaddr..self.len().min(vaddr.saturating_add(max_len + 1))];
        let Some(len) = window.iter().position(|&b| b == 0) else {
            // Either the name is too long or it runs off the end of memory
            return Err(if window.len() > max_len {
                Error::Fs(crate::fs::error::Error::NameTooLong)
            } else {
                Error::BadAddress
            });
        };

        let string = std::str::from_utf8(&window[..len]).map_err(|_| Error::InvalidArgument)?;
        Ok(string.to_owned())
    }
}
