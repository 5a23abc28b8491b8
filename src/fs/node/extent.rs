use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned, little_endian::U64};

use crate::block::BlockAddr;

/// A contiguous span of blocks.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[derive(FromBytes, IntoBytes, Immutable, Unaligned, KnownLayout)]
pub struct Extent {
    pub start: U64,
    pub len: U64,
}

impl Extent {
    pub fn new(start: BlockAddr, len: u64) -> Self {
        Self {
            start: start.into(),
            len: len.into(),
        }
    }

    pub fn start(&self) -> BlockAddr {
        self.start.get()
    }

    pub fn len(&self) -> u64 {
        self.len.get()
    }

    /// Returns the address right after the last block of the extent.
    pub fn end(&self) -> BlockAddr {
        self.start() + self.len()
    }

    /// Checks whether the extent doesn't cover any blocks.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clears the extent.
    pub fn clear(&mut self) {
        self.start = U64::new(0);
        self.len = U64::new(0);
    }
}
