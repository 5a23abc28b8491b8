pub mod allocator;

pub use allocator::Allocator;
pub use allocator::bitmap::BitmapAllocator;

pub mod storage;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// An address of a block.
pub type BlockAddr = u64;

/// Block size in bytes.
pub const BLOCK_SIZE: u64 = 4096;

/// Fixed-sized byte sequence.
#[repr(C)]
#[derive(Clone, Copy)]
#[derive(FromBytes, IntoBytes, Immutable, Unaligned, KnownLayout)]
pub struct Block {
    pub data: [u8; BLOCK_SIZE as usize],
}

impl Block {
    /// Constructs a `Block` with given data, zero-filling the remainder.
    ///
    /// # Panics
    /// Panics if `data` is larger than `BLOCK_SIZE`.
    pub fn new(data: &[u8]) -> Self {
        let mut block = Self::default();
        block.data[..data.len()].copy_from_slice(data);
        block
    }

    /// Splits `bytes` into as many blocks as needed to hold them.
    pub fn chunked(bytes: &[u8]) -> Vec<Self> {
        bytes
            .chunks(BLOCK_SIZE as usize)
            .map(Self::new)
            .collect()
    }
}

impl Default for Block {
    fn default() -> Self {
        Self {
            data: [0u8; BLOCK_SIZE as usize],
        }
    }
}
