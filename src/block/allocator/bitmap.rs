use bitvec::prelude::*;
use zerocopy::{FromBytes, little_endian::U64};

use crate::block::{
    BlockAddr,
    allocator::{Allocator, Error, Result},
};

/// A bitmap-backed `Allocator`.
///
/// The bitmap is sized for `limit` blocks, of which the first `count` are addressable.
/// Growing moves `count` towards `limit` without reallocating the bitmap, so the
/// persisted form never changes size.
#[derive(Clone)]
pub struct BitmapAllocator {
    bits: BitVec<u64, Lsb0>,
    count: usize,
    available: usize,
    last_cursor: usize,
}

impl BitmapAllocator {
    /// Constructs a bitmap for `count` blocks that can grow up to `limit` blocks.
    ///
    /// # Panics
    /// Panics if `count > limit`.
    pub fn new(count: u64, limit: u64) -> Self {
        assert!(count <= limit, "'count' must not exceed 'limit'");
        let count = usize::try_from(count).expect("'count' must be addressable");
        let limit = usize::try_from(limit).expect("'limit' must be addressable");
        let bits = bitvec![u64, Lsb0; 0; limit];
        BitmapAllocator {
            count,
            bits,
            available: count,
            last_cursor: 0,
        }
    }

    /// Returns the number of bytes the persisted bitmap takes for `limit` blocks.
    pub fn byte_len(limit: u64) -> u64 {
        limit.div_ceil(u64::BITS as u64) * size_of::<u64>() as u64
    }

    /// Encodes the bitmap as little-endian 64-bit words.
    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        self.bits
            .as_raw_slice()
            .iter()
            .flat_map(|word| word.to_le_bytes())
            .collect()
    }

    /// Restores a bitmap persisted with [`BitmapAllocator::to_bytes`].
    /// Trailing bytes past the bitmap are ignored.
    pub(crate) fn from_bytes(count: u64, limit: u64, bytes: &[u8]) -> Option<Self> {
        let count = usize::try_from(count).ok()?;
        let limit_bits = usize::try_from(limit).ok()?;
        let len = usize::try_from(Self::byte_len(limit)).ok()?;
        if count > limit_bits || bytes.len() < len {
            return None;
        }

        let words = <[U64]>::ref_from_bytes(&bytes[..len]).ok()?;
        let mut bits = BitVec::<u64, Lsb0>::from_vec(words.iter().map(|w| w.get()).collect());
        bits.truncate(limit_bits);
        let available = bits[..count].count_zeros();
        Some(Self {
            bits,
            count,
            available,
            last_cursor: 0,
        })
    }

    /// Marks `count` blocks starting at `start` as allocated regardless of the cursor.
    pub fn reserve(&mut self, start: BlockAddr, count: u64) -> Result<()> {
        let start = usize::try_from(start).map_err(|_| Error::AddrOutOfBounds)?;
        let count = usize::try_from(count).map_err(|_| Error::AddrOutOfBounds)?;
        let end = start + count;
        if end > self.count {
            return Err(Error::AddrOutOfBounds);
        }
        let newly = self.bits[start..end].count_zeros();
        self.bits[start..end].fill(true);
        self.available -= newly;
        Ok(())
    }

    /// Attempts to find a contiguous span of `count` free blocks.
    /// Returns the starting address of the span.
    fn find_free(&self, count: usize) -> Option<usize> {
        assert!(count != 0, "cannot allocate zero blocks");

        let mut start = self.last_cursor;
        let before_last = 0..self.last_cursor;
        let after_last = self.last_cursor..self.count;

        for i in after_last.chain(before_last) {
            if i == 0 {
                // Wrap around
                start = 0;
            }

            if self.bits[i] {
                start = i + 1;
                continue;
            }

            if ((i + 1) - start) == count {
                return Some(start);
            }
        }
        None
    }
}

impl Allocator for BitmapAllocator {
    fn allocate(&mut self, count: u64) -> Result<BlockAddr> {
        let count = usize::try_from(count).map_err(|_| Error::NoSpace)?;

        let start = self.find_free(count).ok_or(Error::NoSpace)?;
        let end = start + count;
        self.bits[start..end].fill(true);
        self.available -= count;
        self.last_cursor = if end == self.count { 0 } else { end };

        Ok(start as u64)
    }

    fn deallocate(&mut self, start: BlockAddr, count: u64) -> Result<()> {
        let start = usize::try_from(start).map_err(|_| Error::AddrOutOfBounds)?;
        let count = usize::try_from(count).map_err(|_| Error::AddrOutOfBounds)?;

        let end = start + count;
        if end > self.count {
            return Err(Error::AddrOutOfBounds);
        }

        if self.bits[start..end].not_all() {
            return Err(Error::NotAllocated);
        }

        self.bits[start..end].fill(false);
        self.available += count;

        Ok(())
    }

    fn available(&self) -> u64 {
        self.available as u64
    }

    fn grow(&mut self, additional: u64) -> Result<()> {
        let additional = usize::try_from(additional).map_err(|_| Error::AddrOutOfBounds)?;
        let count = self.count + additional;
        if count > self.bits.len() {
            return Err(Error::AddrOutOfBounds);
        }
        self.available += self.bits[self.count..count].count_zeros();
        self.count = count;
        Ok(())
    }
}
