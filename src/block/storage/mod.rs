pub mod file;
pub mod mem;

use crate::block::{Block, BlockAddr};

/// An implementation of `Storage` allows reading and writing blocks, as well as determining and
/// growing the block capacity.
pub trait Storage {
    /// Reads the block at `addr` into `block`.
    fn read_block(&self, block: &mut Block, addr: BlockAddr) -> Result<()>;

    /// Writes `block` into the block at `addr`.
    fn write_block(&mut self, block: &Block, addr: BlockAddr) -> Result<()>;

    /// Returns the number of blocks the storage can hold.
    fn capacity(&self) -> Result<u64>;

    /// Grows the storage by `additional` zeroed blocks, returning the new capacity.
    fn extend(&mut self, additional: u64) -> Result<u64>;
}

pub type Result<T> = core::result::Result<T, libc::c_int>;


#[macro_export]
macro_rules! test_storage {
    ($storage:ty) => {
        #[test]
        fn capacity() {
            $crate::block::storage::tests::capacity::<$storage>();
        }

        #[test]
        fn write_and_read() {
            $crate::block::storage::tests::write_and_read::<$storage>();
        }

        #[test]
        fn no_interference() {
            $crate::block::storage::tests::no_interference::<$storage>();
        }

        #[test]
        fn out_of_bounds() {
            $crate::block::storage::tests::out_of_bounds::<$storage>();
        }

        #[test]
        fn overwrite() {
            $crate::block::storage::tests::overwrite::<$storage>();
        }

        #[test]
        fn extend() {
            $crate::block::storage::tests::extend::<$storage>();
        }
    };
}
