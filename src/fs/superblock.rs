use crate::{
    block::{BLOCK_SIZE, Block, BlockAddr, BitmapAllocator},
    fs::node::{NODE_SIZE, NodeId},
};

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned, little_endian::U64};

/// Filesystem's signature.
pub const SIGNATURE: &[u8; 8] = b"skrafs\0\0";

/// Superblock's address.
pub const SUPER_ADDR: BlockAddr = 0;

/// Filesystem's metadata.
#[derive(Debug, Clone)]
pub struct Superblock {
    pub signature: [u8; 8],
    pub block_count: u64,
    pub block_limit: u64,
    pub node_count: u64,
    pub next_node_id: u64,
    pub block_alloc_start: BlockAddr,
    pub node_table_start: BlockAddr,
    pub data_start: BlockAddr,
}

impl Superblock {
    /// Constructs a superblock for a device of `block_count` blocks that may grow up to
    /// `block_limit` blocks and holds at most `node_count` nodes.
    pub fn new(block_count: u64, block_limit: u64, node_count: u64) -> Self {
        let block_alloc_bytes = BitmapAllocator::byte_len(block_limit);
        let block_alloc_blocks = block_alloc_bytes.div_ceil(BLOCK_SIZE);

        let node_table_bytes = node_count * NODE_SIZE as u64;
        let node_table_blocks = node_table_bytes.div_ceil(BLOCK_SIZE);

        // Superblock lives at address 0
        let block_alloc_start = SUPER_ADDR + 1;
        let node_table_start = block_alloc_start + block_alloc_blocks;
        let data_start = node_table_start + node_table_blocks;

        Self {
            signature: *SIGNATURE,
            block_count,
            block_limit,
            node_count,
            next_node_id: NodeId::FIRST.get(),
            block_alloc_start,
            node_table_start,
            data_start,
        }
    }

    /// Hands out the next node id. Ids are never reused.
    pub fn allocate_node(&mut self) -> NodeId {
        let id = self.next_node_id;
        self.next_node_id += 1;
        NodeId::new(id)
    }

    /// Checks the signature and that the regions are laid out in order.
    pub fn is_valid(&self) -> bool {
        self.signature == *SIGNATURE
            && self.block_count <= self.block_limit
            && self.block_alloc_start == SUPER_ADDR + 1
            && self.block_alloc_start <= self.node_table_start
            && self.node_table_start <= self.data_start
            && self.data_start <= self.block_count
            && self.next_node_id >= NodeId::FIRST.get()
    }
}

/// On-disk form of [`Superblock`]. Integers are little endian.
#[repr(C)]
#[derive(FromBytes, IntoBytes, Immutable, Unaligned, KnownLayout)]
struct RawSuperblock {
    signature: [u8; 8],
    block_count: U64,
    block_limit: U64,
    node_count: U64,
    next_node_id: U64,
    block_alloc_start: U64,
    node_table_start: U64,
    data_start: U64,
}

impl Superblock {
    /// Decodes the superblock stored at the start of `block`.
    pub fn read_from(block: &Block) -> Option<Self> {
        let (raw, _) = RawSuperblock::ref_from_prefix(&block.data).ok()?;
        Some(Self {
            signature: raw.signature,
            block_count: raw.block_count.get(),
            block_limit: raw.block_limit.get(),
            node_count: raw.node_count.get(),
            next_node_id: raw.next_node_id.get(),
            block_alloc_start: raw.block_alloc_start.get(),
            node_table_start: raw.node_table_start.get(),
            data_start: raw.data_start.get(),
        })
    }
}

impl From<&Superblock> for Block {
    fn from(value: &Superblock) -> Self {
        let raw = RawSuperblock {
            signature: value.signature,
            block_count: value.block_count.into(),
            block_limit: value.block_limit.into(),
            node_count: value.node_count.into(),
            next_node_id: value.next_node_id.into(),
            block_alloc_start: value.block_alloc_start.into(),
            node_table_start: value.node_table_start.into(),
            data_start: value.data_start.into(),
        };
        Block::new(raw.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regions_follow_each_other() {
        let superblock = Superblock::new(64, 64, 16);
        assert_eq!(superblock.block_alloc_start, 1);
        assert_eq!(superblock.node_table_start, 2);
        // 16 nodes of 512 bytes fit in two blocks
        assert_eq!(superblock.data_start, 4);
        assert!(superblock.is_valid());
    }

    #[test]
    fn node_ids_are_monotonic() {
        let mut superblock = Superblock::new(64, 64, 16);
        let first = superblock.allocate_node();
        let second = superblock.allocate_node();
        assert_eq!(first, NodeId::FIRST);
        assert!(second > first);
    }

    #[test]
    fn round_trips_through_block() {
        let superblock = Superblock::new(64, 128, 16);
        let block = Block::from(&superblock);
        let restored = Superblock::read_from(&block).unwrap();
        assert_eq!(restored.block_limit, 128);
        assert!(restored.is_valid());
    }

    #[test]
    fn integers_are_little_endian() {
        let superblock = Superblock::new(0x0102, 0x0304, 16);
        let block = Block::from(&superblock);
        assert_eq!(&block.data[..8], SIGNATURE);
        assert_eq!(&block.data[8..16], &0x0102u64.to_le_bytes());
        assert_eq!(&block.data[16..24], &0x0304u64.to_le_bytes());
    }

    #[test]
    fn rejects_foreign_signature() {
        let mut superblock = Superblock::new(64, 64, 16);
        superblock.signature = *b"otherfs\0";
        assert!(!superblock.is_valid());
    }
}
