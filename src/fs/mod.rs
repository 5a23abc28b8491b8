use std::collections::BTreeMap;

use zerocopy::{FromBytes, FromZeros, IntoBytes};

use crate::{
    block::{
        BLOCK_SIZE, Block, BlockAddr,
        allocator::{self, Allocator, bitmap::BitmapAllocator},
        storage::Storage,
    },
    fs::{
        error::{Error, Result},
        inode::Inode,
        node::{Extent, NODE_SIZE, NODES_PER_BLOCK, Node, NodeId, NodeName},
        superblock::{SUPER_ADDR, Superblock},
    },
};

pub mod error;
pub mod file;
pub mod inode;
pub mod node;
pub mod superblock;

pub use inode::Stat;

/// How many blocks the storage grows by at least when it runs out of space.
const GROW_STEP: u64 = 16;

/// Parameters used when formatting a filesystem.
#[derive(Debug, Clone)]
pub struct Config {
    /// How many files the node table holds.
    pub node_count: u64,
    /// How many blocks the storage may grow to. `None` pins it to the capacity at format time.
    pub block_limit: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_count: 64,
            block_limit: None,
        }
    }
}

/// An in-memory view of the filesystem.
///
/// Owns the storage and the inode table: every file's name binding, storage extents, open count
/// and unlinked state. Metadata changes are written through to storage as they happen.
pub struct Filesystem<S: Storage> {
    storage: S,
    superblock: Superblock,
    allocator: BitmapAllocator,
    slots: BitmapAllocator,
    inodes: BTreeMap<NodeId, Inode>,
    names: BTreeMap<NodeName, NodeId>,
}

impl<S: Storage> Filesystem<S> {
    /// Creates an empty filesystem on a storage device.
    pub fn format(mut storage: S, config: &Config) -> Result<Self> {
        let mut block_count = storage.capacity()?;
        let block_limit = config.block_limit.unwrap_or(block_count).max(block_count);
        let mut superblock = Superblock::new(block_count, block_limit, config.node_count);

        // Metadata plus at least one data block must fit
        let needed = superblock.data_start + 1;
        if needed > block_limit {
            return Err(Error::Storage(libc::ENOSPC));
        }
        if block_count < needed {
            storage.extend(needed - block_count)?;
            block_count = needed;
            superblock.block_count = block_count;
        }

        let mut allocator = BitmapAllocator::new(block_count, block_limit);
        allocator.reserve(SUPER_ADDR, superblock.data_start)?;
        let slots = BitmapAllocator::new(config.node_count, config.node_count);

        let mut fs = Filesystem {
            storage,
            superblock,
            allocator,
            slots,
            inodes: BTreeMap::new(),
            names: BTreeMap::new(),
        };

        let empty = Block::default();
        for addr in fs.superblock.node_table_start..fs.superblock.data_start {
            fs.storage.write_block(&empty, addr)?;
        }
        fs.write_allocator()?;
        fs.write_superblock()?;

        log::debug!(
            "formatted filesystem with {} blocks (limit {}) and {} nodes",
            block_count,
            block_limit,
            config.node_count
        );
        Ok(fs)
    }

    /// Mounts the filesystem from a storage device.
    /// Files that were unlinked while open when the filesystem was last used are reclaimed.
    pub fn mount(storage: S) -> Result<Self> {
        // Read the superblock
        let mut block = Block::default();
        storage.read_block(&mut block, SUPER_ADDR)?;
        let superblock = Superblock::read_from(&block).ok_or(Error::Uninterpretable)?;

        // Verify signature and layout
        if !superblock.is_valid() || storage.capacity()? < superblock.block_count {
            return Err(Error::Storage(libc::EINVAL));
        }

        let allocator = Self::read_allocator(&storage, &superblock)?;
        let slots = BitmapAllocator::new(superblock.node_count, superblock.node_count);

        let mut fs = Filesystem {
            storage,
            superblock,
            allocator,
            slots,
            inodes: BTreeMap::new(),
            names: BTreeMap::new(),
        };

        let orphans = fs.read_node_table()?;
        for &id in &orphans {
            log::debug!("reclaiming orphan {:?}", id);
            fs.reclaim(id)?;
        }
        if !orphans.is_empty() {
            log::info!("reclaimed {} file(s) unlinked while open", orphans.len());
        }

        Ok(fs)
    }

    fn read_allocator(storage: &S, superblock: &Superblock) -> Result<BitmapAllocator> {
        let addrs = superblock.block_alloc_start..superblock.node_table_start;
        let mut blocks = vec![Block::default(); addrs.clone().count()];
        for (block, addr) in blocks.iter_mut().zip(addrs) {
            storage.read_block(block, addr)?;
        }
        BitmapAllocator::from_bytes(
            superblock.block_count,
            superblock.block_limit,
            blocks.as_bytes(),
        )
        .ok_or(Error::Uninterpretable)
    }

    /// Loads every used node record, returning the ids of orphans.
    fn read_node_table(&mut self) -> Result<Vec<NodeId>> {
        let mut orphans = Vec::new();
        let mut block = Block::default();
        for slot in 0..self.superblock.node_count {
            let (addr, offset) = self.node_location(slot);
            if offset == 0 {
                self.storage.read_block(&mut block, addr)?;
            }
            let bytes = &block.data[offset..offset + NODE_SIZE];
            let node = Node::read_from_bytes(bytes).map_err(|_| Error::Uninterpretable)?;
            if node.is_free() {
                continue;
            }

            self.slots.reserve(slot, 1)?;
            let name = node.name()?;
            let unlinked = name.is_none();
            if let Some(name) = name {
                self.names.insert(name, node.id);
            } else {
                orphans.push(node.id);
            }
            self.inodes.insert(node.id, Inode::load(slot, node, unlinked));
        }
        Ok(orphans)
    }

    /// Returns the block address and byte offset of a node table slot.
    fn node_location(&self, slot: u64) -> (BlockAddr, usize) {
        let per_block = NODES_PER_BLOCK as u64;
        let addr = self.superblock.node_table_start + slot / per_block;
        let offset = (slot % per_block) as usize * NODE_SIZE;
        (addr, offset)
    }

    pub(crate) fn write_node(&mut self, slot: u64, node: &Node) -> Result<()> {
        let (addr, offset) = self.node_location(slot);
        let mut block = Block::default();
        self.storage.read_block(&mut block, addr)?;
        block.data[offset..offset + NODE_SIZE].copy_from_slice(node.as_bytes());
        self.storage.write_block(&block, addr)?;
        Ok(())
    }

    pub(crate) fn clear_node(&mut self, slot: u64) -> Result<()> {
        self.write_node(slot, &Node::new_zeroed())
    }

    fn write_superblock(&mut self) -> Result<()> {
        let block = Block::from(&self.superblock);
        self.storage.write_block(&block, SUPER_ADDR)?;
        Ok(())
    }

    fn write_allocator(&mut self) -> Result<()> {
        let blocks = Block::chunked(&self.allocator.to_bytes());
        let start = self.superblock.block_alloc_start;
        for (addr, block) in (start..).zip(&blocks) {
            self.storage.write_block(block, addr)?;
        }
        Ok(())
    }

    /// Allocates up to `wanted` zeroed blocks, growing the storage when it is full.
    /// The returned extent may be shorter than `wanted` when free space is fragmented.
    pub(crate) fn allocate_blocks(&mut self, wanted: u64) -> Result<Extent> {
        let mut len = wanted;
        let start = loop {
            match self.allocator.allocate(len) {
                Ok(start) => break start,
                Err(allocator::Error::NoSpace) => {
                    if self.grow(wanted)? {
                        continue;
                    }
                    if len == 1 {
                        return Err(allocator::Error::NoSpace.into());
                    }
                    len /= 2;
                }
                Err(err) => return Err(err.into()),
            }
        };

        let empty = Block::default();
        for addr in start..start + len {
            self.storage.write_block(&empty, addr)?;
        }
        self.write_allocator()?;
        Ok(Extent::new(start, len))
    }

    pub(crate) fn deallocate_blocks(&mut self, extents: &[Extent]) -> Result<()> {
        for extent in extents.iter().filter(|e| !e.is_empty()) {
            self.allocator.deallocate(extent.start(), extent.len())?;
        }
        self.write_allocator()
    }

    /// Grows the storage towards its limit. Returns `false` if it is already at the limit.
    fn grow(&mut self, wanted: u64) -> Result<bool> {
        let room = self.superblock.block_limit - self.superblock.block_count;
        if room == 0 {
            return Ok(false);
        }

        let additional = wanted.max(GROW_STEP).min(room);
        self.storage.extend(additional)?;
        self.allocator.grow(additional)?;
        self.superblock.block_count += additional;
        self.write_superblock()?;

        log::debug!(
            "grew storage by {} blocks to {}",
            additional,
            self.superblock.block_count
        );
        Ok(true)
    }

    pub(crate) fn read_block(&self, block: &mut Block, addr: BlockAddr) -> Result<()> {
        self.storage.read_block(block, addr)?;
        Ok(())
    }

    pub(crate) fn write_block(&mut self, block: &Block, addr: BlockAddr) -> Result<()> {
        self.storage.write_block(block, addr)?;
        Ok(())
    }

    pub(crate) fn allocate_slot(&mut self) -> Result<u64> {
        self.slots.allocate(1).map_err(|_| Error::NoNodes)
    }

    pub(crate) fn deallocate_slot(&mut self, slot: u64) -> Result<()> {
        self.slots.deallocate(slot, 1)?;
        Ok(())
    }

    pub(crate) fn allocate_node_id(&mut self) -> Result<NodeId> {
        let id = self.superblock.allocate_node();
        self.write_superblock()?;
        Ok(id)
    }

    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    /// Returns the number of data blocks available without growing the storage.
    pub fn available_blocks(&self) -> u64 {
        self.allocator.available()
    }

    /// Returns the number of unused node table slots.
    pub fn free_nodes(&self) -> u64 {
        self.slots.available()
    }

    /// Unmounts the filesystem, handing the storage device back.
    pub fn into_storage(self) -> S {
        self.storage
    }
}

/// Size of a block in bytes as `usize`.
pub(crate) const BLOCK_LEN: usize = BLOCK_SIZE as usize;
