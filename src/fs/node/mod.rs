pub mod extent;
pub mod name;

pub use extent::Extent;
pub use name::{NAME_MAX_LEN, NodeName};

use std::fmt;

use zerocopy::{
    FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout, Unaligned, little_endian::U64,
};

use crate::{
    block::{BLOCK_SIZE, BlockAddr},
    fs::error::{Error, Result},
};

/// A node identifier.
/// Ids grow monotonically and are never reused, so a node unlinked while open and a node
/// created afterwards under the same name are always told apart.
#[repr(transparent)]
#[derive(Default, Clone, Copy, PartialEq, Eq)]
#[derive(FromBytes, IntoBytes, Immutable, Unaligned, KnownLayout)]
pub struct NodeId(U64);

impl NodeId {
    pub const NULL: Self = Self(U64::new(0));
    /// Reserved for the namespace itself.
    pub const ROOT: Self = Self(U64::new(1));
    /// The first id handed out to a file.
    pub const FIRST: Self = Self(U64::new(2));

    pub fn new(id: u64) -> Self {
        Self(U64::new(id))
    }

    pub fn get(&self) -> u64 {
        self.0.get()
    }

    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }
}

impl PartialOrd for NodeId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NodeId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.get().cmp(&other.get())
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.get())
    }
}

/// How many extents a [`Node`] can have.
pub const EXTENTS_PER_NODE: usize = 14;

const RESERVED_LEN: usize = 15;

/// [`Node`] size in bytes.
pub const NODE_SIZE: usize = size_of::<Node>();

const _: () = assert!(NODE_SIZE == 512, "node records must be 512 bytes");

/// How many nodes fit in a block.
pub const NODES_PER_BLOCK: usize = BLOCK_SIZE as usize / NODE_SIZE;

/// The node was unlinked while open and awaits reclamation.
const FLAG_ORPHAN: u8 = 1 << 0;

/// A persistent file record in the node table.
#[repr(C)]
#[derive(Clone, Copy)]
#[derive(FromBytes, IntoBytes, Immutable, Unaligned, KnownLayout)]
pub struct Node {
    pub id: NodeId,
    pub size: U64,
    flags: u8,
    name_len: u8,
    name: [u8; NAME_MAX_LEN],
    _reserved: [u8; RESERVED_LEN],
    pub extents: [Extent; EXTENTS_PER_NODE],
}

impl Node {
    /// Constructs an empty file record.
    pub fn new(id: NodeId, name: &NodeName) -> Self {
        let mut node = Self::new_zeroed();
        node.id = id;
        node.set_name(name);
        node
    }

    fn set_name(&mut self, name: &NodeName) {
        let bytes = name.as_bytes();
        self.name = [0; NAME_MAX_LEN];
        self.name[..bytes.len()].copy_from_slice(bytes);
        // Names are at most `NAME_MAX_LEN` (255) bytes long
        self.name_len = bytes.len() as u8;
    }

    /// Checks whether the record slot is unused.
    pub fn is_free(&self) -> bool {
        self.id.is_null()
    }

    pub fn size(&self) -> u64 {
        self.size.get()
    }

    /// Returns the node's name, or `None` for an orphan.
    pub fn name(&self) -> Result<Option<NodeName>> {
        if self.is_orphan() {
            return Ok(None);
        }
        let bytes = &self.name[..self.name_len as usize];
        NodeName::try_from_bytes(bytes).map(Some)
    }

    pub fn is_orphan(&self) -> bool {
        self.flags & FLAG_ORPHAN != 0
    }

    /// Detaches the record from its name, marking it for reclamation.
    pub fn set_orphan(&mut self) {
        self.flags |= FLAG_ORPHAN;
        self.name = [0; NAME_MAX_LEN];
        self.name_len = 0;
    }

    /// Returns the number of blocks that belong to the node.
    pub fn block_count(&self) -> u64 {
        self.extents.iter().map(Extent::len).sum()
    }

    /// Resolves the logical block index into a physical block address.
    pub fn physical_block(&self, logical_index: u64) -> Option<BlockAddr> {
        let mut offset = logical_index;
        for extent in self.extents.iter().take_while(|e| !e.is_empty()) {
            if extent.len() > offset {
                return Some(extent.start() + offset);
            }
            offset -= extent.len();
        }
        None
    }

    /// Appends a span of blocks, merging it into the last extent when they are adjacent.
    pub fn push_extent(&mut self, start: BlockAddr, len: u64) -> Result<()> {
        let used = self.extents.iter().take_while(|e| !e.is_empty()).count();
        if let Some(last) = used.checked_sub(1).map(|i| &mut self.extents[i]) {
            if last.end() == start {
                *last = Extent::new(last.start(), last.len() + len);
                return Ok(());
            }
        }
        let slot = self.extents.get_mut(used).ok_or(Error::FileTooLarge)?;
        *slot = Extent::new(start, len);
        Ok(())
    }

    /// Keeps the first `keep` logical blocks, returning the spans that were cut off.
    pub fn truncate_blocks(&mut self, keep: u64) -> Vec<Extent> {
        let mut freed = Vec::new();
        let mut remain = keep;
        for extent in self.extents.iter_mut().take_while(|e| !e.is_empty()) {
            if remain >= extent.len() {
                remain -= extent.len();
                continue;
            }
            freed.push(Extent::new(extent.start() + remain, extent.len() - remain));
            if remain == 0 {
                extent.clear();
            } else {
                *extent = Extent::new(extent.start(), remain);
                remain = 0;
            }
        }
        freed
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let extents: Vec<_> = self
            .extents
            .iter()
            .take_while(|e| !e.is_empty())
            .map(|e| (e.start(), e.len()))
            .collect();
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("size", &self.size())
            .field("orphan", &self.is_orphan())
            .field("name", &String::from_utf8_lossy(&self.name[..self.name_len as usize]))
            .field("extents", &extents)
            .finish()
    }
}
