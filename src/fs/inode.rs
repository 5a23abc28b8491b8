use crate::{
    block::storage::Storage,
    fs::{
        Filesystem,
        error::{Error, Result},
        node::{Node, NodeId, NodeName},
    },
};

/// The in-memory state of a file.
///
/// Name visibility and storage lifetime are tracked separately: `unlinked` hides the file from
/// lookups, while `open_count` keeps its storage alive until the last open file lets go of it.
pub(crate) struct Inode {
    slot: u64,
    pub(crate) node: Node,
    unlinked: bool,
    open_count: u32,
}

impl Inode {
    pub(crate) fn load(slot: u64, node: Node, unlinked: bool) -> Self {
        Self {
            slot,
            node,
            unlinked,
            open_count: 0,
        }
    }

    pub(crate) fn slot(&self) -> u64 {
        self.slot
    }
}

/// A snapshot of a file's attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    pub id: NodeId,
    /// `None` once the file has been unlinked.
    pub name: Option<NodeName>,
    pub size: u64,
    pub blocks: u64,
    pub open_count: u32,
}

impl<S: Storage> Filesystem<S> {
    /// Resolves a name to the live node bound to it.
    pub fn lookup(&self, name: &str) -> Result<NodeId> {
        self.lookup_name(&NodeName::try_from(name)?)
    }

    fn lookup_name(&self, name: &NodeName) -> Result<NodeId> {
        self.names.get(name).copied().ok_or(Error::NotFound)
    }

    /// Returns the live node bound to `name`, creating an empty one if there is none.
    pub fn create(&mut self, name: &str) -> Result<NodeId> {
        let name = NodeName::try_from(name)?;
        if let Some(&id) = self.names.get(&name) {
            return Ok(id);
        }

        let slot = self.allocate_slot()?;
        let id = match self.allocate_node_id() {
            Ok(id) => id,
            Err(err) => {
                self.deallocate_slot(slot)?;
                return Err(err);
            }
        };
        let node = Node::new(id, &name);
        if let Err(err) = self.write_node(slot, &node) {
            self.deallocate_slot(slot)?;
            return Err(err);
        }

        log::debug!("created {:?} as {:?}", name, id);
        self.inodes.insert(id, Inode::load(slot, node, false));
        self.names.insert(name, id);
        Ok(id)
    }

    /// Detaches `name` from its node.
    ///
    /// The name stops resolving immediately. The node's storage is reclaimed right away if
    /// nothing has it open, otherwise once the last open file releases it. If the node record
    /// cannot be updated the name keeps resolving.
    pub fn mark_unlinked(&mut self, name: &str) -> Result<()> {
        let name = NodeName::try_from(name)?;
        let id = self.lookup_name(&name)?;
        let inode = self.inode(id)?;

        if inode.open_count == 0 {
            log::debug!("unlinked {:?}, reclaiming {:?}", name, id);
            let res = self.reclaim(id);
            if !self.inodes.contains_key(&id) {
                self.names.remove(&name);
            }
            return res;
        }

        log::debug!(
            "unlinked {:?}, {:?} stays open {} time(s)",
            name,
            id,
            inode.open_count
        );
        let slot = inode.slot;
        let mut node = inode.node;
        node.set_orphan();
        self.write_node(slot, &node)?;

        let inode = self.inode_mut(id)?;
        inode.node = node;
        inode.unlinked = true;
        self.names.remove(&name);
        Ok(())
    }

    /// Records that one more open file references the node.
    pub fn retain(&mut self, id: NodeId) -> Result<()> {
        let inode = self.inodes.get_mut(&id).ok_or(Error::NotFound)?;
        inode.open_count += 1;
        Ok(())
    }

    /// Drops one open file's reference to the node, reclaiming an unlinked node when it was
    /// the last one.
    pub fn release(&mut self, id: NodeId) -> Result<()> {
        let inode = self.inodes.get_mut(&id).ok_or(Error::NotFound)?;
        debug_assert!(inode.open_count > 0, "released {:?} more often than retained", id);
        inode.open_count = inode.open_count.saturating_sub(1);

        if inode.open_count == 0 && inode.unlinked {
            log::debug!("last reference to unlinked {:?} released", id);
            return self.reclaim(id);
        }
        Ok(())
    }

    /// Destroys the node and frees its storage.
    ///
    /// Clearing the node record commits the removal. If that fails the node is left untouched;
    /// errors after it are reported with the node already gone.
    pub(crate) fn reclaim(&mut self, id: NodeId) -> Result<()> {
        let slot = self.inode(id)?.slot();
        self.clear_node(slot)?;

        let inode = self.inodes.remove(&id).ok_or(Error::NotFound)?;
        self.deallocate_slot(slot)?;
        self.deallocate_blocks(&inode.node.extents)
    }

    /// Returns a snapshot of the node's attributes. Works for unlinked nodes that are still open.
    pub fn stat(&self, id: NodeId) -> Result<Stat> {
        let inode = self.inode(id)?;
        let name = if inode.unlinked {
            None
        } else {
            inode.node.name()?
        };
        Ok(Stat {
            id,
            name,
            size: inode.node.size(),
            blocks: inode.node.block_count(),
            open_count: inode.open_count,
        })
    }

    /// Lists the live names in order.
    pub fn entries(&self) -> impl Iterator<Item = (&NodeName, NodeId)> {
        self.names.iter().map(|(name, &id)| (name, id))
    }

    /// Returns the number of nodes, including unlinked ones that are still open.
    pub fn node_count(&self) -> usize {
        self.inodes.len()
    }

    pub(crate) fn inode(&self, id: NodeId) -> Result<&Inode> {
        self.inodes.get(&id).ok_or(Error::NotFound)
    }

    pub(crate) fn inode_mut(&mut self, id: NodeId) -> Result<&mut Inode> {
        self.inodes.get_mut(&id).ok_or(Error::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use crate::fs::{
        node::NAME_MAX_LEN,
        tests::{new_flaky_fs, new_fs},
    };

    use super::*;

    #[test]
    fn lookup_missing() {
        let fs = new_fs();
        assert_eq!(fs.lookup("missing"), Err(Error::NotFound));
    }

    #[test]
    fn create_reuses_live_node() {
        let mut fs = new_fs();
        let id = fs.create("test").unwrap();
        assert_eq!(fs.create("test").unwrap(), id);
        assert_eq!(fs.lookup("test").unwrap(), id);
        assert_eq!(fs.node_count(), 1);
    }

    #[test]
    fn create_fails_when_table_full() {
        let mut fs = new_fs();
        for i in 0..16 {
            fs.create(&format!("file{i}")).unwrap();
        }
        assert_eq!(fs.create("one-too-many"), Err(Error::NoNodes));
        assert_eq!(fs.free_nodes(), 0);
    }

    #[test]
    fn unlink_closed_reclaims_immediately() {
        let mut fs = new_fs();
        let before = fs.available_blocks();
        let id = fs.create("test").unwrap();
        fs.write_at(id, 0, b"hihi").unwrap();
        assert_eq!(fs.available_blocks(), before - 1);

        fs.mark_unlinked("test").unwrap();
        assert_eq!(fs.available_blocks(), before);
        assert_eq!(fs.lookup("test"), Err(Error::NotFound));
        assert_eq!(fs.stat(id), Err(Error::NotFound));
        assert_eq!(fs.free_nodes(), 16);
    }

    #[test]
    fn unlink_open_defers_reclamation() {
        let mut fs = new_fs();
        let before = fs.available_blocks();
        let id = fs.create("test").unwrap();
        fs.retain(id).unwrap();
        fs.write_at(id, 0, b"hihi").unwrap();

        fs.mark_unlinked("test").unwrap();
        assert_eq!(fs.lookup("test"), Err(Error::NotFound));

        let stat = fs.stat(id).unwrap();
        assert_eq!(stat.name, None);
        assert_eq!(stat.size, 4);
        assert_eq!(stat.open_count, 1);
        assert_eq!(fs.available_blocks(), before - 1);

        fs.release(id).unwrap();
        assert_eq!(fs.available_blocks(), before);
        assert_eq!(fs.stat(id), Err(Error::NotFound));
    }

    #[test]
    fn unlink_twice_fails() {
        let mut fs = new_fs();
        let id = fs.create("test").unwrap();
        fs.retain(id).unwrap();
        fs.mark_unlinked("test").unwrap();
        assert_eq!(fs.mark_unlinked("test"), Err(Error::NotFound));
    }

    #[test]
    fn unlink_missing_fails() {
        let mut fs = new_fs();
        assert_eq!(fs.mark_unlinked("randomName"), Err(Error::NotFound));
    }

    #[test]
    fn unlink_too_long_leaves_table_alone() {
        let mut fs = new_fs();
        let name = "a".repeat(NAME_MAX_LEN + 1);
        fs.create(&name[..NAME_MAX_LEN]).unwrap();

        assert_eq!(fs.mark_unlinked(&name), Err(Error::NameTooLong));
        assert!(fs.lookup(&name[..NAME_MAX_LEN]).is_ok());
        assert_eq!(fs.node_count(), 1);
    }

    #[test]
    fn failed_unlink_changes_nothing() {
        let (mut fs, failing) = new_flaky_fs();
        let closed = fs.create("closed").unwrap();
        fs.write_at(closed, 0, b"data").unwrap();
        let open = fs.create("open").unwrap();
        fs.retain(open).unwrap();
        let available = fs.available_blocks();
        let free = fs.free_nodes();

        failing.store(true, Ordering::SeqCst);
        assert_eq!(fs.mark_unlinked("closed"), Err(Error::Storage(libc::EIO)));
        assert_eq!(fs.mark_unlinked("open"), Err(Error::Storage(libc::EIO)));
        failing.store(false, Ordering::SeqCst);

        assert_eq!(fs.lookup("closed").unwrap(), closed);
        assert_eq!(fs.lookup("open").unwrap(), open);
        assert_eq!(
            fs.stat(open).unwrap().name,
            Some(NodeName::try_from("open").unwrap())
        );
        assert_eq!(fs.node_count(), 2);
        assert_eq!(fs.available_blocks(), available);
        assert_eq!(fs.free_nodes(), free);

        fs.mark_unlinked("closed").unwrap();
        fs.mark_unlinked("open").unwrap();
        assert_eq!(fs.lookup("closed"), Err(Error::NotFound));
        assert_eq!(fs.stat(closed), Err(Error::NotFound));
        assert_eq!(fs.stat(open).unwrap().name, None);
        assert_eq!(fs.available_blocks(), available + 1);
    }

    #[test]
    fn failed_release_keeps_orphan() {
        let (mut fs, failing) = new_flaky_fs();
        let id = fs.create("test").unwrap();
        fs.retain(id).unwrap();
        fs.mark_unlinked("test").unwrap();

        failing.store(true, Ordering::SeqCst);
        assert_eq!(fs.release(id), Err(Error::Storage(libc::EIO)));
        failing.store(false, Ordering::SeqCst);

        assert_eq!(fs.node_count(), 1);
        assert_eq!(fs.stat(id).unwrap().open_count, 0);
        fs.reclaim(id).unwrap();
        assert_eq!(fs.node_count(), 0);
        assert_eq!(fs.free_nodes(), 16);
    }

    #[test]
    fn recreate_after_unlink_is_distinct() {
        let mut fs = new_fs();
        let old = fs.create("test").unwrap();
        fs.retain(old).unwrap();
        fs.write_at(old, 0, b"old").unwrap();
        fs.mark_unlinked("test").unwrap();

        let new = fs.create("test").unwrap();
        assert_ne!(new, old);
        assert_eq!(fs.stat(new).unwrap().size, 0);
        assert_eq!(fs.stat(old).unwrap().size, 3);

        fs.release(old).unwrap();
        assert_eq!(fs.lookup("test").unwrap(), new);
    }

    #[test]
    fn entries_skip_unlinked() {
        let mut fs = new_fs();
        fs.create("b").unwrap();
        let a = fs.create("a").unwrap();
        fs.retain(a).unwrap();
        fs.create("c").unwrap();
        fs.mark_unlinked("a").unwrap();

        let names: Vec<_> = fs.entries().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, ["b", "c"]);
    }
}
