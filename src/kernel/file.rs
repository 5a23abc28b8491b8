use std::{collections::BTreeMap, fmt};

use crate::{
    block::storage::Storage,
    fs::{Filesystem, node::NodeId},
    kernel::error::{Error, Result},
};

/// A unique id of an open file description. Ids are never reused.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId(u64);

impl FileId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileId({})", self.0)
    }
}

/// An open file: a counted reference to a node plus a cursor.
/// Shared by every descriptor bound to it, so descriptors obtained from separate opens have
/// separate cursors.
#[derive(Debug)]
pub struct FileDescription {
    node: NodeId,
    offset: u64,
    refs: u32,
}

impl FileDescription {
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Returns the number of descriptors bound to the file.
    pub fn refs(&self) -> u32 {
        self.refs
    }
}

/// Tracks opened files.
#[derive(Debug, Default)]
pub struct OpenFileTable {
    files: BTreeMap<FileId, FileDescription>,
    next_id: u64,
}

impl OpenFileTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the node, returning a new file with its cursor at 0 and a single reference.
    pub fn open<S: Storage>(&mut self, fs: &mut Filesystem<S>, node: NodeId) -> Result<FileId> {
        fs.retain(node)?;

        let id = FileId(self.next_id);
        self.next_id += 1;
        self.files.insert(
            id,
            FileDescription {
                node,
                offset: 0,
                refs: 1,
            },
        );

        log::debug!("opened {:?} on {:?}", id, node);
        Ok(id)
    }

    /// Adds a reference to the file.
    pub fn bind(&mut self, file: FileId) -> Result<()> {
        self.get_mut(file)?.refs += 1;
        Ok(())
    }

    /// Drops a reference to the file. The last reference closes it, releasing its node.
    pub fn unbind<S: Storage>(&mut self, fs: &mut Filesystem<S>, file: FileId) -> Result<()> {
        let description = self.get_mut(file)?;
        description.refs -= 1;
        if description.refs != 0 {
            return Ok(());
        }

        let node = description.node;
        self.files.remove(&file);
        log::debug!("closed {:?} on {:?}", file, node);
        fs.release(node)?;
        Ok(())
    }

    /// Reads from the file at its cursor, advancing the cursor by the number of bytes read.
    pub fn read<S: Storage>(
        &mut self,
        fs: &Filesystem<S>,
        file: FileId,
        buf: &mut [u8],
    ) -> Result<usize> {
        let description = self.get_mut(file)?;
        let read = fs.read_at(description.node, description.offset, buf)?;
        description.offset += read;
        Ok(read as usize)
    }

    /// Writes to the file at its cursor, advancing the cursor by the number of bytes written.
    pub fn write<S: Storage>(
        &mut self,
        fs: &mut Filesystem<S>,
        file: FileId,
        buf: &[u8],
    ) -> Result<usize> {
        let description = self.get_mut(file)?;
        let written = fs.write_at(description.node, description.offset, buf)?;
        description.offset += written;
        Ok(written as usize)
    }

    /// Reads from the file at `offset`, leaving the cursor alone.
    pub fn read_at<S: Storage>(
        &self,
        fs: &Filesystem<S>,
        file: FileId,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<usize> {
        let read = fs.read_at(self.get(file)?.node, offset, buf)?;
        Ok(read as usize)
    }

    /// Writes to the file at `offset`, leaving the cursor alone.
    pub fn write_at<S: Storage>(
        &self,
        fs: &mut Filesystem<S>,
        file: FileId,
        offset: u64,
        buf: &[u8],
    ) -> Result<usize> {
        let written = fs.write_at(self.get(file)?.node, offset, buf)?;
        Ok(written as usize)
    }

    pub fn get(&self, file: FileId) -> Result<&FileDescription> {
        self.files.get(&file).ok_or(Error::BadDescriptor)
    }

    fn get_mut(&mut self, file: FileId) -> Result<&mut FileDescription> {
        self.files.get_mut(&file).ok_or(Error::BadDescriptor)
    }

    /// Returns the number of open files.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
