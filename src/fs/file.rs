use crate::{
    block::{BLOCK_SIZE, Block, storage::Storage},
    fs::{
        BLOCK_LEN, Filesystem,
        error::{Error, Result},
        node::NodeId,
    },
};

impl<S: Storage> Filesystem<S> {
    /// Reads from the file at `offset` into `buf`, returning the number of bytes read.
    /// Reading at or past the end of the file reads nothing.
    pub fn read_at(&self, id: NodeId, mut offset: u64, mut buf: &mut [u8]) -> Result<u64> {
        let node = &self.inode(id)?.node;

        if offset >= node.size() {
            return Ok(0);
        }

        let avail = node.size() - offset;
        let to_read = avail.min(buf.len() as u64);
        buf = &mut buf[..to_read as usize];

        let mut read = 0;
        let mut block = Block::default();

        while !buf.is_empty() {
            let addr = node
                .physical_block(offset / BLOCK_SIZE)
                .ok_or(Error::Uninterpretable)?;
            let offset_in_block = (offset % BLOCK_SIZE) as usize;
            let chunk_size = (BLOCK_LEN - offset_in_block).min(buf.len());

            self.read_block(&mut block, addr)?;

            let (dst, remain) = buf.split_at_mut(chunk_size);
            dst.copy_from_slice(&block.data[offset_in_block..offset_in_block + chunk_size]);

            buf = remain;
            read += chunk_size as u64;
            offset += chunk_size as u64;
        }

        log::trace!("read {} bytes from {:?}", read, id);
        Ok(read)
    }

    /// Writes `buf` into the file at `offset`, extending it as needed.
    /// Returns the number of bytes written.
    pub fn write_at(&mut self, id: NodeId, mut offset: u64, mut buf: &[u8]) -> Result<u64> {
        let end = offset
            .checked_add(buf.len() as u64)
            .ok_or(Error::FileTooLarge)?;
        if buf.is_empty() {
            return Ok(0);
        }

        self.ensure_blocks(id, end.div_ceil(BLOCK_SIZE))?;

        let mut written = 0;
        let mut block = Block::default();

        while !buf.is_empty() {
            let addr = self
                .inode(id)?
                .node
                .physical_block(offset / BLOCK_SIZE)
                .ok_or(Error::Uninterpretable)?;
            let offset_in_block = (offset % BLOCK_SIZE) as usize;
            let chunk_size = (BLOCK_LEN - offset_in_block).min(buf.len());

            if chunk_size != BLOCK_LEN {
                self.read_block(&mut block, addr)?;
            }

            let (src, remain) = buf.split_at(chunk_size);
            block.data[offset_in_block..offset_in_block + chunk_size].copy_from_slice(src);

            self.write_block(&block, addr)?;

            buf = remain;
            written += chunk_size as u64;
            offset += chunk_size as u64;
        }

        let inode = self.inode_mut(id)?;
        if end > inode.node.size() {
            inode.node.size.set(end);
            let (slot, node) = (inode.slot(), inode.node);
            self.write_node(slot, &node)?;
        }

        log::trace!("wrote {} bytes to {:?}", written, id);
        Ok(written)
    }

    /// Sets the file's size. Shrinking frees trailing blocks, growing reads back zeroes.
    pub fn truncate(&mut self, id: NodeId, size: u64) -> Result<()> {
        let current = self.inode(id)?.node.size();
        if size == current {
            return Ok(());
        }

        let keep = size.div_ceil(BLOCK_SIZE);
        if size > current {
            self.ensure_blocks(id, keep)?;
        } else {
            // Zero the tail of the last kept block so growing again reads back zeroes
            let offset_in_block = (size % BLOCK_SIZE) as usize;
            if offset_in_block != 0 {
                let addr = self
                    .inode(id)?
                    .node
                    .physical_block(size / BLOCK_SIZE)
                    .ok_or(Error::Uninterpretable)?;
                let mut block = Block::default();
                self.read_block(&mut block, addr)?;
                block.data[offset_in_block..].fill(0);
                self.write_block(&block, addr)?;
            }

            let freed = self.inode_mut(id)?.node.truncate_blocks(keep);
            self.deallocate_blocks(&freed)?;
        }

        let inode = self.inode_mut(id)?;
        inode.node.size.set(size);
        let (slot, node) = (inode.slot(), inode.node);
        self.write_node(slot, &node)?;

        log::debug!("truncated {:?} from {} to {} bytes", id, current, size);
        Ok(())
    }

    /// Makes sure the file owns at least `count` blocks.
    /// The node record is persisted after every allocation, so no block is ever owned by nobody.
    fn ensure_blocks(&mut self, id: NodeId, count: u64) -> Result<()> {
        loop {
            let have = self.inode(id)?.node.block_count();
            if have >= count {
                return Ok(());
            }

            let extent = self.allocate_blocks(count - have)?;
            let inode = self.inode_mut(id)?;
            if let Err(err) = inode.node.push_extent(extent.start(), extent.len()) {
                self.deallocate_blocks(&[extent])?;
                return Err(err);
            }
            let (slot, node) = (inode.slot(), inode.node);
            self.write_node(slot, &node)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::fs::{node::EXTENTS_PER_NODE, tests::new_fs};

    use super::*;

    #[test]
    fn read_empty() {
        let mut fs = new_fs();
        let id = fs.create("test").unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(fs.read_at(id, 0, &mut buf).unwrap(), 0);
    }

    #[test]
    fn read_past_end() {
        let mut fs = new_fs();
        let id = fs.create("test").unwrap();
        fs.write_at(id, 0, b"hihi").unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(fs.read_at(id, 2, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"hi");
        assert_eq!(fs.read_at(id, 4, &mut buf).unwrap(), 0);
        assert_eq!(fs.read_at(id, 100, &mut buf).unwrap(), 0);
    }

    #[test]
    fn write_across_blocks() {
        let mut fs = new_fs();
        let id = fs.create("test").unwrap();
        let data: Vec<u8> = (0..BLOCK_LEN * 3 + 17).map(|i| (i % 251) as u8).collect();

        assert_eq!(fs.write_at(id, 0, &data).unwrap(), data.len() as u64);
        assert_eq!(fs.stat(id).unwrap().size, data.len() as u64);
        assert_eq!(fs.stat(id).unwrap().blocks, 4);

        let mut buf = vec![0u8; data.len()];
        assert_eq!(fs.read_at(id, 0, &mut buf).unwrap(), data.len() as u64);
        assert_eq!(buf, data);
    }

    #[test]
    fn overwrite_keeps_size() {
        let mut fs = new_fs();
        let id = fs.create("test").unwrap();
        fs.write_at(id, 0, b"hello world").unwrap();
        fs.write_at(id, 6, b"there").unwrap();

        let mut buf = [0u8; 11];
        fs.read_at(id, 0, &mut buf).unwrap();
        assert_eq!(&buf, b"hello there");
        assert_eq!(fs.stat(id).unwrap().size, 11);
    }

    #[test]
    fn write_past_end_leaves_zeroed_gap() {
        let mut fs = new_fs();
        let id = fs.create("test").unwrap();
        let offset = BLOCK_SIZE + 10;
        fs.write_at(id, offset, b"tail").unwrap();

        let mut buf = vec![0xFFu8; offset as usize + 4];
        assert_eq!(fs.read_at(id, 0, &mut buf).unwrap(), offset + 4);
        assert!(buf[..offset as usize].iter().all(|&b| b == 0));
        assert_eq!(&buf[offset as usize..], b"tail");
    }

    #[test]
    fn write_overflowing_offset_fails() {
        let mut fs = new_fs();
        let id = fs.create("test").unwrap();
        assert_eq!(fs.write_at(id, u64::MAX, b"x"), Err(Error::FileTooLarge));
    }

    #[test]
    fn empty_write_allocates_nothing() {
        let mut fs = new_fs();
        let id = fs.create("test").unwrap();
        let available = fs.available_blocks();
        assert_eq!(fs.write_at(id, 0, &[]).unwrap(), 0);
        assert_eq!(fs.available_blocks(), available);
        assert_eq!(fs.stat(id).unwrap().size, 0);
    }

    #[test]
    fn write_grows_storage() {
        let mut fs = new_fs();
        let id = fs.create("big").unwrap();
        let len = (fs.available_blocks() + 8) as usize * BLOCK_LEN;
        let data = vec![0x5A; len];

        assert_eq!(fs.write_at(id, 0, &data).unwrap(), len as u64);
        assert!(fs.superblock().block_count > 32);

        let mut buf = vec![0u8; len];
        fs.read_at(id, 0, &mut buf).unwrap();
        assert_eq!(buf, data);
    }

    #[test]
    fn fragmented_file_runs_out_of_extents() {
        let mut fs = new_fs();
        let id = fs.create("frag").unwrap();
        let other = fs.create("other").unwrap();

        // Interleave single blocks so no two of the file's blocks are adjacent
        for i in 0..EXTENTS_PER_NODE as u64 {
            fs.write_at(id, i * BLOCK_SIZE, &[1]).unwrap();
            fs.write_at(other, i * BLOCK_SIZE, &[2]).unwrap();
        }

        let res = fs.write_at(id, EXTENTS_PER_NODE as u64 * BLOCK_SIZE, &[1]);
        assert_eq!(res, Err(Error::FileTooLarge));
        assert_eq!(fs.stat(id).unwrap().blocks, EXTENTS_PER_NODE as u64);

        // The block allocated for the failed write was handed back
        let superblock = fs.superblock();
        let used = 2 * EXTENTS_PER_NODE as u64;
        let expected = superblock.block_count - superblock.data_start - used;
        assert_eq!(fs.available_blocks(), expected);
    }

    #[test]
    fn truncate_shrinks_and_zeroes_tail() {
        let mut fs = new_fs();
        let id = fs.create("test").unwrap();
        let available = fs.available_blocks();
        fs.write_at(id, 0, &[0xAB; BLOCK_LEN * 2]).unwrap();

        fs.truncate(id, 10).unwrap();
        assert_eq!(fs.stat(id).unwrap().size, 10);
        assert_eq!(fs.available_blocks(), available - 1);

        fs.truncate(id, 20).unwrap();
        let mut buf = [0u8; 20];
        assert_eq!(fs.read_at(id, 0, &mut buf).unwrap(), 20);
        assert_eq!(&buf[..10], &[0xAB; 10]);
        assert_eq!(&buf[10..], &[0; 10]);

        fs.truncate(id, 0).unwrap();
        assert_eq!(fs.available_blocks(), available);
    }
}
