use crate::block::{
    Block, BlockAddr,
    storage::{Result, Storage},
};

/// Storage that keeps blocks in memory.
#[derive(Default)]
pub struct MemStorage {
    blocks: Vec<Block>,
}

impl MemStorage {
    /// Constructs a zero-initialized `MemStorage` of `block_count` blocks.
    pub fn new(block_count: u64) -> Self {
        let blocks = vec![Block::default(); block_count as usize];
        Self { blocks }
    }
}

impl Storage for MemStorage {
    fn read_block(&self, block: &mut Block, addr: BlockAddr) -> Result<()> {
        let index = usize::try_from(addr).map_err(|_| libc::EIO)?;
        *block = *self.blocks.get(index).ok_or(libc::EIO)?;
        Ok(())
    }

    fn write_block(&mut self, block: &Block, addr: BlockAddr) -> Result<()> {
        let index = usize::try_from(addr).map_err(|_| libc::EIO)?;
        let dst = self.blocks.get_mut(index).ok_or(libc::EIO)?;
        *dst = *block;
        Ok(())
    }

    fn capacity(&self) -> Result<u64> {
        Ok(self.blocks.len() as u64)
    }

    fn extend(&mut self, additional: u64) -> Result<u64> {
        let additional = usize::try_from(additional).map_err(|_| libc::ENOSPC)?;
        self.blocks
            .resize(self.blocks.len() + additional, Block::default());
        self.capacity()
    }
}
