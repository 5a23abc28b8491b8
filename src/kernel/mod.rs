pub mod console;
pub mod error;
pub mod fd;
pub mod file;
pub mod memory;
pub mod process;
pub mod syscall;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use spin::Mutex;

use crate::{
    block::storage::Storage,
    fs::{Filesystem, node::NodeId},
    kernel::{
        console::{BufferConsole, Console},
        error::Result,
        file::{FileId, OpenFileTable},
        memory::AddressSpace,
        process::Process,
    },
};

/// Kernel parameters.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// How many files a process can have open at once.
    pub max_open_files: usize,
    /// How many pages of user memory a process gets.
    pub user_pages: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            max_open_files: 16,
            user_pages: 8,
        }
    }
}

struct Shared<S: Storage> {
    config: KernelConfig,
    files: Mutex<OpenFileTable>,
    fs: Mutex<Filesystem<S>>,
    console: Mutex<Box<dyn Console>>,
}

/// A handle to the kernel's shared state: the filesystem, the open file table and the console.
///
/// Handles are cheap to clone and every clone refers to the same state. When an operation needs
/// both the open file table and the filesystem, the open file table is locked first.
pub struct Kernel<S: Storage> {
    shared: Arc<Shared<S>>,
}

impl<S: Storage> Clone for Kernel<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: Storage> Kernel<S> {
    /// Constructs a kernel on top of a mounted filesystem with the default configuration and an
    /// in-memory console.
    pub fn new(fs: Filesystem<S>) -> Self {
        Self::with_config(fs, KernelConfig::default(), BufferConsole::new())
    }

    pub fn with_config(
        fs: Filesystem<S>,
        config: KernelConfig,
        console: impl Console + 'static,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                files: Mutex::new(OpenFileTable::new()),
                fs: Mutex::new(fs),
                console: Mutex::new(Box::new(console)),
            }),
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.shared.config
    }

    /// Starts a process with an empty descriptor table and fresh user memory.
    pub fn spawn(&self) -> Process<S> {
        let memory = AddressSpace::new(self.shared.config.user_pages);
        Process::new(self.clone(), memory)
    }

    /// Runs `f` with exclusive access to the filesystem.
    pub fn with_fs<T>(&self, f: impl FnOnce(&mut Filesystem<S>) -> T) -> T {
        f(&mut self.shared.fs.lock())
    }

    /// Runs `f` with exclusive access to the console.
    pub fn with_console<T>(&self, f: impl FnOnce(&mut dyn Console) -> T) -> T {
        f(self.shared.console.lock().as_mut())
    }

    /// Opens the file named `name`, creating it first if `create` is set.
    pub fn open_file(&self, name: &str, create: bool) -> Result<FileId> {
        let mut files = self.shared.files.lock();
        let mut fs = self.shared.fs.lock();
        let node = if create {
            fs.create(name)?
        } else {
            fs.lookup(name)?
        };
        files.open(&mut *fs, node)
    }

    /// Opens a node by id.
    pub fn open_node(&self, node: NodeId) -> Result<FileId> {
        let mut files = self.shared.files.lock();
        let mut fs = self.shared.fs.lock();
        files.open(&mut *fs, node)
    }

    /// Adds a reference to an open file.
    pub fn bind_file(&self, file: FileId) -> Result<()> {
        self.shared.files.lock().bind(file)
    }

    /// Drops a reference to an open file, closing it with the last one.
    pub fn release_file(&self, file: FileId) -> Result<()> {
        let mut files = self.shared.files.lock();
        let mut fs = self.shared.fs.lock();
        files.unbind(&mut *fs, file)
    }

    /// Detaches `name` from its file. Open files keep working until they are closed.
    pub fn unlink(&self, name: &str) -> Result<()> {
        let _files = self.shared.files.lock();
        let mut fs = self.shared.fs.lock();
        fs.mark_unlinked(name)?;
        Ok(())
    }

    pub fn read_file(&self, file: FileId, buf: &mut [u8]) -> Result<usize> {
        let mut files = self.shared.files.lock();
        let fs = self.shared.fs.lock();
        files.read(&*fs, file, buf)
    }

    pub fn write_file(&self, file: FileId, buf: &[u8]) -> Result<usize> {
        let mut files = self.shared.files.lock();
        let mut fs = self.shared.fs.lock();
        files.write(&mut *fs, file, buf)
    }

    pub fn read_file_at(&self, file: FileId, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let files = self.shared.files.lock();
        let fs = self.shared.fs.lock();
        files.read_at(&*fs, file, offset, buf)
    }

    pub fn write_file_at(&self, file: FileId, offset: u64, buf: &[u8]) -> Result<usize> {
        let files = self.shared.files.lock();
        let mut fs = self.shared.fs.lock();
        files.write_at(&mut *fs, file, offset, buf)
    }

    /// Returns the node an open file refers to.
    pub fn file_node(&self, file: FileId) -> Result<NodeId> {
        Ok(self.shared.files.lock().get(file)?.node())
    }

    /// Returns the cursor of an open file.
    pub fn file_offset(&self, file: FileId) -> Result<u64> {
        Ok(self.shared.files.lock().get(file)?.offset())
    }

    /// Returns the number of files open across all processes.
    pub fn open_file_count(&self) -> usize {
        self.shared.files.lock().len()
    }
}
