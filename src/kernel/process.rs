use crate::{
    block::storage::Storage,
    kernel::{
        Kernel,
        error::{Error, Result},
        fd::{Descriptor, DescriptorTable, Fd, Stream},
        file::FileId,
        memory::AddressSpace,
    },
};

/// A user process as seen by the file subsystem: a private descriptor table and user memory,
/// plus a handle to the shared kernel state.
///
/// Dropping a process closes every descriptor it still holds.
pub struct Process<S: Storage> {
    kernel: Kernel<S>,
    fds: DescriptorTable,
    memory: AddressSpace,
}

impl<S: Storage> Process<S> {
    pub(crate) fn new(kernel: Kernel<S>, memory: AddressSpace) -> Self {
        let fds = DescriptorTable::new(kernel.config().max_open_files);
        Self {
            kernel,
            fds,
            memory,
        }
    }

    /// Opens the file named `name`, creating it if it doesn't exist.
    pub fn creat(&mut self, name: &str) -> Result<Fd> {
        self.open_file(name, true)
    }

    /// Opens the existing file named `name`.
    pub fn open(&mut self, name: &str) -> Result<Fd> {
        self.open_file(name, false)
    }

    fn open_file(&mut self, name: &str, create: bool) -> Result<Fd> {
        if self.fds.is_full() {
            return Err(Error::ResourceExhausted);
        }
        let file = self.kernel.open_file(name, create)?;
        self.install(file)
    }

    /// Binds `file` to a descriptor, giving the reference back to the kernel on failure.
    fn install(&mut self, file: FileId) -> Result<Fd> {
        match self.fds.allocate(file) {
            Ok(fd) => Ok(fd),
            Err(err) => {
                self.kernel.release_file(file)?;
                Err(err)
            }
        }
    }

    /// Reads from `fd` into `buf`, returning the number of bytes read. Returns 0 at end of file.
    pub fn read(&mut self, fd: Fd, buf: &mut [u8]) -> Result<usize> {
        match self.fds.resolve(fd)? {
            Descriptor::Console(Stream::Stdin) => {
                Ok(self.kernel.with_console(|console| console.read(buf)))
            }
            Descriptor::Console(Stream::Stdout) => Err(Error::BadDescriptor),
            Descriptor::File(file) => self.kernel.read_file(file, buf),
        }
    }

    /// Writes `buf` to `fd`, returning the number of bytes written.
    pub fn write(&mut self, fd: Fd, buf: &[u8]) -> Result<usize> {
        match self.fds.resolve(fd)? {
            Descriptor::Console(Stream::Stdout) => {
                Ok(self.kernel.with_console(|console| console.write(buf)))
            }
            Descriptor::Console(Stream::Stdin) => Err(Error::BadDescriptor),
            Descriptor::File(file) => self.kernel.write_file(file, buf),
        }
    }

    /// Closes `fd`. The descriptor becomes free for reuse even if releasing the file fails.
    pub fn close(&mut self, fd: Fd) -> Result<()> {
        match self.fds.free(fd)? {
            Descriptor::Console(_) => Ok(()),
            Descriptor::File(file) => self.kernel.release_file(file),
        }
    }

    /// Removes the name `name`. Descriptors already open on the file keep working.
    pub fn unlink(&mut self, name: &str) -> Result<()> {
        self.kernel.unlink(name)
    }

    /// Binds the file behind `fd` to another descriptor. Both share one cursor.
    pub fn dup(&mut self, fd: Fd) -> Result<Fd> {
        let Descriptor::File(file) = self.fds.resolve(fd)? else {
            return Err(Error::BadDescriptor);
        };
        if self.fds.is_full() {
            return Err(Error::ResourceExhausted);
        }
        self.kernel.bind_file(file)?;
        self.install(file)
    }

    pub fn kernel(&self) -> &Kernel<S> {
        &self.kernel
    }

    pub fn descriptors(&self) -> &DescriptorTable {
        &self.fds
    }

    pub fn memory(&self) -> &AddressSpace {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut AddressSpace {
        &mut self.memory
    }
}

impl<S: Storage> Drop for Process<S> {
    fn drop(&mut self) {
        for file in self.fds.drain() {
            if let Err(err) = self.kernel.release_file(file) {
                log::warn!("failed to release {:?} on process exit: {:?}", file, err);
            }
        }
    }
}
