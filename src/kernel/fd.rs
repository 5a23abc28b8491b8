use crate::kernel::{
    error::{Error, Result},
    file::FileId,
};

/// A process-local file descriptor.
pub type Fd = usize;

pub const STDIN: Fd = 0;
pub const STDOUT: Fd = 1;

/// The first descriptor handed out for files.
pub const FIRST_FILE: Fd = 2;

/// A console byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdin,
    Stdout,
}

/// What a descriptor refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Descriptor {
    Console(Stream),
    File(FileId),
}

/// Maps a process's descriptors to open files.
///
/// Descriptors 0 and 1 are bound to the console when the table is created. They can be closed
/// but are never handed out again. File descriptors take the lowest free slot from
/// [`FIRST_FILE`] on.
#[derive(Debug)]
pub struct DescriptorTable {
    console: [Option<Stream>; FIRST_FILE],
    files: Box<[Option<FileId>]>,
}

impl DescriptorTable {
    /// Constructs a table with room for `capacity` files.
    pub fn new(capacity: usize) -> Self {
        Self {
            console: [Some(Stream::Stdin), Some(Stream::Stdout)],
            files: vec![None; capacity].into_boxed_slice(),
        }
    }

    /// Binds `file` to the lowest free descriptor.
    pub fn allocate(&mut self, file: FileId) -> Result<Fd> {
        let (idx, slot) = self
            .files
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.is_none())
            .ok_or(Error::ResourceExhausted)?;
        *slot = Some(file);
        Ok(FIRST_FILE + idx)
    }

    /// Returns what `fd` is bound to.
    pub fn resolve(&self, fd: Fd) -> Result<Descriptor> {
        let descriptor = match fd.checked_sub(FIRST_FILE) {
            None => self.console[fd].map(Descriptor::Console),
            Some(idx) => self.files.get(idx).copied().flatten().map(Descriptor::File),
        };
        descriptor.ok_or(Error::BadDescriptor)
    }

    /// Vacates `fd`, returning what it was bound to.
    pub fn free(&mut self, fd: Fd) -> Result<Descriptor> {
        let descriptor = match fd.checked_sub(FIRST_FILE) {
            None => self.console[fd].take().map(Descriptor::Console),
            Some(idx) => self
                .files
                .get_mut(idx)
                .and_then(Option::take)
                .map(Descriptor::File),
        };
        descriptor.ok_or(Error::BadDescriptor)
    }

    /// Checks whether another file can be bound.
    pub fn is_full(&self) -> bool {
        self.files.iter().all(Option::is_some)
    }

    /// Returns the number of bound file descriptors.
    pub fn len(&self) -> usize {
        self.files.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Vacates every descriptor, returning the files that were bound.
    pub fn drain(&mut self) -> Vec<FileId> {
        self.console = [None; FIRST_FILE];
        self.files.iter_mut().filter_map(Option::take).collect()
    }
}
