use crate::{
    block::storage::Storage,
    fs::node::NAME_MAX_LEN,
    kernel::{
        error::{Error, Result},
        fd::Fd,
        memory::{Access, VirtAddr},
        process::Process,
    },
};

/// System call numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    Halt = 0,
    Exit = 1,
    Exec = 2,
    Join = 3,
    Creat = 4,
    Open = 5,
    Read = 6,
    Write = 7,
    Close = 8,
    Unlink = 9,
}

impl TryFrom<u32> for Syscall {
    type Error = Error;

    fn try_from(number: u32) -> Result<Self> {
        Ok(match number {
            0 => Self::Halt,
            1 => Self::Exit,
            2 => Self::Exec,
            3 => Self::Join,
            4 => Self::Creat,
            5 => Self::Open,
            6 => Self::Read,
            7 => Self::Write,
            8 => Self::Close,
            9 => Self::Unlink,
            _ => return Err(Error::InvalidArgument),
        })
    }
}

fn descriptor(arg: i32) -> Result<Fd> {
    Fd::try_from(arg).map_err(|_| Error::BadDescriptor)
}

fn address(arg: i32) -> Result<VirtAddr> {
    VirtAddr::try_from(arg).map_err(|_| Error::BadAddress)
}

fn byte_count(arg: i32) -> Result<usize> {
    usize::try_from(arg).map_err(|_| Error::InvalidArgument)
}

fn ret(value: usize) -> Result<i32> {
    i32::try_from(value).map_err(|_| Error::InvalidArgument)
}

impl<S: Storage> Process<S> {
    /// Handles a system call on behalf of the process.
    ///
    /// Arguments are raw registers: names and buffers are addresses into the process's user
    /// memory. Returns the call's result, or -1 on any failure.
    pub fn syscall(&mut self, number: u32, a0: i32, a1: i32, a2: i32) -> i32 {
        match self.dispatch(number, a0, a1, a2) {
            Ok(value) => value,
            Err(err) => {
                log::debug!(
                    "syscall {} ({}, {}, {}) failed: {:?}",
                    number,
                    a0,
                    a1,
                    a2,
                    err
                );
                -1
            }
        }
    }

    fn dispatch(&mut self, number: u32, a0: i32, a1: i32, a2: i32) -> Result<i32> {
        let syscall = Syscall::try_from(number)?;
        log::trace!("{:?}({}, {}, {})", syscall, a0, a1, a2);

        match syscall {
            Syscall::Creat => {
                let name = self.read_name(a0)?;
                ret(self.creat(&name)?)
            }
            Syscall::Open => {
                let name = self.read_name(a0)?;
                ret(self.open(&name)?)
            }
            Syscall::Read => self.read_syscall(a0, a1, a2),
            Syscall::Write => self.write_syscall(a0, a1, a2),
            Syscall::Close => {
                self.close(descriptor(a0)?)?;
                Ok(0)
            }
            Syscall::Unlink => {
                let name = self.read_name(a0)?;
                self.unlink(&name)?;
                Ok(0)
            }
            // Process management lives outside the file subsystem
            Syscall::Halt | Syscall::Exit | Syscall::Exec | Syscall::Join => {
                Err(Error::InvalidArgument)
            }
        }
    }

    fn read_name(&self, vaddr: i32) -> Result<String> {
        self.memory().read_string(address(vaddr)?, NAME_MAX_LEN)
    }

    fn read_syscall(&mut self, fd: i32, vaddr: i32, count_arg: i32) -> Result<i32> {
        let fd = descriptor(fd)?;
        self.descriptors().resolve(fd)?;
        let count = byte_count(count_arg)?;
        let vaddr = address(vaddr)?;
        self.memory().validate(vaddr, count, Access::Write)?;

        let mut buf = vec![0u8; count];
        let read = self.read(fd, &mut buf)?;
        self.memory_mut().write(vaddr, &buf[..read])?;
        ret(read)
    }

    fn write_syscall(&mut self, fd: i32, vaddr: i32, count_arg: i32) -> Result<i32> {
        let fd = descriptor(fd)?;
        self.descriptors().resolve(fd)?;
        let count = byte_count(count_arg)?;
        if count == 0 {
            return Ok(0);
        }
        let vaddr = address(vaddr)?;
        self.memory().validate(vaddr, count, Access::Read)?;

        let mut buf = vec![0u8; count];
        self.memory().read(vaddr, &mut buf)?;
        ret(self.write(fd, &buf)?)
    }
}
