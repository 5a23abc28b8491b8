use crate::block::allocator;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    Storage(libc::c_int),
    Allocator(allocator::Error),

    Uninterpretable,

    // Node
    NotFound,
    NoNodes,
    FileTooLarge,

    // Name
    NameTooLong,
    InvalidName,
}

impl From<libc::c_int> for Error {
    fn from(errno: libc::c_int) -> Self {
        Self::Storage(errno)
    }
}

impl From<allocator::Error> for Error {
    fn from(err: allocator::Error) -> Self {
        Self::Allocator(err)
    }
}

impl From<Error> for libc::c_int {
    fn from(err: Error) -> Self {
        match err {
            Error::Storage(errno) => errno,
            Error::Allocator(err) => err.into(),
            Error::Uninterpretable => libc::EIO,
            Error::NotFound => libc::ENOENT,
            Error::NoNodes => libc::ENOSPC,
            Error::FileTooLarge => libc::EFBIG,
            Error::NameTooLong => libc::ENAMETOOLONG,
            Error::InvalidName => libc::EINVAL,
        }
    }
}
