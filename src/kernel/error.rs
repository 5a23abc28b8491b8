use crate::fs;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    Fs(fs::error::Error),

    // Descriptors
    BadDescriptor,
    ResourceExhausted,

    // User arguments
    InvalidArgument,
    BadAddress,
}

impl From<fs::error::Error> for Error {
    fn from(err: fs::error::Error) -> Self {
        Self::Fs(err)
    }
}

impl From<Error> for libc::c_int {
    fn from(err: Error) -> Self {
        match err {
            Error::Fs(err) => err.into(),
            Error::BadDescriptor => libc::EBADF,
            Error::ResourceExhausted => libc::EMFILE,
            Error::InvalidArgument => libc::EINVAL,
            Error::BadAddress => libc::EFAULT,
        }
    }
}
