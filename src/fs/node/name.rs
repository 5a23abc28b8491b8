use std::{borrow::Borrow, fmt};

use crate::fs::error::{Error, Result};

/// How long a file name can be, in bytes.
pub const NAME_MAX_LEN: usize = 255;

/// Represents the name of a file in the flat namespace.
/// Guaranteed to be valid UTF-8, non-empty, at most [`NAME_MAX_LEN`] bytes long and free of
/// `'\0'` and `'/'`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct NodeName(Box<str>);

impl NodeName {
    /// Interprets the stored name bytes of a node record.
    pub fn try_from_bytes(bytes: &[u8]) -> Result<Self> {
        let name = std::str::from_utf8(bytes).map_err(|_| Error::Uninterpretable)?;
        Self::try_from(name).map_err(|_| Error::Uninterpretable)
    }

    /// Returns the name as `&str`.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl<'a> TryFrom<&'a str> for NodeName {
    type Error = Error;

    fn try_from(name: &'a str) -> Result<Self> {
        if name.len() > NAME_MAX_LEN {
            return Err(Error::NameTooLong);
        }

        if name.is_empty() || name.contains(['\0', '/']) {
            return Err(Error::InvalidName);
        }

        if name == "." || name == ".." {
            return Err(Error::InvalidName);
        }

        Ok(Self(name.into()))
    }
}

impl Borrow<str> for NodeName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
