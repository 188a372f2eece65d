use std::io;

use thiserror::Error;

/// Problems with the layout of an image. These are always fatal to the operation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("Doesn't appear to be a SquashFS (magic {0:#010x})")]
    BadMagic(u32),
    #[error("Not an RTL Squash filesystem ({protected_size} byte protected region, {file_size} byte file)")]
    NotRtl { protected_size: u64, file_size: u64 },
    #[error("SquashFS image too small ({size} bytes, need at least {min})")]
    TooSmall { size: u64, min: u64 },
    #[error("SquashFS image too large ({size} bytes does not fit the size field)")]
    TooLarge { size: u64 },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    pub fn format_error(&self) -> Option<&FormatError> {
        match self {
            Error::Format(e) => Some(e),
            Error::Io(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
