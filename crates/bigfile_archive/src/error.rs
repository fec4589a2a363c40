//! Error types that can be emitted from this library

use miette::Diagnostic;
use thiserror::Error;

/// Error type for library
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    /// Transparent warpper for [`std::io::Error`]
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    /// Transparent warpper for [`binrw::Error`]
    #[error(transparent)]
    BinRWError(#[from] binrw::Error),

    /// file does not start with the bigfile signature
    #[error("file is an invalid bigfile archive (bad signature)")]
    InvalidSignature,

    /// version {0} is not supported
    #[error("unsupported bigfile version {0}")]
    UnsupportedVersion(u32),

    /// a name declared {0} bytes
    #[error("name of {0} bytes exceeds the maximum name length")]
    NameTooLong(u32),

    /// a length-delimited region would be overrun
    #[error("record declares {declared} bytes but only {remaining} remain")]
    #[diagnostic(help("the archive is truncated or a length field is corrupt"))]
    BoundsViolation {
        /// number of bytes the record asked for
        declared: u64,
        /// number of bytes left in the enclosing region
        remaining: u64,
    },

    /// directories nest deeper than {0} levels
    #[error("directories nest deeper than {0} levels")]
    #[diagnostic(help("the archive is corrupt or was crafted to exhaust the stack"))]
    DirectoryTooDeep(usize),

    /// the data region grew past what a 32-bit position can address
    #[error("data region of {0} bytes cannot be addressed by 32-bit positions")]
    DataTooLarge(u64),

    /// a directory holds more children than the format can express
    #[error("directory has {0} child directories, at most 255 can be written")]
    TooManyDirectories(usize),

    /// unable to find requested file
    #[error("unable to find requested file")]
    FileNotFound(#[from] FileNotFoundError),

    /// {0}
    #[error("{0}")]
    CustomError(String),
}

/// Error type to provide further information when a file has not been found
#[derive(Error, Diagnostic, Debug)]
#[error("unable to find requested file")]
pub enum FileNotFoundError {
    /// at index {0}
    #[error("at index {0}")]
    Index(usize),

    /// by path {0}
    #[error("by path {0}")]
    Path(String),
}

/// Generic result type with crate's Error as its error variant
pub type Result<T> = core::result::Result<T, Error>;
