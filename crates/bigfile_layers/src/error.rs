//! Error types that can be emitted from this library

use miette::Diagnostic;
use thiserror::Error;

/// Error type for library
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    /// Transparent wrapper for [`std::io::Error`]
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    /// Transparent wrapper for [`bigfile_archive::error::Error`]
    #[error(transparent)]
    #[diagnostic(transparent)]
    Archive(#[from] bigfile_archive::error::Error),

    /// record id is not one of the known FourCCs
    #[error("unknown record '{0}'")]
    UnknownRecord(String),

    /// record is older than what can be read
    #[error("record '{record}' has version {version}, at least {minimum} is required")]
    UnsupportedRecordVersion {
        /// FourCC of the record
        record: &'static str,
        /// version found in the body
        version: u32,
        /// oldest version understood
        minimum: u32,
    },

    /// a tile cell address is malformed
    #[error("'{0}' is not a tile address")]
    #[diagnostic(help("expected face_RR_CC with a lowercase face and two-digit row and column"))]
    InvalidCell(String),
}

/// Generic result type with crate's Error as its error variant
pub type Result<T> = core::result::Result<T, Error>;
