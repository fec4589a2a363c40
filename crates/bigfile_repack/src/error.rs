//! Error types that can be emitted from this library

use miette::Diagnostic;
use thiserror::Error;

/// Boxed error returned by a [`crate::Transcoder`]
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

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

    /// a converted entry overlaps another entry
    #[error("entry at {position} overlaps an earlier entry ending at {previous_end}")]
    #[diagnostic(help("converted entries must not share bytes with entries at other positions"))]
    OverlappingEntries {
        /// input position of the later entry
        position: u64,
        /// end of the earlier entry
        previous_end: u64,
    },

    /// entries sharing a position disagree on their size
    #[error("entries at {position} alias each other with sizes {expected} and {found}")]
    AliasMismatch {
        /// shared input position
        position: u32,
        /// size of the group representative
        expected: u32,
        /// size of the disagreeing alias
        found: u32,
    },

    /// a rewritten size or position does not fit 32 bits
    #[error("rewritten value {0} does not fit a 32-bit field")]
    TooLarge(u64),

    /// the directory block changed length while rewriting
    #[error("directory block changed from {expected} to {actual} bytes")]
    MetadataChanged {
        /// length reserved for the block
        expected: u64,
        /// length produced after the rewrite
        actual: u64,
    },

    /// nested archives go deeper than supported
    #[error("archives nest deeper than {0} levels")]
    NestingTooDeep(usize),

    /// the transcoder failed for a file
    #[error("unable to transcode {name}")]
    Transcode {
        /// name of the file
        name: String,
        /// error reported by the transcoder
        source: BoxError,
    },

    /// a background thread went away without reporting
    #[error("a background thread terminated unexpectedly")]
    WorkerLost,

    /// work stopped because of an earlier failure
    #[error("repack aborted")]
    Aborted,

    /// invalid option
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Transparent wrapper for [`rayon::ThreadPoolBuildError`]
    #[error(transparent)]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// Transparent wrapper for [`tempfile::PersistError`]
    #[error(transparent)]
    Persist(#[from] tempfile::PersistError),
}

impl Error {
    /// Whether this error only reports that something else failed first
    pub fn is_secondary(&self) -> bool {
        matches!(self, Error::Aborted)
    }
}

/// Generic result type with crate's Error as its error variant
pub type Result<T> = core::result::Result<T, Error>;
