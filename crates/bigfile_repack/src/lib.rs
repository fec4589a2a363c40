//! Repacking BigFile archives
//!
//! A repack rewrites an archive and every archive nested in it while its image tiles are run through a
//! [`Transcoder`]. Every other byte is copied as it is, and every position and size record is recomputed
//! so the output can be seeked into exactly like the input.
//!
//! ## Threads
//!
//! | Thread     | Work                                                                   |
//! |------------|------------------------------------------------------------------------|
//! | traversal  | walks each level in position order, enqueues output tasks, settles sizes |
//! | pool       | parses nested directory trees and transcodes images                    |
//! | output     | writes queued tasks strictly in enqueue order                          |
//!
//! Each level reserves room for its directory block first and patches it once its sizes are known, so
//! the output is produced in a single forward pass apart from those patches.
//!
//! Shared state lives in [`sync::Guarded`] containers, the only locking used by the pipeline.

pub mod error;
pub mod options;
pub mod pipeline;
mod repack;
mod rewrite;
pub mod sync;
pub mod transcode;

pub use options::RepackOptions;
pub use repack::{RepackStats, Repacker};
pub use rewrite::MAX_NESTING;
pub use transcode::{
    BufferAllocator, PooledAllocator, SystemAllocator, TextureLimits, TranscodeRequest, Transcoder,
};
