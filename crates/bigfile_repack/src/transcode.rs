//! Collaborators the rewrite delegates to: image transcoding and buffer allocation

use bigfile_archive::FileKind;
use std::sync::Arc;

use crate::error::{BoxError, Error, Result};
use crate::sync::Guarded;

/// Bounds forwarded to the transcoder, in pixels
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TextureLimits {
    pub min_width: u32,
    pub max_width: u32,
    pub min_height: u32,
    pub max_height: u32,
    pub min_volume: u32,
    pub max_volume: u32,
}

impl TextureLimits {
    /// Largest value accepted for any bound
    pub const MAX: u32 = 4096;

    /// Check that every bound lies in `1..=4096` and no minimum exceeds its maximum.
    pub fn validate(&self) -> Result<()> {
        let pairs = [
            ("width", self.min_width, self.max_width),
            ("height", self.min_height, self.max_height),
            ("volume", self.min_volume, self.max_volume),
        ];
        for (what, min, max) in pairs {
            if !(1..=Self::MAX).contains(&min) || !(1..=Self::MAX).contains(&max) {
                return Err(Error::Configuration(format!(
                    "{what} limits must lie between 1 and {}",
                    Self::MAX
                )));
            }
            if min > max {
                return Err(Error::Configuration(format!(
                    "minimum {what} {min} exceeds maximum {max}"
                )));
            }
        }
        Ok(())
    }
}

impl Default for TextureLimits {
    fn default() -> Self {
        Self {
            min_width: 1,
            max_width: Self::MAX,
            min_height: 1,
            max_height: Self::MAX,
            min_volume: 1,
            max_volume: Self::MAX,
        }
    }
}

/// One file handed to the transcoder
#[derive(Debug, Clone, Copy)]
pub struct TranscodeRequest<'a> {
    /// Name of the file record
    pub name: &'a str,
    /// [`FileKind::ImageStandard`] or [`FileKind::ImageSpecial`]
    pub kind: FileKind,
    /// Bytes of the file
    pub data: &'a [u8],
    /// Layer that flagged the file, for special images
    pub layer: Option<usize>,
    pub limits: TextureLimits,
}

/// Converts image payloads
///
/// Called from several worker threads at once, each with its own buffers. The returned bytes replace the
/// input and their length becomes the new size of the file.
pub trait Transcoder: Send + Sync {
    /// Transcode `request.data`, writing into `out` (empty, with some capacity reserved) and returning it.
    fn transcode(
        &self,
        request: &TranscodeRequest<'_>,
        out: Vec<u8>,
    ) -> std::result::Result<Vec<u8>, BoxError>;
}

impl<F> Transcoder for F
where
    F: Fn(&TranscodeRequest<'_>, Vec<u8>) -> std::result::Result<Vec<u8>, BoxError> + Send + Sync,
{
    fn transcode(
        &self,
        request: &TranscodeRequest<'_>,
        out: Vec<u8>,
    ) -> std::result::Result<Vec<u8>, BoxError> {
        self(request, out)
    }
}

/// Source of the byte buffers used for chunks and transcoded output
pub trait BufferAllocator: Send + Sync {
    /// Get an empty buffer able to hold at least `capacity` bytes.
    fn allocate(&self, capacity: usize) -> Vec<u8>;

    /// Give a buffer back once its contents were written.
    fn release(&self, buffer: Vec<u8>);
}

/// Plain heap allocation
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAllocator;

impl BufferAllocator for SystemAllocator {
    fn allocate(&self, capacity: usize) -> Vec<u8> {
        Vec::with_capacity(capacity)
    }

    fn release(&self, _buffer: Vec<u8>) {}
}

/// Keeps released buffers around for reuse
#[derive(Debug)]
pub struct PooledAllocator {
    free: Guarded<Vec<Vec<u8>>>,
    capacity: usize,
}

impl PooledAllocator {
    /// Create a pool holding at most `capacity` idle buffers.
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            free: Guarded::new(Vec::with_capacity(capacity)),
            capacity,
        })
    }

    /// Number of idle buffers
    pub fn idle(&self) -> usize {
        self.free.lock(false).len()
    }
}

impl BufferAllocator for PooledAllocator {
    fn allocate(&self, capacity: usize) -> Vec<u8> {
        let reused = {
            let mut free = self.free.lock(false);
            free.iter()
                .position(|b| b.capacity() >= capacity)
                .map(|i| free.swap_remove(i))
        };
        reused.unwrap_or_else(|| Vec::with_capacity(capacity))
    }

    fn release(&self, mut buffer: Vec<u8>) {
        buffer.clear();
        let mut free = self.free.lock(false);
        if free.len() < self.capacity {
            free.push(buffer);
        }
    }
}
