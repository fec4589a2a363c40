//! Length-delimited regions.
//!
//! Every nested archive and every classification record declares its own length. Reading or writing
//! through a [`Scope`] or [`ScopedWriter`] guarantees that a corrupt length field is reported as
//! [`Error::BoundsViolation`] instead of silently consuming the bytes of a neighbour.

use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::error::{Error, Result};

/// A reader limited to `len` bytes starting at the inner reader's current position
#[derive(Debug)]
pub struct Scope<R> {
    inner: R,
    start: u64,
    len: u64,
    pos: u64,
}

impl<R: Read + Seek> Scope<R> {
    /// Enter a region of `len` bytes at the current position of `inner`.
    pub fn new(mut inner: R, len: u64) -> Result<Self> {
        let start = inner.stream_position()?;
        Ok(Self {
            inner,
            start,
            len,
            pos: 0,
        })
    }

    /// Enter a region of `len` bytes at the current position, checking that it fits inside this one.
    pub fn nested(&mut self, len: u64) -> Result<Scope<&mut Self>> {
        self.ensure(len)?;
        Scope::new(self, len)
    }

    /// Leave the region.
    ///
    /// Fails if the cursor ended up past the declared end, otherwise skips whatever was not read.
    pub fn finish(mut self) -> Result<R> {
        if self.pos > self.len {
            return Err(Error::BoundsViolation {
                declared: self.pos,
                remaining: self.len,
            });
        }
        if self.pos < self.len {
            self.seek(SeekFrom::Start(self.len))?;
        }
        Ok(self.inner)
    }

    /// Skip `count` bytes.
    pub fn skip(&mut self, count: u64) -> Result<()> {
        self.ensure(count)?;
        self.seek(SeekFrom::Current(count as i64))?;
        Ok(())
    }
}

impl<R> Scope<R> {
    /// Fail unless `declared` more bytes are available in this region.
    pub fn ensure(&self, declared: u64) -> Result<()> {
        let remaining = self.remaining();
        if declared > remaining {
            return Err(Error::BoundsViolation {
                declared,
                remaining,
            });
        }
        Ok(())
    }

    /// Bytes left before the end of the region
    pub fn remaining(&self) -> u64 {
        self.len.saturating_sub(self.pos)
    }

    /// Cursor relative to the start of the region
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Declared length of the region
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the region is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Absolute position of the region start in the inner stream
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Unwrap the inner reader without any end-of-region check
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for Scope<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let max = (buf.len() as u64).min(self.remaining()) as usize;
        if max == 0 {
            return Ok(0);
        }
        let read = self.inner.read(&mut buf[..max])?;
        self.pos += read as u64;
        Ok(read)
    }
}

impl<R: Seek> Seek for Scope<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(delta) => self.pos as i128 + delta as i128,
            SeekFrom::End(delta) => self.len as i128 + delta as i128,
        };
        if target < 0 || target > self.len as i128 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("seek to {target} outside of a {} byte region", self.len),
            ));
        }

        self.inner.seek(SeekFrom::Start(self.start + target as u64))?;
        self.pos = target as u64;
        Ok(self.pos)
    }
}

/// A writer that refuses to emit more than `len` bytes
#[derive(Debug)]
pub struct ScopedWriter<W> {
    inner: W,
    len: u64,
    pos: u64,
}

impl<W: Write> ScopedWriter<W> {
    /// Reserve a region of exactly `len` bytes.
    pub fn new(inner: W, len: u64) -> Self {
        Self { inner, len, pos: 0 }
    }

    /// Bytes written so far
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Leave the region, which must have been filled exactly.
    pub fn finish(self) -> Result<W> {
        if self.pos != self.len {
            return Err(Error::BoundsViolation {
                declared: self.pos,
                remaining: self.len,
            });
        }
        Ok(self.inner)
    }
}

impl<W: Write> Write for ScopedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let remaining = self.len - self.pos;
        if buf.len() as u64 > remaining {
            return Err(io::Error::other(Error::BoundsViolation {
                declared: self.pos + buf.len() as u64,
                remaining: self.len,
            }));
        }
        let written = self.inner.write(buf)?;
        self.pos += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod test {
    use std::io::{Cursor, Read, Seek, SeekFrom, Write};

    use byteorder::{LittleEndian, ReadBytesExt};

    use crate::error::{Error, Result};
    use crate::scope::{Scope, ScopedWriter};

    #[test]
    fn read_stops_at_region_end() -> Result<()> {
        let mut input = Cursor::new(vec![1, 2, 3, 4, 5, 6]);
        input.seek(SeekFrom::Start(1))?;

        let mut scope = Scope::new(&mut input, 3)?;
        let mut buffer = Vec::new();
        scope.read_to_end(&mut buffer)?;

        assert_eq!(buffer, vec![2, 3, 4]);
        assert_eq!(scope.remaining(), 0);
        Ok(())
    }

    #[test]
    fn nested_region_must_fit() -> Result<()> {
        let mut input = Cursor::new(vec![0u8; 8]);
        let mut scope = Scope::new(&mut input, 8)?;
        scope.read_u32::<LittleEndian>()?;

        let result = scope.nested(5);
        assert!(matches!(
            result,
            Err(Error::BoundsViolation {
                declared: 5,
                remaining: 4
            })
        ));
        Ok(())
    }

    #[test]
    fn finish_skips_unread_bytes() -> Result<()> {
        let mut input = Cursor::new(vec![1, 0, 0, 0, 9, 9, 7]);
        {
            let mut scope = Scope::new(&mut input, 6)?;
            assert_eq!(scope.read_u32::<LittleEndian>()?, 1);
            scope.finish()?;
        }
        assert_eq!(input.read_u8()?, 7);
        Ok(())
    }

    #[test]
    fn seek_outside_region_fails() -> Result<()> {
        let mut input = Cursor::new(vec![0u8; 16]);
        input.seek(SeekFrom::Start(4))?;
        let mut scope = Scope::new(&mut input, 4)?;

        assert!(scope.seek(SeekFrom::Current(5)).is_err());
        assert_eq!(scope.seek(SeekFrom::End(0))?, 4);
        assert_eq!(input.position(), 8);
        Ok(())
    }

    #[test]
    fn scoped_writer_refuses_overrun() -> Result<()> {
        let mut writer = ScopedWriter::new(Vec::new(), 4);
        writer.write_all(&[1, 2, 3])?;
        assert!(writer.write_all(&[4, 5]).is_err());

        let mut writer = ScopedWriter::new(Vec::new(), 4);
        writer.write_all(&[1, 2, 3])?;
        assert!(writer.finish().is_err());
        Ok(())
    }
}
