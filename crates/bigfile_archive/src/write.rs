//! Types for writing BigFile archives
//!

use binrw::BinWrite;
use bon::Builder;
use byteorder::{LittleEndian, WriteBytesExt};
use std::collections::HashMap;
use std::io::{self, Cursor, Write};
use tracing::{instrument, Level};

use crate::archive::{Archive, DirId, File, FileId};
use crate::error::{Error, FileNotFoundError, Result};
use crate::types::Name;

impl Archive {
    /// Encode the header and directory tree of this level.
    pub fn metadata(&self) -> Result<Vec<u8>> {
        let mut out = Cursor::new(Vec::with_capacity(self.metadata_len() as usize));
        self.header.write(&mut out)?;
        self.write_directory(self.root(), &mut out)?;
        Ok(out.into_inner())
    }

    /// Write the header and directory tree of this level.
    ///
    /// File data is not part of the metadata and has to follow separately.
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<u64> {
        let metadata = self.metadata()?;
        writer.write_all(&metadata)?;
        Ok(metadata.len() as u64)
    }

    fn write_directory(&self, dir: DirId, out: &mut Cursor<Vec<u8>>) -> Result<()> {
        let directory = self.dir(dir);
        let children = u8::try_from(directory.dirs.len())
            .map_err(|_| Error::TooManyDirectories(directory.dirs.len()))?;

        Name::write_optional(directory.name.as_ref(), out)?;
        out.write_u8(children)?;
        for &child in &directory.dirs {
            self.write_directory(child, out)?;
        }

        out.write_u32::<LittleEndian>(directory.file_count() as u32)?;
        for id in directory.all_files() {
            let file = self.file(id);
            Name::write_optional(file.name.as_ref(), out)?;
            file.record().write(out)?;
        }
        Ok(())
    }
}

/// Options for how the archive should be written
#[derive(Debug, Clone, Copy, Builder)]
pub struct BigFileWriterOptions {
    /// Every file starts on a multiple of this many bytes of the data region
    #[builder(default = 1)]
    pub alignment: u32,

    /// Whether names are written with a trailing NUL
    #[builder(default = true)]
    pub terminate_names: bool,
}

impl Default for BigFileWriterOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// BigFile archive generator
///
/// Paths are split on `/`. Every segment but the last names a directory, an empty segment stands for an
/// unnamed directory and an empty last segment for an unnamed file.
///
/// ```
/// # fn doit() -> bigfile_archive::error::Result<()>
/// # {
/// use bigfile_archive::{write::BigFileWriterOptions, Archive, BigFileWriter};
/// use std::io::Write;
///
/// let mut bigfile = BigFileWriter::new(Vec::new(), BigFileWriterOptions::builder().alignment(4).build());
///
/// bigfile.start_file("cube/hello_world.txt")?;
/// bigfile.write_all(b"Hello, World!")?;
///
/// let bytes = bigfile.finish()?;
/// let archive = Archive::from_bytes(&bytes)?;
/// assert_eq!(archive.len(), 1);
/// # Ok(())
/// # }
/// # doit().unwrap();
/// ```
pub struct BigFileWriter<W: Write> {
    inner: W,
    options: BigFileWriterOptions,
    archive: Archive,
    directories: HashMap<(DirId, Option<String>), DirId>,
    data: Vec<u8>,
    current: Option<FileId>,
}

impl<W: Write> BigFileWriter<W> {
    /// Initializes the archive.
    ///
    /// Before writing to this object, the [`BigFileWriter::start_file`] function should be called.
    pub fn new(inner: W, options: BigFileWriterOptions) -> BigFileWriter<W> {
        BigFileWriter {
            inner,
            options,
            archive: Archive::new(),
            directories: HashMap::new(),
            data: Vec::new(),
            current: None,
        }
    }

    /// The archive level built so far
    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    /// Returns true if a file is currently open for writing.
    pub const fn is_writing_file(&self) -> bool {
        self.current.is_some()
    }

    /// Start a new file at the next aligned position of the data region.
    #[instrument(skip(self), err)]
    pub fn start_file(&mut self, path: &str) -> Result<FileId> {
        self.current = None;

        let alignment = self.options.alignment.max(1) as usize;
        let padded = self.data.len().next_multiple_of(alignment);
        self.data.resize(padded, 0);

        let position = self.position()?;
        let id = self.add(path, 0, position);
        self.current = Some(id);
        Ok(id)
    }

    /// Add another record sharing the data of `target`.
    #[instrument(skip(self), err)]
    pub fn alias(&mut self, path: &str, target: FileId) -> Result<FileId> {
        if self.current == Some(target) {
            self.current = None;
        }
        if target.0 >= self.archive.len() {
            return Err(FileNotFoundError::Index(target.0).into());
        }

        let File { size, position, .. } = *self.archive.file(target);
        Ok(self.add(path, size, position))
    }

    /// Write the metadata followed by the data region and return the inner writer.
    #[instrument(skip(self), err)]
    pub fn finish(mut self) -> Result<W> {
        self.current = None;
        self.archive.write(&mut self.inner)?;
        self.inner.write_all(&self.data)?;
        Ok(self.inner)
    }

    fn position(&self) -> Result<u32> {
        u32::try_from(self.data.len()).map_err(|_| Error::DataTooLarge(self.data.len() as u64))
    }

    fn add(&mut self, path: &str, size: u32, position: u32) -> FileId {
        let mut segments: Vec<&str> = path.split('/').collect();
        let file_name = segments.pop().unwrap_or_default();

        let mut dir = self.archive.root();
        for segment in segments {
            let key = (dir, (!segment.is_empty()).then(|| segment.to_string()));
            dir = match self.directories.get(&key) {
                Some(&existing) => existing,
                None => {
                    let name = key.1.as_ref().map(|n| self.name(n));
                    let created = self.archive.add_directory(dir, name);
                    self.directories.insert(key, created);
                    created
                }
            };
        }

        let name = (!file_name.is_empty()).then(|| self.name(file_name));
        self.archive.add_file(dir, File::new(name, size, position))
    }

    fn name(&self, text: &str) -> Name {
        if self.options.terminate_names {
            Name::new(text)
        } else {
            Name::unterminated(text)
        }
    }
}

impl<W: Write> Write for BigFileWriter<W> {
    #[instrument(skip_all, err, ret(level = Level::TRACE), fields(size=buf.len()))]
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let Some(id) = self.current else {
            return Err(io::Error::other("No file has been started"));
        };

        let file = self.archive.file(id);
        let size = u32::try_from(file.size as usize + buf.len())
            .map_err(|_| io::Error::other(Error::DataTooLarge(file.end() + buf.len() as u64)))?;

        self.data.extend_from_slice(buf);
        self.archive.file_mut(id).size = size;
        Ok(buf.len())
    }

    #[instrument(skip(self), err)]
    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
