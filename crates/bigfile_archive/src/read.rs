//! Parsing archive levels and looking up single files
//!

use binrw::BinRead;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read, Seek, SeekFrom};
use tracing::{debug, instrument, trace};

use crate::{
    archive::{Archive, DirId, File},
    error::{Error, FileNotFoundError, Result},
    path::ArchivePath,
    scope::Scope,
    types::{EntryRecord, FileKind, Header, Name},
};

/// Deepest directory nesting accepted inside one level
pub const MAX_DEPTH: usize = 256;

/// Smallest possible file record: an empty name plus size and position
const MIN_FILE_RECORD: u64 = 4 + EntryRecord::SIZE;

impl Archive {
    /// Parse the header and directory tree of a level occupying `len` bytes at the reader's position.
    ///
    /// Every file must lie inside the data region that follows the tree. The reader is left at the
    /// start of that data region.
    #[instrument(skip(reader), err)]
    pub fn parse<R: Read + Seek>(reader: R, len: u64) -> Result<Archive> {
        let mut scope = Scope::new(reader, len)?;
        let mut archive = Archive::new();
        archive.header = Header::read_checked(&mut scope)?;

        let root = archive.root();
        archive.dir_mut(root).name = Name::read_optional(&mut scope)?;
        read_directory(&mut scope, &mut archive, root, 0)?;

        let data_len = scope.remaining();
        let extent = archive.data_extent();
        if extent > data_len {
            return Err(Error::BoundsViolation {
                declared: extent,
                remaining: data_len,
            });
        }

        debug!(
            files = archive.len(),
            dirs = archive.dir_count(),
            metadata = scope.position(),
            "parsed archive level"
        );
        Ok(archive)
    }

    /// Parse a level held entirely in memory.
    pub fn from_bytes(data: &[u8]) -> Result<Archive> {
        Archive::parse(Cursor::new(data), data.len() as u64)
    }
}

fn read_directory<R: Read + Seek>(
    scope: &mut Scope<R>,
    archive: &mut Archive,
    dir: DirId,
    depth: usize,
) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(Error::DirectoryTooDeep(MAX_DEPTH));
    }

    let children = scope.read_u8()?;
    for _ in 0..children {
        let name = Name::read_optional(scope)?;
        let child = archive.add_directory(dir, name);
        read_directory(scope, archive, child, depth + 1)?;
    }

    let count = scope.read_u32::<LittleEndian>()?;
    scope.ensure(count as u64 * MIN_FILE_RECORD)?;
    for _ in 0..count {
        let name = Name::read_optional(scope)?;
        let record = EntryRecord::read(scope)?;
        archive.add_file(dir, File::new(name, record.size, record.position));
    }
    Ok(())
}

/// Where a located file lives
#[derive(Debug, Clone, PartialEq)]
pub struct Located {
    /// Absolute offset of the data from where the outermost archive starts
    pub offset: u64,
    /// Size of the data in bytes
    pub size: u32,
    /// Kind of the file
    pub kind: FileKind,
    /// Name of the file record that matched
    pub name: Option<Name>,
}

struct Hit {
    record: EntryRecord,
    name: Option<Name>,
    remaining: usize,
}

/// Find one file by path without building the directory trees.
///
/// Starting at the reader's current position, the directory of each level is scanned once. Names are
/// only compared inside directories that can still lead to the path, everything else is skimmed with
/// seeks. A segment naming an `.m4b` file crosses into that nested archive.
#[instrument(skip(reader), err)]
pub fn locate<R: Read + Seek>(mut reader: R, path: &ArchivePath) -> Result<Located> {
    let not_found = || Error::from(FileNotFoundError::Path(path.to_string()));
    if path.is_empty() {
        return Err(not_found());
    }

    let mut start = reader.stream_position()?;
    let mut len = reader.seek(SeekFrom::End(0))? - start;
    reader.seek(SeekFrom::Start(start))?;
    let mut rest = path.segments();

    loop {
        let mut scope = Scope::new(&mut reader, len)?;
        Header::read_checked(&mut scope)?;
        Name::skip_optional(&mut scope)?;

        let mut hit = None;
        scan_directory(&mut scope, Some(rest), &mut hit, 0)?;
        let metadata_len = scope.position();
        let data_len = scope.remaining();
        drop(scope);

        let Hit {
            record,
            name,
            remaining,
        } = hit.ok_or_else(not_found)?;

        let end = record.position as u64 + record.size as u64;
        if end > data_len {
            return Err(Error::BoundsViolation {
                declared: end,
                remaining: data_len,
            });
        }

        let offset = start + metadata_len + record.position as u64;
        rest = &rest[rest.len() - remaining..];
        if rest.is_empty() {
            let kind = name.as_ref().map_or(FileKind::None, Name::kind);
            return Ok(Located {
                offset,
                size: record.size,
                kind,
                name,
            });
        }

        trace!(offset, size = record.size, "entering nested archive");
        reader.seek(SeekFrom::Start(offset))?;
        start = offset;
        len = record.size as u64;
    }
}

/// Scan the body of one directory (its name has already been consumed).
///
/// `rest` holds the segments still to match, or `None` when this subtree cannot contain the path.
fn scan_directory<R: Read + Seek>(
    scope: &mut Scope<R>,
    rest: Option<&[String]>,
    hit: &mut Option<Hit>,
    depth: usize,
) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(Error::DirectoryTooDeep(MAX_DEPTH));
    }

    let children = scope.read_u8()?;
    for _ in 0..children {
        let child_rest = match rest.filter(|_| hit.is_none()) {
            Some(segments) => match Name::read_optional(scope)? {
                None => Some(segments),
                Some(name) if segments.len() > 1 && name.matches(&segments[0]) => {
                    Some(&segments[1..])
                }
                Some(_) => None,
            },
            None => {
                Name::skip_optional(scope)?;
                None
            }
        };
        scan_directory(scope, child_rest, hit, depth + 1)?;
    }

    let count = scope.read_u32::<LittleEndian>()?;
    scope.ensure(count as u64 * MIN_FILE_RECORD)?;
    for _ in 0..count {
        let Some(segments) = rest.filter(|_| hit.is_none()) else {
            Name::skip_optional(scope)?;
            scope.skip(EntryRecord::SIZE)?;
            continue;
        };

        let name = Name::read_optional(scope)?;
        let record = EntryRecord::read(scope)?;
        let matched = name.as_ref().map_or(true, |n| n.matches(&segments[0]));
        let crosses = segments.len() > 1
            && name
                .as_ref()
                .is_some_and(|n| n.kind() == FileKind::Archive && n.matches(&segments[0]));

        if (matched && segments.len() == 1) || crosses {
            *hit = Some(Hit {
                record,
                name,
                remaining: segments.len() - 1,
            });
        }
    }
    Ok(())
}
