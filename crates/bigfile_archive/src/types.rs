//! Base types for structure of BigFile archives.

use binrw::{BinRead, BinWrite};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use derive_more::derive::Display;
use std::{
    borrow::Cow,
    fmt,
    io::{Read, Seek, Write},
};

use crate::error::{Error, Result};
use crate::scope::Scope;

/// The only archive version understood by this library
pub const VERSION: u32 = 1;

/// Longest name accepted while parsing
pub const MAX_NAME_LEN: u32 = 1024;

/// BigFile header
///
/// The signature is a length-prefixed string ("UBI_BF_SIG" plus its NUL), followed by the version.
/// All data is stored in little endian format
#[derive(BinRead, BinWrite, Debug, Copy, Clone, PartialEq)]
#[brw(magic = b"\x0B\x00\x00\x00UBI_BF_SIG\x00", little)]
pub struct Header {
    /// Format version, always [`VERSION`]
    pub version: u32,
}

impl Default for Header {
    fn default() -> Self {
        Self { version: VERSION }
    }
}

impl Header {
    /// Encoded size of the header
    pub const SIZE: u64 = 19;

    /// Read a header, rejecting unknown signatures and versions.
    pub fn read_checked<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        let header = match Header::read(reader) {
            Ok(header) => header,
            Err(binrw::Error::BadMagic { .. }) => return Err(Error::InvalidSignature),
            Err(e) => return Err(e.into()),
        };

        if header.version != VERSION {
            return Err(Error::UnsupportedVersion(header.version));
        }
        Ok(header)
    }
}

/// The fixed part of a file record, following its name
#[derive(BinRead, BinWrite, Debug, Default, Copy, Clone, PartialEq)]
#[brw(little)]
pub struct EntryRecord {
    /// Size of the file data
    pub size: u32,

    /// Offset of the file data from the start of the owning level's data region
    pub position: u32,
}

impl EntryRecord {
    /// Encoded size of the record
    pub const SIZE: u64 = 8;
}

/// The kind of a file, derived from its extension
#[derive(Debug, Display, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FileKind {
    /// Anything this library does not care about
    #[default]
    #[display("none")]
    None,

    /// A `.bin` record file
    #[display("binary")]
    Binary,

    /// A nested `.m4b` archive
    #[display("archive")]
    Archive,

    /// A `.jpg` image with no special handling
    #[display("image")]
    ImageStandard,

    /// A `.jpg` image flagged by the classification pass
    #[display("image*")]
    ImageSpecial,
}

impl FileKind {
    /// Derive the kind of a file from its name, ignoring case.
    ///
    /// Names alone never yield [`FileKind::ImageSpecial`]: every JPEG starts out standard and is only
    /// promoted once the layer records of its archive flag it.
    pub fn from_name(name: &str) -> Self {
        let Some((_, extension)) = name.rsplit_once('.') else {
            return FileKind::None;
        };

        match extension.to_ascii_lowercase().as_str() {
            "bin" => FileKind::Binary,
            "m4b" => FileKind::Archive,
            "jpg" | "jpeg" => FileKind::ImageStandard,
            _ => FileKind::None,
        }
    }

    /// Whether this kind is one of the image kinds
    pub fn is_image(self) -> bool {
        matches!(self, FileKind::ImageStandard | FileKind::ImageSpecial)
    }
}

/// A length-prefixed name
///
/// The raw bytes are kept as they were read. Whether the stored form ended with a NUL is tracked so the
/// name is written back byte for byte.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Name {
    raw: Box<[u8]>,
    terminated: bool,
}

impl Name {
    /// A NUL-terminated name
    pub fn new(text: impl AsRef<str>) -> Self {
        Self {
            raw: text.as_ref().as_bytes().into(),
            terminated: true,
        }
    }

    /// A name stored without its NUL
    pub fn unterminated(text: impl AsRef<str>) -> Self {
        Self {
            raw: text.as_ref().as_bytes().into(),
            terminated: false,
        }
    }

    /// Build a name from the bytes stored in the archive, detecting the terminator.
    pub fn from_stored(mut stored: Vec<u8>) -> Self {
        let terminated = stored.last() == Some(&0);
        if terminated {
            stored.pop();
        }
        Self {
            raw: stored.into(),
            terminated,
        }
    }

    /// Get the name without its terminator, in the raw byte representation.
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Get the name as text. Invalid UTF-8 is replaced.
    pub fn to_str_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.raw)
    }

    /// Whether the stored form carries a trailing NUL
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Number of bytes following the length prefix
    pub fn stored_len(&self) -> u32 {
        self.raw.len() as u32 + u32::from(self.terminated)
    }

    /// Compare against a path segment, ignoring ASCII case.
    pub fn matches(&self, segment: &str) -> bool {
        self.raw.eq_ignore_ascii_case(segment.as_bytes())
    }

    /// The kind a file with this name has
    pub fn kind(&self) -> FileKind {
        FileKind::from_name(&self.to_str_lossy())
    }

    /// Read an optional name. A length of zero means there is no name.
    pub fn read_optional<R: Read + Seek>(scope: &mut Scope<R>) -> Result<Option<Name>> {
        let stored = read_prefixed(scope, MAX_NAME_LEN)?;
        if stored.is_empty() {
            return Ok(None);
        }
        Ok(Some(Name::from_stored(stored)))
    }

    /// Skip over an optional name without allocating it, returning whether one was present.
    pub fn skip_optional<R: Read + Seek>(scope: &mut Scope<R>) -> Result<bool> {
        let len = scope.read_u32::<LittleEndian>()?;
        if len > MAX_NAME_LEN {
            return Err(Error::NameTooLong(len));
        }
        scope.skip(len as u64)?;
        Ok(len > 0)
    }

    /// Write an optional name.
    pub fn write_optional<W: Write>(name: Option<&Name>, writer: &mut W) -> Result<()> {
        match name {
            Some(name) => {
                writer.write_u32::<LittleEndian>(name.stored_len())?;
                writer.write_all(&name.raw)?;
                if name.terminated {
                    writer.write_u8(0)?;
                }
            }
            None => writer.write_u32::<LittleEndian>(0)?,
        }
        Ok(())
    }

    /// Encoded size of an optional name, including its length prefix
    pub fn encoded_len(name: Option<&Name>) -> u64 {
        4 + name.map_or(0, |n| n.stored_len() as u64)
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.to_str_lossy())
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_str_lossy())
    }
}

/// Read a 32-bit length followed by that many bytes, as stored.
///
/// The length is checked against `max` and against the bytes left in the enclosing region before
/// anything is allocated.
pub fn read_prefixed<R: Read + Seek>(scope: &mut Scope<R>, max: u32) -> Result<Vec<u8>> {
    let len = scope.read_u32::<LittleEndian>()?;
    if len > max {
        return Err(Error::NameTooLong(len));
    }
    scope.ensure(len as u64)?;

    let mut stored = vec![0u8; len as usize];
    scope.read_exact(&mut stored)?;
    Ok(stored)
}
