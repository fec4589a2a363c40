//! Record files found next to the cube tiles
//!
//! A record file is a plain sequence of `id, length, body` records. Every body starts with a version and is
//! read inside its own scope, so a corrupt length can never reach into the following record.

use bigfile_archive::scope::Scope;
use bigfile_archive::types::{read_prefixed, MAX_NAME_LEN};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read, Seek};
use tracing::trace;

use crate::error::{Error, Result};
use crate::swizzle::swizzle_in_place;
use crate::tile::TileAddress;

/// Smallest encoded string: its length prefix
const MIN_STRING: u64 = 4;

/// A layer of cube tiles
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Layer {
    pub name: String,
    /// Texture box the layer is drawn into
    pub texture_box: Option<String>,
    pub tags: Vec<String>,
    /// Tiles flagged for alternate handling
    pub cells: Vec<TileAddress>,
}

/// A named group of tags shared by layers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextureBox {
    pub name: String,
    pub tags: Vec<String>,
}

/// A resource that affects every layer or texture box it targets
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WaterResource {
    pub name: String,
    /// Tags or texture box names
    pub targets: Vec<String>,
}

/// How an offset provider positions its layer
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OffsetKind {
    /// Follows the pointer, with behavior flags
    Interactive { flags: u32 },
    /// Snapped to a grid
    Aligned { alignment: u32 },
}

/// Offset applied to a layer at runtime
#[derive(Debug, Clone, PartialEq)]
pub struct OffsetProvider {
    pub layer: String,
    pub x: i32,
    pub y: i32,
    pub kind: OffsetKind,
}

/// Opaque per-layer state values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateData {
    pub name: String,
    pub values: Vec<u32>,
}

/// Any record
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Layer(Layer),
    TextureBox(TextureBox),
    Water(WaterResource),
    Offset(OffsetProvider),
    State(StateData),
}

impl Record {
    pub const LAYER: [u8; 4] = *b"LAYR";
    pub const TEXTURE_BOX: [u8; 4] = *b"TBOX";
    pub const WATER: [u8; 4] = *b"WATR";
    pub const INTERACTIVE_OFFSET: [u8; 4] = *b"IOFS";
    pub const ALIGNED_OFFSET: [u8; 4] = *b"AOFS";
    pub const STATE: [u8; 4] = *b"STAT";

    /// Read every record of a record file.
    pub fn read_all(data: &[u8]) -> Result<Vec<Record>> {
        let mut cursor = Cursor::new(data);
        let mut file = Scope::new(&mut cursor, data.len() as u64)?;
        let mut records = Vec::new();

        while file.remaining() > 0 {
            let mut id = [0u8; 4];
            file.read_exact(&mut id)?;
            let len = file.read_u32::<LittleEndian>()?;

            let mut body = file.nested(len as u64)?;
            records.push(Record::read_body(id, &mut body)?);
            body.finish()?;
        }

        trace!(count = records.len(), "read records");
        Ok(records)
    }

    fn read_body<R: Read + Seek>(id: [u8; 4], body: &mut Scope<R>) -> Result<Record> {
        let record = match id {
            Record::LAYER => {
                check_version(body, "LAYR", 2)?;
                let name = read_string(body)?;
                let texture_box = Some(read_string(body)?).filter(|b| !b.is_empty());
                let tags = read_strings(body)?;
                let cells = read_strings(body)?
                    .iter()
                    .map(|cell| cell.parse())
                    .collect::<Result<Vec<TileAddress>>>()?;
                Record::Layer(Layer {
                    name,
                    texture_box,
                    tags,
                    cells,
                })
            }
            Record::TEXTURE_BOX => {
                check_version(body, "TBOX", 1)?;
                Record::TextureBox(TextureBox {
                    name: read_string(body)?,
                    tags: read_strings(body)?,
                })
            }
            Record::WATER => {
                check_version(body, "WATR", 1)?;
                Record::Water(WaterResource {
                    name: read_string(body)?,
                    targets: read_strings(body)?,
                })
            }
            Record::INTERACTIVE_OFFSET | Record::ALIGNED_OFFSET => {
                let interactive = id == Record::INTERACTIVE_OFFSET;
                check_version(body, if interactive { "IOFS" } else { "AOFS" }, 1)?;
                let layer = read_string(body)?;
                let x = body.read_i32::<LittleEndian>()?;
                let y = body.read_i32::<LittleEndian>()?;
                let value = body.read_u32::<LittleEndian>()?;
                Record::Offset(OffsetProvider {
                    layer,
                    x,
                    y,
                    kind: if interactive {
                        OffsetKind::Interactive { flags: value }
                    } else {
                        OffsetKind::Aligned { alignment: value }
                    },
                })
            }
            Record::STATE => {
                check_version(body, "STAT", 1)?;
                let name = read_string(body)?;
                let count = body.read_u32::<LittleEndian>()?;
                body.ensure(count as u64 * 4)?;
                let values = (0..count)
                    .map(|_| body.read_u32::<LittleEndian>())
                    .collect::<std::io::Result<Vec<_>>>()?;
                Record::State(StateData { name, values })
            }
            other => {
                let id = String::from_utf8_lossy(&other).into_owned();
                return Err(Error::UnknownRecord(id));
            }
        };
        Ok(record)
    }
}

fn check_version<R: Read + Seek>(
    body: &mut Scope<R>,
    record: &'static str,
    minimum: u32,
) -> Result<()> {
    let version = body.read_u32::<LittleEndian>()?;
    if version < minimum {
        return Err(Error::UnsupportedRecordVersion {
            record,
            version,
            minimum,
        });
    }
    Ok(())
}

/// Read a swizzled string, dropping its terminator.
pub fn read_string<R: Read + Seek>(body: &mut Scope<R>) -> Result<String> {
    let mut raw = read_prefixed(body, MAX_NAME_LEN)?;
    swizzle_in_place(&mut raw);
    if raw.last() == Some(&0) {
        raw.pop();
    }
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

fn read_strings<R: Read + Seek>(body: &mut Scope<R>) -> Result<Vec<String>> {
    let count = body.read_u32::<LittleEndian>()?;
    body.ensure(count as u64 * MIN_STRING)?;
    (0..count).map(|_| read_string(body)).collect()
}
