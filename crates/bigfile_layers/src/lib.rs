//! This library reads the layer records of **BigFile** archives and decides which cube tiles are flagged
//! for alternate handling.
//!
//! # Record Format Documentation
//!
//! Record files are `.bin` files below the top level `cube` and `water` directories of an archive level.
//! Each one is a sequence of records read until the end of the file:
//!
//! | Field                  | Description                                                          |
//! |------------------------|----------------------------------------------------------------------|
//! | Id                     | 4 bytes: FourCC naming the record                                    |
//! | Length                 | 4 bytes: size of the body                                            |
//! | Body                   | Variable: a 4 byte version followed by the record fields             |
//!
//! | FourCC | Minimum version | Fields after the version                                             |
//! |--------|-----------------|----------------------------------------------------------------------|
//! | `LAYR` | 2               | name, texture box, tags, tile addresses                              |
//! | `TBOX` | 1               | name, tags                                                           |
//! | `WATR` | 1               | name, targets (tags or texture box names)                            |
//! | `IOFS` | 1               | layer name, x, y, flags                                              |
//! | `AOFS` | 1               | layer name, x, y, alignment                                          |
//! | `STAT` | 1               | name, values                                                         |
//!
//! Strings are a 4 byte length followed by that many swizzled bytes, the last being a NUL. Lists are a 4
//! byte count followed by their items. Tile addresses are strings shaped like `front_03_12`.
//!

pub mod classify;
pub mod error;
pub mod records;
pub mod swizzle;
pub mod tile;

pub use classify::{Classification, LayerId, TileMask};
pub use records::Record;
pub use tile::{Face, TileAddress};
