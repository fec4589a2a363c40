//! This library handles reading from and creating **BigFile** archives (`.m4b`).
//!
//! # BigFile Archive Format Documentation
//!
//! A BigFile is a nested, position-addressed container. It starts with a small header, followed by a
//! recursive directory tree describing every file of this level, followed immediately by a data region
//! holding the bytes of those files. A file may itself be a complete BigFile, to any depth.
//!
//! ## File Structure
//!
//! | Offset (bytes) | Field                  | Description                                                |
//! |----------------|------------------------|------------------------------------------------------------|
//! | 0x0000         | Signature length       | 4 bytes: Fixed value 0x0000000B (11)                       |
//! | 0x0004         | Signature              | 11 bytes: "UBI_BF_SIG" followed by a NUL                   |
//! | 0x000F         | Version                | 4 bytes: Fixed value 0x00000001                            |
//! | 0x0013         | Root directory         | Variable: see below                                        |
//! | ...            | Data region            | Variable: concatenated file data                           |
//!
//! ### Names
//!
//! Every name is stored as a 4 byte length followed by that many bytes. A length of zero means the entry
//! has no name at all. Most names carry a trailing NUL inside the declared length, but not all of them do,
//! so the terminator is tracked per name and written back exactly as it was read.
//!
//! ### Directory
//!
//! | Field                  | Description                                                          |
//! |------------------------|----------------------------------------------------------------------|
//! | Name                   | Variable: optional name                                              |
//! | Child count            | 1 byte: number of child directories                                  |
//! | Children               | Variable: that many directories, recursively                         |
//! | File count             | 4 bytes: number of file records                                      |
//! | Files                  | Variable: that many file records, binary files first                 |
//!
//! ### File record
//!
//! | Field                  | Description                                                          |
//! |------------------------|----------------------------------------------------------------------|
//! | Name                   | Variable: optional name                                              |
//! | Size                   | 4 bytes: size of the file data                                       |
//! | Position               | 4 bytes: offset of the data from the start of this level's data region |
//!
//! Several records may share one position. They alias the same bytes and must keep sharing one position
//! when an archive is rewritten.
//!
//! ## Additional Information
//!
//! - **File Extension**: `.m4b`
//! - **Endianness**: Little-endian for all multi-byte integers
//! - **File kinds**: derived from the extension; `.bin` records, `.m4b` nested archives, `.jpg` images
//!

pub mod archive;
pub mod error;
pub mod path;
pub mod read;
pub mod scope;
pub mod types;
pub mod write;

pub use archive::{Archive, DirId, Directory, File, FileId, PositionGroup};
pub use path::ArchivePath;
pub use read::{locate, Located};
pub use types::{FileKind, Header, Name};
pub use write::BigFileWriter;
