//! This library handles reading, unpacking and packing **BigFile** containers used by games built on the
//! *Yeti* engine.
//!
//! # BigFile Format Documentation
//!
//! A bigfile stores every asset of a game inside a single file, usually named with the `.big` extension. Assets
//! are grouped in folders and addressed by a 32-bit key that is unique across the whole container.
//!
//! ## File Structure
//!
//! A bigfile consists of a header, record counts, the file records, the folder records and, after padding to an
//! 8-byte boundary, the payload segment.
//!
//! | Offset (bytes) | Field                  | Description                                                |
//! |----------------|------------------------|------------------------------------------------------------|
//! | 0x0000         | Magic number           | 4 bytes: "BIG\0"                                           |
//! | 0x0004         | Version                | 4 bytes: Fixed value 0x00000001                            |
//! | 0x0008         | Unknown                | 4 bytes: Preserved verbatim                                |
//! | 0x000C         | File Count             | 4 bytes: Number of file records                            |
//! | 0x0010         | Folder Count           | 4 bytes: Number of folder records                          |
//! | 0x0014         | File Records           | 76 bytes per file                                          |
//! | ...            | Folder Records         | 64 bytes per folder                                        |
//! | ...            | Padding                | Zeros up to the next multiple of 8                         |
//!
//! ### File Record
//!
//! | Offset (bytes) | Field                  | Description                                             |
//! |----------------|------------------------|---------------------------------------------------------|
//! | 0x0000         | Key                    | 4 bytes: Unique key of the file                         |
//! | 0x0004         | Offset                 | 4 bytes: Signed, in units of 8 bytes, `-1` when absent  |
//! | 0x0008         | Size                   | 4 bytes: Size of the body when uncompressed             |
//! | 0x000C         | Compression            | 1 byte: `0` none, `1` zlib                              |
//! | 0x000D         | File Type              | 1 byte: Archetype tag                                   |
//! | 0x000E         | Folder                 | 2 bytes: Id of the owning folder                        |
//! | 0x0010         | Name                   | 60 bytes: NUL padded                                    |
//!
//! ### Folder Record
//!
//! | Offset (bytes) | Field                  | Description                                             |
//! |----------------|------------------------|---------------------------------------------------------|
//! | 0x0000         | Id                     | 2 bytes: Unique id of the folder                        |
//! | 0x0002         | Parent                 | 2 bytes: Id of the parent, `0xFFFF` for the root        |
//! | 0x0004         | Name                   | 60 bytes: NUL padded path segment                       |
//!
//! The first folder record is the root. Every other folder references a parent that was declared before it.
//!
//! ### Payload Segment
//!
//! Each file with an offset has a frame at `data offset + offset * 8`:
//!
//! - **Uncompressed**: a 4-byte length followed by the body.
//! - **Compressed**: a 4-byte stored length, a 4-byte uncompressed length, a 2-byte zlib header and the deflate
//!   stream. The stored length counts everything after the two length fields.
//!
//! Frames are padded with zeros to an 8-byte boundary.
//!
//! The body of a file starts with a signed 4-byte count and that many signed 4-byte header ints, the keys of the
//! files it references (`-1` for none), followed by the payload proper.
//!
//! ## Unpacked Directories
//!
//! [`Unpacker`] writes a bigfile out as a directory holding `yeti.gex` (the metadata block as stored),
//! `chunks/` (one loose file per entry, mirroring the folder tree) and `renamed_mapping.json` (the path every key
//! was written to). [`Packer`] turns such a directory back into a container.
//!
//! ## Additional Information
//!
//! - **File Extension**: `.big`
//! - **Endianness**: Little-endian for all multi-byte integers
//! - **Compression Methods**:
//!   - `0`: None (no compression)
//!   - `1`: Zlib (compressed with Zlib)
//!

pub mod archetype;
pub mod archive;
pub mod buffers;
pub mod compression;
pub mod diagnostics;
pub mod error;
pub mod loader;
pub mod mapping;
pub mod metadata;
pub mod options;
pub mod pack;
pub mod payload;
pub mod reader;
pub mod tree;
pub mod types;
pub mod unpack;
pub mod workers;
pub mod write;

pub use archetype::{Archetype, ArchetypeView};
pub use archive::{Backing, BigFile};
pub use compression::CompressionMethod;
pub use error::{Error, FileNotFoundError};
pub use options::{BigFileConfig, CancelToken, PackOptions, UnpackOptions};
pub use pack::Packer;
pub use reader::{FileReader, ReadFlags};
pub use types::{FileKey, FolderId, ROOT_FOLDER_ID};
pub use unpack::Unpacker;
pub use write::BigFileWriter;
