//! Base types for structure of a bigfile.

use binrw::{BinRead, BinWrite};
use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};

use crate::compression::CompressionMethod;
use crate::error::{Error, Result};

/// Size in bytes of [`BigFileHeader`] on disk, magic included
pub const HEADER_SIZE: u64 = 12;
/// Size in bytes of [`CountInfo`] on disk
pub const COUNT_INFO_SIZE: u64 = 8;
/// Size in bytes of a [`FileRecord`] on disk
pub const FILE_RECORD_SIZE: u64 = 76;
/// Size in bytes of a [`FolderRecord`] on disk
pub const FOLDER_RECORD_SIZE: u64 = 64;
/// Size of the fixed name field in both record types
pub const NAME_LENGTH: usize = 60;
/// Offsets in file records are expressed in units of this many bytes
pub const OFFSET_ALIGNMENT: u64 = 8;
/// Offset of a file record that has no payload
pub const OFFSET_UNLINKED: i32 = -1;
/// Parent id of the root folder
pub const NO_PARENT: FolderId = 0xFFFF;
/// Id given to the root folder by [`crate::write::BigFileWriter`]
pub const ROOT_FOLDER_ID: FolderId = 0;
/// The only container version this library understands
pub const SUPPORTED_VERSION: u32 = 1;

/// Identifier of a folder, unique inside one container
pub type FolderId = u16;

/// Archive-wide unique identifier of a file
#[derive(
    BinRead,
    BinWrite,
    Display,
    From,
    Into,
    Serialize,
    Deserialize,
    Debug,
    Default,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
)]
#[brw(little)]
#[display("{_0:08X}")]
#[serde(transparent)]
pub struct FileKey(pub u32);

impl FileKey {
    /// Keys stored as header ints use `-1` for "no reference"
    pub fn from_header_int(value: i32) -> Option<FileKey> {
        (value != -1).then_some(FileKey(value as u32))
    }
}

/// Bigfile header
///
/// Always starts with `BIG\0`, followed by the container version and an opaque value that is kept as is.
#[derive(BinRead, BinWrite, Debug, Copy, Clone, PartialEq, Eq)]
#[brw(magic = b"BIG\0", little)]
pub struct BigFileHeader {
    /// Container version, see [`SUPPORTED_VERSION`]
    pub version: u32,

    /// Not interpreted, preserved when re-packing
    pub unknown: u32,
}

impl Default for BigFileHeader {
    fn default() -> Self {
        Self {
            version: SUPPORTED_VERSION,
            unknown: 0,
        }
    }
}

/// Number of records following the header
#[derive(BinRead, BinWrite, Debug, Default, Copy, Clone, PartialEq, Eq)]
#[brw(little)]
pub struct CountInfo {
    /// The number of file records
    pub files: u32,

    /// The number of folder records
    pub folders: u32,
}

/// Bigfile file record
#[derive(BinRead, BinWrite, Debug, Copy, Clone, PartialEq, Eq)]
#[brw(little)]
pub struct FileRecord {
    /// Unique key of the file
    pub key: FileKey,

    /// Offset of the payload frame from the start of the payload segment, in units of [`OFFSET_ALIGNMENT`]
    pub offset: i32,

    /// Size of the file body once decompressed
    pub size: u32,

    /// How the payload is stored
    pub compression: CompressionMethod,

    /// Archetype tag, see [`crate::archetype::Archetype`]
    pub file_type: u8,

    /// Id of the owning folder
    pub folder: FolderId,

    /// NUL padded file name
    pub name: [u8; NAME_LENGTH],
}

impl Default for FileRecord {
    fn default() -> Self {
        Self {
            key: FileKey::default(),
            offset: OFFSET_UNLINKED,
            size: 0,
            compression: CompressionMethod::None,
            file_type: 0,
            folder: ROOT_FOLDER_ID,
            name: [0; NAME_LENGTH],
        }
    }
}

impl FileRecord {
    /// Decoded file name
    pub fn name(&self) -> String {
        decode_name(&self.name)
    }
}

/// Bigfile folder record
#[derive(BinRead, BinWrite, Debug, Copy, Clone, PartialEq, Eq)]
#[brw(little)]
pub struct FolderRecord {
    /// Unique id of the folder
    pub id: FolderId,

    /// Id of the parent folder, [`NO_PARENT`] for the root
    pub parent: FolderId,

    /// NUL padded path segment
    pub name: [u8; NAME_LENGTH],
}

impl Default for FolderRecord {
    fn default() -> Self {
        Self {
            id: ROOT_FOLDER_ID,
            parent: NO_PARENT,
            name: [0; NAME_LENGTH],
        }
    }
}

impl FolderRecord {
    /// Decoded folder name
    pub fn name(&self) -> String {
        decode_name(&self.name)
    }

    /// Whether this is the root folder record
    pub fn is_root(&self) -> bool {
        self.parent == NO_PARENT
    }
}

/// Decode a fixed size name field, stopping at the first NUL
pub fn decode_name(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// Encode a name into a fixed size name field
pub fn encode_name(name: &str) -> Result<[u8; NAME_LENGTH]> {
    let bytes = name.as_bytes();
    if bytes.len() > NAME_LENGTH || bytes.contains(&0) {
        return Err(Error::NameTooLong(name.to_owned()));
    }

    let mut raw = [0u8; NAME_LENGTH];
    raw[..bytes.len()].copy_from_slice(bytes);
    Ok(raw)
}
