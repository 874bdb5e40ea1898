//! Reading and writing the metadata block at the start of a bigfile
//!

use std::io::{self, Read, Seek, SeekFrom, Write};

use binrw::{BinRead, BinWrite};
use tracing::{debug, instrument};

use crate::compression::padding_for;
use crate::error::{Error, Result};
use crate::types::{
    BigFileHeader, CountInfo, FileRecord, FolderRecord, COUNT_INFO_SIZE, FILE_RECORD_SIZE,
    FOLDER_RECORD_SIZE, HEADER_SIZE, SUPPORTED_VERSION,
};

/// Every record of a bigfile, in the order they are stored
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    /// The container header
    pub header: BigFileHeader,
    /// Record counts as read from the container
    pub counts: CountInfo,
    /// File records, in stored order
    pub files: Vec<FileRecord>,
    /// Folder records, in stored order
    pub folders: Vec<FolderRecord>,
}

/// Length in bytes of the metadata block described by `counts`, without the trailing padding
pub fn metadata_len(counts: &CountInfo) -> u64 {
    HEADER_SIZE
        + COUNT_INFO_SIZE
        + counts.files as u64 * FILE_RECORD_SIZE
        + counts.folders as u64 * FOLDER_RECORD_SIZE
}

/// Absolute offset where the payload segment starts
///
/// The header layout is identical for every supported version, so only the counts move the segment.
pub fn data_offset(_header: &BigFileHeader, counts: &CountInfo) -> u64 {
    let len = metadata_len(counts);
    len + padding_for(len)
}

fn malformed(err: binrw::Error) -> Error {
    match err {
        binrw::Error::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            Error::MalformedContainer("unexpected end of metadata".into())
        }
        binrw::Error::Io(e) => Error::IOFailure(e),
        binrw::Error::BadMagic { .. } => Error::MalformedContainer("bad magic".into()),
        other => Error::MalformedContainer(other.to_string()),
    }
}

/// Parse the header and count block, checking them against the length of the stream.
#[instrument(skip(reader), err)]
pub fn parse_header<R: Read + Seek>(reader: &mut R) -> Result<(BigFileHeader, CountInfo)> {
    let stream_len = reader.seek(SeekFrom::End(0))?;
    reader.seek(SeekFrom::Start(0))?;

    let header = BigFileHeader::read(reader).map_err(malformed)?;
    if header.version != SUPPORTED_VERSION {
        return Err(Error::MalformedContainer(format!(
            "unsupported version {}",
            header.version
        )));
    }

    let counts = CountInfo::read(reader).map_err(malformed)?;
    if counts.folders > u16::MAX as u32 {
        return Err(Error::MalformedContainer(format!(
            "{} folders do not fit in folder ids",
            counts.folders
        )));
    }

    let needed = metadata_len(&counts);
    if needed > stream_len {
        return Err(Error::MalformedContainer(format!(
            "{} files and {} folders need {needed} bytes of metadata, stream has {stream_len}",
            counts.files, counts.folders
        )));
    }

    debug!(files = counts.files, folders = counts.folders, "parsed header");
    Ok((header, counts))
}

/// Read the metadata block exactly as stored, for writing the side-car file of an unpacked bigfile.
#[instrument(skip(reader), err)]
pub fn read_raw_metadata_block<R: Read + Seek>(
    reader: &mut R,
    _header: &BigFileHeader,
    counts: &CountInfo,
) -> Result<Vec<u8>> {
    reader.seek(SeekFrom::Start(0))?;
    let mut raw = vec![0u8; metadata_len(counts) as usize];
    reader.read_exact(&mut raw)?;
    Ok(raw)
}

impl Metadata {
    /// Build metadata from records, deriving the counts
    pub fn new(header: BigFileHeader, files: Vec<FileRecord>, folders: Vec<FolderRecord>) -> Self {
        Self {
            header,
            counts: CountInfo {
                files: files.len() as u32,
                folders: folders.len() as u32,
            },
            files,
            folders,
        }
    }

    /// Read the header, counts and every record
    #[instrument(skip(reader), err)]
    pub fn read<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        let (header, counts) = parse_header(reader)?;

        let files = (0..counts.files)
            .map(|_| FileRecord::read(reader).map_err(malformed))
            .collect::<Result<Vec<_>>>()?;
        let folders = (0..counts.folders)
            .map(|_| FolderRecord::read(reader).map_err(malformed))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            header,
            counts,
            files,
            folders,
        })
    }

    /// Absolute offset where the payload segment starts
    pub fn data_offset(&self) -> u64 {
        data_offset(&self.header, &self.counts)
    }

    /// Write the metadata block followed by the padding up to the payload segment.
    ///
    /// Counts are taken from the record lists, not from [`Metadata::counts`].
    #[instrument(skip_all, err)]
    pub fn write<W: Write + Seek>(&self, writer: &mut W) -> Result<u64> {
        let counts = self.record_counts();

        self.header.write(writer)?;
        counts.write(writer)?;
        for record in &self.files {
            record.write(writer)?;
        }
        for record in &self.folders {
            record.write(writer)?;
        }

        let len = metadata_len(&counts);
        let padding = padding_for(len);
        writer.write_all(&vec![0u8; padding as usize])?;

        Ok(len + padding)
    }

    /// The metadata block without padding, as stored in the side-car file
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut cursor = io::Cursor::new(Vec::new());
        let written = self.write(&mut cursor)?;
        let mut bytes = cursor.into_inner();
        bytes.truncate((written - padding_for(metadata_len(&self.record_counts()))) as usize);
        Ok(bytes)
    }

    fn record_counts(&self) -> CountInfo {
        CountInfo {
            files: self.files.len() as u32,
            folders: self.folders.len() as u32,
        }
    }
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use pretty_assertions::assert_eq;

    use crate::compression::CompressionMethod;
    use crate::error::{Error, Result};
    use crate::metadata::{data_offset, parse_header, read_raw_metadata_block, Metadata};
    use crate::types::{
        encode_name, BigFileHeader, CountInfo, FileKey, FileRecord, FolderRecord, NO_PARENT,
    };

    fn sample() -> Result<Metadata> {
        Ok(Metadata::new(
            BigFileHeader {
                version: 1,
                unknown: 7,
            },
            vec![FileRecord {
                key: FileKey(0x10),
                offset: 0,
                size: 3,
                compression: CompressionMethod::None,
                folder: 0,
                name: encode_name("a.bin")?,
                ..Default::default()
            }],
            vec![FolderRecord {
                id: 0,
                parent: NO_PARENT,
                name: encode_name("")?,
            }],
        ))
    }

    #[test]
    fn data_offset_is_aligned() {
        let header = BigFileHeader::default();
        assert_eq!(data_offset(&header, &CountInfo::default()), 24);
        assert_eq!(
            data_offset(
                &header,
                &CountInfo {
                    files: 1,
                    folders: 1
                }
            ),
            160
        );
        assert_eq!(
            data_offset(
                &header,
                &CountInfo {
                    files: 2,
                    folders: 1
                }
            ),
            240
        );
    }

    #[test]
    fn write_then_read_metadata() -> Result<()> {
        let metadata = sample()?;

        let mut cursor = Cursor::new(Vec::new());
        let written = metadata.write(&mut cursor)?;
        assert_eq!(written, metadata.data_offset());
        assert_eq!(cursor.get_ref().len() as u64, written);

        cursor.set_position(0);
        assert_eq!(Metadata::read(&mut cursor)?, metadata);

        Ok(())
    }

    #[test]
    fn raw_block_excludes_padding() -> Result<()> {
        let metadata = sample()?;

        let mut cursor = Cursor::new(Vec::new());
        metadata.write(&mut cursor)?;

        let raw = read_raw_metadata_block(&mut cursor, &metadata.header, &metadata.counts)?;
        assert_eq!(raw.len(), 12 + 8 + 76 + 64);
        assert_eq!(raw, metadata.to_bytes()?);
        assert_eq!(&raw[..], &cursor.get_ref()[..raw.len()]);

        Ok(())
    }

    #[test]
    fn counts_larger_than_stream_are_malformed() {
        #[rustfmt::skip]
        let mut input = Cursor::new(vec![
            0x42, 0x49, 0x47, 0x00,
            0x01, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x02, 0x00, 0x00, 0x00,
            0x01, 0x00, 0x00, 0x00,
        ]);

        assert!(matches!(
            parse_header(&mut input),
            Err(Error::MalformedContainer(_))
        ));
    }

    #[test]
    fn unsupported_version_is_malformed() {
        #[rustfmt::skip]
        let mut input = Cursor::new(vec![
            0x42, 0x49, 0x47, 0x00,
            0x09, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
        ]);

        assert!(matches!(
            parse_header(&mut input),
            Err(Error::MalformedContainer(_))
        ));
    }

    #[test]
    fn bad_magic_is_malformed() {
        let mut input = Cursor::new(vec![0u8; 20]);
        assert!(matches!(
            Metadata::read(&mut input),
            Err(Error::MalformedContainer(_))
        ));
    }
}
