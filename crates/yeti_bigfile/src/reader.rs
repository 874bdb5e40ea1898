//! Reading file bodies out of a packed container or an unpacked directory
//!

use std::fmt::{self, Debug};
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::vec;

use byteorder::{LittleEndian, ReadBytesExt};
use tracing::{debug, instrument, trace};

use crate::buffers::BufferPool;
use crate::compression::{CompressionMethod, Inflater};
use crate::error::{Error, FileNotFoundError, Result};
use crate::mapping::{relative_path, RenamedFileMapping};
use crate::payload::{read_header_from, split_header};
use crate::tree::{sort_by_offset, FileEntry};
use crate::types::{FileKey, OFFSET_ALIGNMENT};

/// Options applied to a single read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadFlags {
    /// Inflate compressed payloads. When unset, compressed files are returned in their stored form with an
    /// empty header.
    pub decompress: bool,
}

impl Default for ReadFlags {
    fn default() -> Self {
        Self { decompress: true }
    }
}

/// A file body read into a [`BufferPool`]
pub struct FileRead<'p> {
    /// Key of the file that was read
    pub key: FileKey,
    /// Header ints of the body, empty for stored reads
    pub header: Vec<i32>,
    body: &'p [u8],
    header_len: usize,
}

impl Debug for FileRead<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "FileRead({} header={:?} size={})",
            self.key,
            self.header,
            self.body.len()
        )
    }
}

impl<'p> FileRead<'p> {
    fn new(key: FileKey, body: &'p [u8]) -> Result<Self> {
        let (header, header_len) = split_header(key, body)?;
        Ok(Self {
            key,
            header,
            body,
            header_len,
        })
    }

    fn stored(key: FileKey, body: &'p [u8]) -> Self {
        Self {
            key,
            header: Vec::new(),
            body,
            header_len: 0,
        }
    }

    /// Every byte that was read, header ints included
    pub fn body(&self) -> &'p [u8] {
        self.body
    }

    /// Bytes following the header ints
    pub fn payload(&self) -> &'p [u8] {
        &self.body[self.header_len..]
    }

    /// Number of bytes that were read
    pub fn size(&self) -> usize {
        self.body.len()
    }
}

/// Source of file bodies for a loaded bigfile
///
/// Every worker owns its own reader, readers are never shared between threads.
pub trait FileReader: Send {
    /// Read the whole body of `entry` into a buffer of `pool`
    fn read_file<'p>(
        &mut self,
        entry: &FileEntry,
        pool: &'p mut BufferPool,
        flags: ReadFlags,
    ) -> Result<FileRead<'p>>;

    /// Read only the header ints of `entry`
    fn read_header(&mut self, entry: &FileEntry, flags: ReadFlags) -> Result<Vec<i32>>;

    /// Flags used when the caller has no preference
    fn default_flags(&self) -> ReadFlags {
        ReadFlags::default()
    }
}

/// Fill `buf` from `reader`, telling a short payload apart from a corrupt one
fn read_fully<R: Read>(key: FileKey, reader: &mut R, buf: &mut [u8], inflating: bool) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(Error::TruncatedRead {
                    key,
                    expected: buf.len(),
                    actual: filled,
                })
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(classify(key, e, inflating, buf.len(), filled)),
        }
    }
    Ok(())
}

fn classify(key: FileKey, err: io::Error, inflating: bool, expected: usize, actual: usize) -> Error {
    match err.kind() {
        io::ErrorKind::UnexpectedEof => Error::TruncatedRead {
            key,
            expected,
            actual,
        },
        io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput if inflating => {
            Error::DecompressionError { key, source: err }
        }
        _ => Error::IOFailure(err),
    }
}

/// Map stream failures of a header-only read onto the read errors
fn header_error(key: FileKey, err: Error, inflating: bool, expected: usize) -> Error {
    match err {
        Error::IOFailure(e) => classify(key, e, inflating, expected, 0),
        other => other,
    }
}

/// Reads file bodies from the payload segment of a packed bigfile
pub struct PackedReader<R: Read + Seek> {
    reader: R,
    data_offset: u64,
    stream_len: u64,
}

impl<R: Read + Seek> Debug for PackedReader<R> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "PackedReader(data_offset={})", self.data_offset)
    }
}

impl PackedReader<BufReader<File>> {
    /// Open the container at `path` for reading
    pub fn open(path: impl AsRef<Path>, data_offset: u64) -> Result<Self> {
        PackedReader::new(BufReader::new(File::open(path)?), data_offset)
    }
}

impl<R: Read + Seek> PackedReader<R> {
    /// Wrap a stream holding a whole container whose payload segment starts at `data_offset`
    pub fn new(mut reader: R, data_offset: u64) -> Result<Self> {
        let stream_len = reader.seek(SeekFrom::End(0))?;
        Ok(Self {
            reader,
            data_offset,
            stream_len,
        })
    }

    /// Unwrap and return the inner reader object
    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Seek to the frame of `entry` and read its length words.
    ///
    /// Returns the number of stored bytes and the uncompressed body length.
    fn seek_frame(&mut self, entry: &FileEntry) -> Result<(usize, usize)> {
        if entry.is_unlinked() {
            return Err(FileNotFoundError::Unlinked(entry.key()).into());
        }

        let start = self.data_offset + entry.offset() as u64 * OFFSET_ALIGNMENT;
        self.reader.seek(SeekFrom::Start(start))?;

        let words = match entry.compression() {
            CompressionMethod::None => 4,
            CompressionMethod::Zlib => 8,
        };
        let available = self.stream_len.saturating_sub(start + words) as usize;
        if self.stream_len < start + words {
            return Err(Error::TruncatedRead {
                key: entry.key(),
                expected: words as usize,
                actual: self.stream_len.saturating_sub(start) as usize,
            });
        }

        let stored = self.reader.read_u32::<LittleEndian>()? as usize;
        let uncompressed = match entry.compression() {
            CompressionMethod::None => stored,
            CompressionMethod::Zlib => self.reader.read_u32::<LittleEndian>()? as usize,
        };

        if stored > available {
            return Err(Error::TruncatedRead {
                key: entry.key(),
                expected: stored,
                actual: available,
            });
        }
        if uncompressed != entry.size() as usize {
            debug!(
                key = %entry.key(),
                record = entry.size(),
                frame = uncompressed,
                "frame size differs from record"
            );
        }

        trace!(start, stored, uncompressed, "frame");
        Ok((stored, uncompressed))
    }
}

impl<R: Read + Seek + Send> FileReader for PackedReader<R> {
    #[instrument(skip(self, entry, pool), fields(key = %entry.key()))]
    fn read_file<'p>(
        &mut self,
        entry: &FileEntry,
        pool: &'p mut BufferPool,
        flags: ReadFlags,
    ) -> Result<FileRead<'p>> {
        let key = entry.key();
        let (stored, uncompressed) = self.seek_frame(entry)?;

        if !entry.compression().is_compressed() || !flags.decompress {
            let buf = pool.buffer(stored);
            read_fully(key, &mut self.reader, buf, false)?;
            return if entry.compression().is_compressed() {
                Ok(FileRead::stored(key, buf))
            } else {
                FileRead::new(key, buf)
            };
        }

        let buf = pool.buffer(uncompressed);
        let mut payload = Inflater::new(&mut self.reader, stored as u64)
            .map_err(|e| classify(key, e, true, uncompressed, 0))?;
        read_fully(key, &mut payload, buf, true)?;
        FileRead::new(key, buf)
    }

    #[instrument(skip(self, entry), fields(key = %entry.key()), err)]
    fn read_header(&mut self, entry: &FileEntry, flags: ReadFlags) -> Result<Vec<i32>> {
        let key = entry.key();
        let (stored, uncompressed) = self.seek_frame(entry)?;

        match entry.compression() {
            CompressionMethod::Zlib if !flags.decompress => Ok(Vec::new()),
            CompressionMethod::Zlib => {
                let mut payload = Inflater::new(&mut self.reader, stored as u64)
                    .map_err(|e| classify(key, e, true, uncompressed, 0))?;
                read_header_from(key, &mut payload, uncompressed)
                    .map_err(|e| header_error(key, e, true, uncompressed))
            }
            CompressionMethod::None => {
                let mut body = self.reader.by_ref().take(stored as u64);
                read_header_from(key, &mut body, stored)
                    .map_err(|e| header_error(key, e, false, stored))
            }
        }
    }
}

/// Reads file bodies from the loose files of an unpacked bigfile
#[derive(Debug, Clone)]
pub struct UnpackedReader {
    chunks_dir: PathBuf,
    mapping: Arc<RenamedFileMapping>,
}

impl UnpackedReader {
    /// Read loose files below `chunks_dir`, located through `mapping`
    pub fn new(chunks_dir: impl Into<PathBuf>, mapping: Arc<RenamedFileMapping>) -> Self {
        Self {
            chunks_dir: chunks_dir.into(),
            mapping,
        }
    }

    /// Path of the loose file of `entry` and whether it holds a stored zlib stream
    fn locate(&self, entry: &FileEntry) -> Result<(PathBuf, bool)> {
        let mapped = self
            .mapping
            .get(entry.key())
            .ok_or(FileNotFoundError::Unmapped(entry.key()))?;
        let relative = relative_path(&mapped.file_name)?;
        Ok((self.chunks_dir.join(relative), mapped.compressed))
    }

    fn open(&self, entry: &FileEntry) -> Result<(BufReader<File>, u64, bool)> {
        let (path, compressed) = self.locate(entry)?;
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(FileNotFoundError::Missing(entry.key()).into())
            }
            Err(e) => return Err(e.into()),
        };
        let len = file.metadata()?.len();
        trace!(path = %path.display(), len, compressed, "loose file");
        Ok((BufReader::new(file), len, compressed))
    }
}

impl FileReader for UnpackedReader {
    #[instrument(skip(self, entry, pool), fields(key = %entry.key()))]
    fn read_file<'p>(
        &mut self,
        entry: &FileEntry,
        pool: &'p mut BufferPool,
        flags: ReadFlags,
    ) -> Result<FileRead<'p>> {
        let key = entry.key();
        let (mut file, len, compressed) = self.open(entry)?;

        if !compressed || !flags.decompress {
            let buf = pool.buffer(len as usize);
            read_fully(key, &mut file, buf, false)?;
            return if compressed {
                Ok(FileRead::stored(key, buf))
            } else {
                FileRead::new(key, buf)
            };
        }

        let size = entry.size() as usize;
        let buf = pool.buffer(size);
        let mut payload = Inflater::new(&mut file, len)
            .map_err(|e| classify(key, e, true, size, 0))?;
        read_fully(key, &mut payload, buf, true)?;
        FileRead::new(key, buf)
    }

    #[instrument(skip(self, entry), fields(key = %entry.key()), err)]
    fn read_header(&mut self, entry: &FileEntry, flags: ReadFlags) -> Result<Vec<i32>> {
        let key = entry.key();
        let (mut file, len, compressed) = self.open(entry)?;

        match (compressed, flags.decompress) {
            (true, false) => Ok(Vec::new()),
            (true, true) => {
                let size = entry.size() as usize;
                let mut payload = Inflater::new(&mut file, len)
                    .map_err(|e| classify(key, e, true, size, 0))?;
                read_header_from(key, &mut payload, size)
                    .map_err(|e| header_error(key, e, true, size))
            }
            (false, _) => read_header_from(key, &mut file, len as usize)
                .map_err(|e| header_error(key, e, false, len as usize)),
        }
    }
}

/// Sequential reads of many files in payload order
///
/// Every read borrows the shared [`BufferPool`], so the previous [`FileRead`] must be dropped before asking for
/// the next one. Entries without a payload yield [`FileNotFoundError::Unlinked`] without touching the reader.
pub struct BatchRead<'a> {
    reader: &'a mut dyn FileReader,
    pool: &'a mut BufferPool,
    entries: vec::IntoIter<Arc<FileEntry>>,
    flags: ReadFlags,
}

impl<'a> BatchRead<'a> {
    /// Prepare a batch over `entries`, sorted by offset
    pub fn new(
        reader: &'a mut dyn FileReader,
        pool: &'a mut BufferPool,
        entries: &[Arc<FileEntry>],
        flags: ReadFlags,
    ) -> Self {
        let mut entries = entries.to_vec();
        sort_by_offset(&mut entries);
        Self {
            reader,
            pool,
            entries: entries.into_iter(),
            flags,
        }
    }

    /// Number of entries left
    pub fn remaining(&self) -> usize {
        self.entries.len()
    }

    /// Read the next entry
    pub fn next_file(&mut self) -> Option<(Arc<FileEntry>, Result<FileRead<'_>>)> {
        let entry = self.entries.next()?;
        if entry.is_unlinked() {
            let err = FileNotFoundError::Unlinked(entry.key()).into();
            return Some((entry, Err(err)));
        }
        let read = self.reader.read_file(&entry, self.pool, self.flags);
        Some((entry, read))
    }
}

/// Header-only reads of many files, in the same order as [`BatchRead`]
pub fn read_all_headers<'a>(
    reader: &'a mut dyn FileReader,
    entries: &[Arc<FileEntry>],
    flags: ReadFlags,
) -> impl Iterator<Item = (Arc<FileEntry>, Result<Vec<i32>>)> + 'a {
    let mut entries = entries.to_vec();
    sort_by_offset(&mut entries);
    entries.into_iter().map(move |entry| {
        let header = if entry.is_unlinked() {
            Err(FileNotFoundError::Unlinked(entry.key()).into())
        } else {
            reader.read_header(&entry, flags)
        };
        (entry, header)
    })
}

#[cfg(test)]
mod test {
    use std::io::Cursor;
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use crate::buffers::BufferPool;
    use crate::compression::{encode_stored, write_frame, CompressionMethod};
    use crate::error::{Error, FileNotFoundError, Result};
    use crate::mapping::{RenamedFile, RenamedFileMapping};
    use crate::metadata::Metadata;
    use crate::payload::encode_body;
    use crate::reader::{
        read_all_headers, BatchRead, FileReader, PackedReader, ReadFlags, UnpackedReader,
    };
    use crate::tree::{build, FileMappingData};
    use crate::types::{encode_name, BigFileHeader, FileKey, FileRecord, FolderRecord};

    /// Two files with a reference each and one unlinked entry, payload segment only
    fn sample(compression: CompressionMethod) -> Result<(FileMappingData, Vec<u8>)> {
        let first = encode_body(&[0x02], b"Hello World");
        let second = encode_body(&[-1], b"World Hello");

        let mut segment = Vec::new();
        let mut offsets = Vec::new();
        for body in [&first, &second] {
            offsets.push((segment.len() / 8) as i32);
            let stored = encode_stored(body, compression)?;
            write_frame(&mut segment, &stored, body.len() as u32, compression)?;
        }

        let record = |key: u32, offset: i32, size: usize, name: &str| -> Result<FileRecord> {
            Ok(FileRecord {
                key: FileKey(key),
                offset,
                size: size as u32,
                compression,
                name: encode_name(name)?,
                ..Default::default()
            })
        };

        let metadata = Metadata::new(
            BigFileHeader::default(),
            vec![
                record(0x03, -1, 0, "gone.bin")?,
                record(0x02, offsets[1], second.len(), "world.bin")?,
                record(0x01, offsets[0], first.len(), "hello.bin")?,
            ],
            vec![FolderRecord::default()],
        );
        let (_, mapping) = build(&metadata)?;
        Ok((mapping, segment))
    }

    #[test]
    fn read_uncompressed_file() -> Result<()> {
        let (mapping, segment) = sample(CompressionMethod::None)?;
        let mut reader = PackedReader::new(Cursor::new(segment), 0)?;
        let mut pool = BufferPool::new();

        let entry = mapping.get(FileKey(0x01)).cloned().ok_or(Error::NotLoaded)?;
        let read = reader.read_file(&entry, &mut pool, ReadFlags::default())?;
        assert_eq!(read.header, vec![0x02]);
        assert_eq!(read.payload(), b"Hello World");
        assert_eq!(read.size(), 19);

        Ok(())
    }

    #[test]
    fn read_compressed_file() -> Result<()> {
        let (mapping, segment) = sample(CompressionMethod::Zlib)?;
        let mut reader = PackedReader::new(Cursor::new(segment), 0)?;
        let mut pool = BufferPool::new();

        let entry = mapping.get(FileKey(0x02)).cloned().ok_or(Error::NotLoaded)?;
        let read = reader.read_file(&entry, &mut pool, ReadFlags::default())?;
        assert_eq!(read.header, vec![-1]);
        assert_eq!(read.payload(), b"World Hello");

        let stored = reader.read_file(&entry, &mut pool, ReadFlags { decompress: false })?;
        assert!(stored.header.is_empty());
        assert_eq!(&stored.body()[..2], &[0x78, 0x9C]);

        assert_eq!(reader.read_header(&entry, ReadFlags::default())?, vec![-1]);

        Ok(())
    }

    #[test]
    fn unlinked_file_is_not_found() -> Result<()> {
        let (mapping, segment) = sample(CompressionMethod::None)?;
        let mut reader = PackedReader::new(Cursor::new(segment), 0)?;

        let entry = mapping.get(FileKey(0x03)).cloned().ok_or(Error::NotLoaded)?;
        assert!(matches!(
            reader.read_header(&entry, ReadFlags::default()),
            Err(Error::FileNotFound(FileNotFoundError::Unlinked(FileKey(0x03))))
        ));

        Ok(())
    }

    #[test]
    fn truncated_segment() -> Result<()> {
        let (mapping, mut segment) = sample(CompressionMethod::None)?;
        segment.truncate(segment.len() - 10);
        let mut reader = PackedReader::new(Cursor::new(segment), 0)?;
        let mut pool = BufferPool::new();

        let entry = mapping.get(FileKey(0x02)).cloned().ok_or(Error::NotLoaded)?;
        let err = reader
            .read_file(&entry, &mut pool, ReadFlags::default())
            .map(|_| ())
            .unwrap_err();
        assert!(matches!(err, Error::TruncatedRead { expected: 19, .. }));
        assert!(err.is_recoverable());

        Ok(())
    }

    #[test]
    fn corrupt_deflate_stream() -> Result<()> {
        let (mapping, mut segment) = sample(CompressionMethod::Zlib)?;
        // first deflate byte after both length words and the stub
        segment[10] = 0xFF;
        segment[11] = 0xFF;
        let mut reader = PackedReader::new(Cursor::new(segment), 0)?;
        let mut pool = BufferPool::new();

        let entry = mapping.get(FileKey(0x01)).cloned().ok_or(Error::NotLoaded)?;
        let err = reader
            .read_file(&entry, &mut pool, ReadFlags::default())
            .map(|_| ())
            .unwrap_err();
        assert!(err.is_recoverable());

        Ok(())
    }

    #[test]
    fn batch_reads_in_offset_order() -> Result<()> {
        let (mapping, segment) = sample(CompressionMethod::Zlib)?;
        let mut reader = PackedReader::new(Cursor::new(segment), 0)?;
        let mut pool = BufferPool::new();

        let entries: Vec<_> = mapping.entries().cloned().collect();
        let mut batch = BatchRead::new(&mut reader, &mut pool, &entries, ReadFlags::default());
        assert_eq!(batch.remaining(), 3);

        let mut seen = Vec::new();
        while let Some((entry, read)) = batch.next_file() {
            match read {
                Ok(read) => seen.push((entry.key().0, read.payload().to_vec())),
                Err(Error::FileNotFound(FileNotFoundError::Unlinked(key))) => {
                    seen.push((key.0, Vec::new()))
                }
                Err(e) => return Err(e),
            }
        }

        assert_eq!(
            seen,
            vec![
                (0x01, b"Hello World".to_vec()),
                (0x02, b"World Hello".to_vec()),
                (0x03, Vec::new()),
            ]
        );

        let headers: Vec<_> = read_all_headers(&mut reader, &entries, ReadFlags::default())
            .map(|(entry, header)| (entry.key().0, header.ok()))
            .collect();
        assert_eq!(
            headers,
            vec![(0x01, Some(vec![0x02])), (0x02, Some(vec![-1])), (0x03, None)]
        );

        Ok(())
    }

    #[test]
    fn loose_files_outside_chunks_are_refused() -> Result<()> {
        let (mapping, _) = sample(CompressionMethod::None)?;
        let dir = tempfile::tempdir()?;
        let chunks = dir.path().join("chunks");
        std::fs::create_dir_all(&chunks)?;
        std::fs::write(dir.path().join("hello.bin"), b"outside")?;

        let mut renamed = RenamedFileMapping::new();
        renamed.insert(RenamedFile {
            key: FileKey(0x01),
            original_name: "hello.bin".into(),
            file_name: "../hello.bin".into(),
            compressed: false,
        });
        let mut reader = UnpackedReader::new(chunks, Arc::new(renamed));
        let mut pool = BufferPool::new();

        let entry = mapping.get(FileKey(0x01)).cloned().ok_or(Error::NotLoaded)?;
        assert!(matches!(
            reader.read_header(&entry, ReadFlags::default()),
            Err(Error::UnsafePath(_))
        ));
        assert!(matches!(
            reader.read_file(&entry, &mut pool, ReadFlags::default()),
            Err(Error::UnsafePath(_))
        ));

        Ok(())
    }
}
