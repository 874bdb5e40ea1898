//! Types for writing bigfiles
//!

use std::collections::HashSet;
use std::fmt::Debug;
use std::io::{self, Seek, Write};

use bon::Builder;
use tracing::{instrument, Level};

use crate::archetype::Archetype;
use crate::compression::{encode_stored, write_frame, CompressionMethod};
use crate::error::{Error, Result};
use crate::metadata::Metadata;
use crate::types::{
    encode_name, BigFileHeader, FileKey, FileRecord, FolderId, FolderRecord, NO_PARENT,
    OFFSET_ALIGNMENT, OFFSET_UNLINKED, ROOT_FOLDER_ID,
};

/// Options for how a single file is stored
#[derive(Debug, Clone, Copy, Default, Builder)]
pub struct FileOptions {
    /// Folder holding the file
    #[builder(default = ROOT_FOLDER_ID)]
    pub folder: FolderId,

    /// The compression method to use for the payload
    #[builder(default)]
    pub compression: CompressionMethod,

    /// Archetype tag of the file
    #[builder(default)]
    pub archetype: Archetype,
}

/// Bigfile generator
///
/// Payloads are kept in memory until [`BigFileWriter::finish`], which writes the metadata block followed by the
/// payload segment.
///
/// ```
/// # fn doit() -> yeti_bigfile::error::Result<()>
/// # {
/// use std::io::Write;
/// use yeti_bigfile::write::{BigFileWriter, FileOptions};
/// use yeti_bigfile::{CompressionMethod, FileKey};
///
/// let mut big = BigFileWriter::new(std::io::Cursor::new(Vec::new()));
/// let textures = big.add_folder("tex", yeti_bigfile::ROOT_FOLDER_ID)?;
///
/// big.start_file(FileKey(1), "a.dds", FileOptions::builder()
///     .folder(textures)
///     .compression(CompressionMethod::Zlib)
///     .build())?;
/// big.write_all(&yeti_bigfile::payload::encode_body(&[], b"texels"))?;
///
/// big.finish()?;
/// # Ok(())
/// # }
/// # doit().unwrap();
/// ```
pub struct BigFileWriter<W: Write + Seek> {
    inner: W,
    header: BigFileHeader,
    files: Vec<FileRecord>,
    folders: Vec<FolderRecord>,
    keys: HashSet<FileKey>,
    data_block: Vec<u8>,
    current: Option<Vec<u8>>,
}

impl<W: Write + Seek> Debug for BigFileWriter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "BigFileWriter(files={} folders={} data={})",
            self.files.len(),
            self.folders.len(),
            self.data_block.len()
        )
    }
}

impl<W: Write + Seek> BigFileWriter<W> {
    /// Initializes the container with a root folder.
    ///
    /// Before writing to this object, the [`BigFileWriter::start_file`] function should be called.
    pub fn new(inner: W) -> BigFileWriter<W> {
        Self::with_header(inner, BigFileHeader::default())
    }

    /// Initializes the container, keeping the opaque header field of an existing one
    pub fn with_header(inner: W, header: BigFileHeader) -> BigFileWriter<W> {
        BigFileWriter {
            inner,
            header,
            files: Vec::new(),
            folders: vec![FolderRecord::default()],
            keys: HashSet::new(),
            data_block: Vec::new(),
            current: None,
        }
    }

    /// Returns true if a file is currently open for writing.
    pub const fn is_writing_file(&self) -> bool {
        self.current.is_some()
    }

    /// Add a folder below `parent` and return its id
    #[instrument(skip(self, name), err)]
    pub fn add_folder(&mut self, name: &str, parent: FolderId) -> Result<FolderId> {
        if !self.folders.iter().any(|f| f.id == parent) {
            return Err(Error::CustomError(format!("unknown parent folder {parent}")));
        }
        let id = FolderId::try_from(self.folders.len())
            .ok()
            .filter(|id| *id != NO_PARENT)
            .ok_or_else(|| Error::CustomError("too many folders".into()))?;

        self.folders.push(FolderRecord {
            id,
            parent,
            name: encode_name(name)?,
        });
        Ok(id)
    }

    fn push_record(
        &mut self,
        key: FileKey,
        name: &str,
        options: FileOptions,
        offset: i32,
    ) -> Result<()> {
        if !self.folders.iter().any(|f| f.id == options.folder) {
            return Err(Error::CustomError(format!(
                "unknown folder {}",
                options.folder
            )));
        }
        let name = encode_name(name)?;
        if !self.keys.insert(key) {
            return Err(Error::CustomError(format!("duplicate file key {key}")));
        }

        self.files.push(FileRecord {
            key,
            offset,
            size: 0,
            compression: options.compression,
            file_type: options.archetype.into(),
            folder: options.folder,
            name,
        });
        Ok(())
    }

    /// Start a new file with the requested options. The body is written through [`Write`].
    #[instrument(skip(self, name), err)]
    pub fn start_file(&mut self, key: FileKey, name: &str, options: FileOptions) -> Result<()> {
        if self.is_writing_file() {
            self.finish_file()?;
        }

        let offset = i32::try_from(self.data_block.len() as u64 / OFFSET_ALIGNMENT)
            .map_err(|_| Error::CustomError("payload segment too large".into()))?;
        self.push_record(key, name, options, offset)?;
        self.current = Some(Vec::new());

        Ok(())
    }

    /// Add a file that has no payload
    #[instrument(skip(self, name), err)]
    pub fn add_unlinked_file(
        &mut self,
        key: FileKey,
        name: &str,
        options: FileOptions,
    ) -> Result<()> {
        if self.is_writing_file() {
            self.finish_file()?;
        }
        self.push_record(key, name, options, OFFSET_UNLINKED)
    }

    #[instrument(skip(self), err)]
    fn finish_file(&mut self) -> Result<()> {
        let Some(body) = self.current.take() else {
            return Ok(());
        };

        let size = u32::try_from(body.len())
            .map_err(|_| Error::CustomError("file body too large".into()))?;
        let record = self
            .files
            .last_mut()
            .ok_or_else(|| Error::CustomError("no file record for open file".into()))?;
        record.size = size;

        let stored = encode_stored(&body, record.compression)?;
        write_frame(&mut self.data_block, &stored, size, record.compression)?;
        Ok(())
    }

    /// Finish the last file and write the container
    ///
    /// This will return the writer, but one should normally not append any data to the end of the file.
    #[instrument(skip(self), err)]
    pub fn finish(mut self) -> Result<W> {
        self.finish_file()?;

        let metadata = Metadata::new(self.header, self.files, self.folders);
        metadata.write(&mut self.inner)?;
        self.inner.write_all(&self.data_block)?;

        Ok(self.inner)
    }
}

impl<W: Write + Seek> Write for BigFileWriter<W> {
    #[instrument(skip_all, err, ret(level = Level::TRACE), fields(size=buf.len()) )]
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.current.as_mut() {
            Some(current) => current.write(buf),
            None => Err(io::Error::new(
                io::ErrorKind::Other,
                "No file has been started",
            )),
        }
    }

    #[instrument(skip(self), err)]
    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
