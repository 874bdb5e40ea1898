//! A bigfile on disk, packed or unpacked, and its loaded metadata
//!

use std::fs::{self, File};
use std::io::{BufReader, Cursor};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard};
use tracing::{info, instrument, Dispatch};

use crate::error::{Error, Result};
use crate::loader::{FileLoader, LoadReport};
use crate::mapping::RenamedFileMapping;
use crate::metadata::{parse_header, read_raw_metadata_block, Metadata};
use crate::pack::Packer;
use crate::reader::{FileReader, PackedReader, UnpackedReader};
use crate::tree::{build, FileEntry, FileMappingData, Folder, Tree};
use crate::types::{FileKey, FolderId};
use crate::unpack::Unpacker;

/// Name of the metadata side-car file of an unpacked bigfile
pub const METADATA_FILE_NAME: &str = "yeti.gex";
/// Name of the directory holding the loose files of an unpacked bigfile
pub const UNPACK_DIR: &str = "chunks";
/// Name of the rename mapping of an unpacked bigfile
pub const MAPPING_FILE_NAME: &str = "renamed_mapping.json";

/// Where the content of a bigfile lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backing {
    /// A single container file
    Packed(PathBuf),
    /// A directory produced by [`Unpacker`]
    Unpacked(PathBuf),
}

/// Everything read by [`BigFile::load_from_disk`]
#[derive(Debug)]
pub struct LoadedBigFile {
    /// Header and records as stored
    pub metadata: Metadata,
    /// Folder hierarchy
    pub tree: Tree,
    /// Flat file index
    pub mapping: FileMappingData,
    /// Rename mapping, only for unpacked bigfiles
    pub renamed: Option<Arc<RenamedFileMapping>>,
}

/// A bigfile archive
///
/// Opening only records where the archive lives, [`BigFile::load_from_disk`] reads the metadata and builds the
/// tree. File bodies are read on demand through [`BigFile::open_reader`] or [`BigFile::file_loader`].
///
/// ```no_run
/// fn list_files(path: &str) -> yeti_bigfile::error::Result<()> {
///     let big = yeti_bigfile::BigFile::open_packed(path);
///     big.load_from_disk()?;
///
///     if let Some(mapping) = big.mapping() {
///         for file in mapping.files_list() {
///             println!("{} {}", file.key(), file.full_path());
///         }
///     }
///
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct BigFile {
    backing: Backing,
    state: RwLock<Option<LoadedBigFile>>,
}

impl BigFile {
    /// A bigfile stored as a single container
    pub fn open_packed(path: impl Into<PathBuf>) -> Self {
        Self::new(Backing::Packed(path.into()))
    }

    /// A bigfile unpacked into `directory`
    pub fn open_unpacked(directory: impl Into<PathBuf>) -> Self {
        Self::new(Backing::Unpacked(directory.into()))
    }

    /// Open a container file or an unpacked directory, whichever `path` is
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if path.is_dir() {
            Self::open_unpacked(path)
        } else {
            Self::open_packed(path)
        }
    }

    fn new(backing: Backing) -> Self {
        Self {
            backing,
            state: RwLock::new(None),
        }
    }

    /// Where the archive lives
    pub fn backing(&self) -> &Backing {
        &self.backing
    }

    /// Whether the metadata has been loaded
    pub fn is_loaded(&self) -> bool {
        self.state.read().is_some()
    }

    fn read_metadata(&self) -> Result<(Metadata, Option<Arc<RenamedFileMapping>>)> {
        match &self.backing {
            Backing::Packed(path) => {
                let mut reader = BufReader::new(File::open(path)?);
                Ok((Metadata::read(&mut reader)?, None))
            }
            Backing::Unpacked(dir) => {
                let raw = fs::read(dir.join(METADATA_FILE_NAME))?;
                let metadata = Metadata::read(&mut Cursor::new(raw))?;
                let renamed = RenamedFileMapping::load(dir.join(MAPPING_FILE_NAME))?;
                Ok((metadata, Some(Arc::new(renamed))))
            }
        }
    }

    /// Read the metadata and build the tree. On failure the previously loaded state is kept.
    #[instrument(skip(self), fields(backing = ?self.backing), err)]
    pub fn load_from_disk(&self) -> Result<()> {
        let (metadata, renamed) = self.read_metadata()?;
        let (tree, mapping) = build(&metadata)?;

        info!(
            files = mapping.len(),
            folders = tree.folder_count(),
            "loaded bigfile"
        );

        *self.state.write() = Some(LoadedBigFile {
            metadata,
            tree,
            mapping,
            renamed,
        });
        Ok(())
    }

    /// Run [`BigFile::load_from_disk`] on a new thread and hand the outcome to `callback`
    pub fn load_in_background<F>(self: &Arc<Self>, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let big = Arc::clone(self);
        let dispatch = tracing::dispatcher::get_default(Dispatch::clone);
        thread::spawn(move || {
            tracing::dispatcher::with_default(&dispatch, || callback(big.load_from_disk()))
        })
    }

    /// Record the references of every file on a new thread and hand the report to `callback`
    pub fn load_references_in_background<F>(self: &Arc<Self>, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(Result<LoadReport>) + Send + 'static,
    {
        let big = Arc::clone(self);
        let dispatch = tracing::dispatcher::get_default(Dispatch::clone);
        thread::spawn(move || {
            tracing::dispatcher::with_default(&dispatch, || {
                let result = big.files_list().and_then(|files| {
                    let mut loader = big.file_loader()?;
                    loader.load_references(&files)
                });
                callback(result)
            })
        })
    }

    /// The loaded state, if any
    pub fn loaded(&self) -> Option<MappedRwLockReadGuard<'_, LoadedBigFile>> {
        RwLockReadGuard::try_map(self.state.read(), |state| state.as_ref()).ok()
    }

    /// The loaded state, or [`Error::NotLoaded`]
    pub fn require_loaded(&self) -> Result<MappedRwLockReadGuard<'_, LoadedBigFile>> {
        self.loaded().ok_or(Error::NotLoaded)
    }

    /// Header and records as stored
    pub fn metadata(&self) -> Option<MappedRwLockReadGuard<'_, Metadata>> {
        RwLockReadGuard::try_map(self.state.read(), |state| {
            state.as_ref().map(|s| &s.metadata)
        })
        .ok()
    }

    /// The folder tree
    pub fn tree(&self) -> Option<MappedRwLockReadGuard<'_, Tree>> {
        RwLockReadGuard::try_map(self.state.read(), |state| state.as_ref().map(|s| &s.tree)).ok()
    }

    /// The flat file index
    pub fn mapping(&self) -> Option<MappedRwLockReadGuard<'_, FileMappingData>> {
        RwLockReadGuard::try_map(self.state.read(), |state| {
            state.as_ref().map(|s| &s.mapping)
        })
        .ok()
    }

    /// Files ordered by payload offset
    pub fn files_list(&self) -> Result<Vec<Arc<FileEntry>>> {
        Ok(self.require_loaded()?.mapping.files_list().to_vec())
    }

    /// Find a file by key
    pub fn file(&self, key: FileKey) -> Option<Arc<FileEntry>> {
        self.state.read().as_ref()?.mapping.get(key).cloned()
    }

    /// Find a folder by id
    pub fn folder(&self, id: FolderId) -> Option<MappedRwLockReadGuard<'_, Folder>> {
        RwLockReadGuard::try_map(self.state.read(), |state| state.as_ref()?.tree.folder(id)).ok()
    }

    /// Sort every folder of the tree by name
    pub fn sort_tree(&self) -> Result<()> {
        let mut state = self.state.write();
        let loaded = state.as_mut().ok_or(Error::NotLoaded)?;
        loaded.tree.sort();
        Ok(())
    }

    /// Absolute offset of the payload segment
    pub fn data_offset(&self) -> Result<u64> {
        Ok(self.require_loaded()?.metadata.data_offset())
    }

    /// Directory holding the loose files, for unpacked bigfiles
    pub fn chunks_dir(&self) -> Option<PathBuf> {
        match &self.backing {
            Backing::Packed(_) => None,
            Backing::Unpacked(dir) => Some(dir.join(UNPACK_DIR)),
        }
    }

    /// A new reader over the file bodies, matching the backing
    pub fn open_reader(&self) -> Result<Box<dyn FileReader>> {
        let loaded = self.require_loaded()?;
        self.reader_for(&loaded)
    }

    /// Like [`BigFile::open_reader`] for callers already holding the loaded state
    pub(crate) fn reader_for(&self, loaded: &LoadedBigFile) -> Result<Box<dyn FileReader>> {
        match &self.backing {
            Backing::Packed(path) => Ok(Box::new(PackedReader::open(
                path,
                loaded.metadata.data_offset(),
            )?)),
            Backing::Unpacked(dir) => {
                let renamed = loaded.renamed.clone().ok_or(Error::NotLoaded)?;
                Ok(Box::new(UnpackedReader::new(dir.join(UNPACK_DIR), renamed)))
            }
        }
    }

    /// A loader with its own reader and buffers
    pub fn file_loader(&self) -> Result<FileLoader> {
        Ok(FileLoader::new(self.open_reader()?))
    }

    /// The unpack engine for this bigfile
    pub fn unpacker(&self) -> Unpacker<'_> {
        Unpacker::new(self)
    }

    /// The pack engine for this bigfile
    pub fn packer(&self) -> Packer<'_> {
        Packer::new(self)
    }

    /// The metadata block exactly as stored, without padding
    #[instrument(skip(self), err)]
    pub fn raw_metadata_block(&self) -> Result<Vec<u8>> {
        match &self.backing {
            Backing::Packed(path) => read_raw_block(path),
            Backing::Unpacked(dir) => Ok(fs::read(dir.join(METADATA_FILE_NAME))?),
        }
    }
}

fn read_raw_block(path: &Path) -> Result<Vec<u8>> {
    let mut reader = BufReader::new(File::open(path)?);
    let (header, counts) = parse_header(&mut reader)?;
    read_raw_metadata_block(&mut reader, &header, &counts)
}
