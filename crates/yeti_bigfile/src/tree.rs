//! In-memory folder tree and flat file index built from the metadata records
//!

use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::path::{Component, Path};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use tracing::{debug, instrument, trace};

use crate::archetype::{Archetype, ArchetypeView};
use crate::buffers::BufferPool;
use crate::compression::CompressionMethod;
use crate::error::{Error, Result};
use crate::metadata::Metadata;
use crate::reader::{FileReader, ReadFlags};
use crate::types::{encode_name, FileKey, FileRecord, FolderId, OFFSET_UNLINKED};

#[derive(Debug, Default)]
struct LoadState {
    header: Vec<i32>,
    payload: Option<Arc<[u8]>>,
    view: Option<ArchetypeView>,
}

/// A file stored in the bigfile
///
/// Entries are shared between their folder, the [`FileMappingData`] index and worker threads. Everything read
/// from the record is immutable, the loaded body and the references can change behind a lock.
pub struct FileEntry {
    key: FileKey,
    name: String,
    folder: FolderId,
    full_path: String,
    offset: i32,
    size: u32,
    compression: CompressionMethod,
    archetype: Archetype,
    state: RwLock<LoadState>,
    references: RwLock<Vec<FileKey>>,
}

impl Debug for FileEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "FileEntry({} {:?} offset={} size={})",
            self.key, self.full_path, self.offset, self.size
        )
    }
}

impl FileEntry {
    fn from_record(record: &FileRecord, folder_path: &str) -> Self {
        let name = record.name();
        Self {
            key: record.key,
            full_path: format!("{folder_path}{name}"),
            name,
            folder: record.folder,
            offset: record.offset,
            size: record.size,
            compression: record.compression,
            archetype: Archetype::from(record.file_type),
            state: RwLock::new(LoadState::default()),
            references: RwLock::new(Vec::new()),
        }
    }

    /// Unique key of the file
    pub fn key(&self) -> FileKey {
        self.key
    }

    /// Name of the file, without its folder
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Id of the folder holding the file
    pub fn folder(&self) -> FolderId {
        self.folder
    }

    /// Folder path followed by the file name
    pub fn full_path(&self) -> &str {
        &self.full_path
    }

    /// Offset of the payload frame in units of 8 bytes, negative when there is none
    pub fn offset(&self) -> i32 {
        self.offset
    }

    /// Whether the file has no payload in the container
    pub fn is_unlinked(&self) -> bool {
        self.offset < 0
    }

    /// Size of the body once decompressed
    pub fn size(&self) -> u32 {
        self.size
    }

    /// How the payload is stored in the container
    pub fn compression(&self) -> CompressionMethod {
        self.compression
    }

    /// Archetype tag of the file
    pub fn archetype(&self) -> Archetype {
        self.archetype
    }

    /// Record describing this file, with its payload placed at `offset`
    pub fn to_record(
        &self,
        offset: i32,
        size: u32,
        compression: CompressionMethod,
    ) -> Result<FileRecord> {
        Ok(FileRecord {
            key: self.key,
            offset,
            size,
            compression,
            file_type: self.archetype.into(),
            folder: self.folder,
            name: encode_name(&self.name)?,
        })
    }

    /// Whether the body has been loaded
    pub fn is_loaded(&self) -> bool {
        self.state.read().payload.is_some()
    }

    /// Payload bytes, without header ints, if loaded
    pub fn payload(&self) -> Option<Arc<[u8]>> {
        self.state.read().payload.clone()
    }

    /// Header ints of the loaded body
    pub fn header(&self) -> Vec<i32> {
        self.state.read().header.clone()
    }

    /// Typed view attached on load
    pub fn view(&self) -> Option<ArchetypeView> {
        self.state.read().view.clone()
    }

    /// Keys this file refers to, recorded by the last header or full load
    pub fn references(&self) -> Vec<FileKey> {
        self.references.read().clone()
    }

    /// Replace the recorded references with the non-null keys of `header`
    pub fn set_references(&self, header: &[i32]) {
        *self.references.write() = header
            .iter()
            .copied()
            .filter_map(FileKey::from_header_int)
            .collect();
    }

    /// Load the body through `reader`. Does nothing when the body is already present.
    ///
    /// Returns whether a read happened.
    #[instrument(skip(self, reader, pool), fields(key = %self.key), err)]
    pub fn load(&self, reader: &mut dyn FileReader, pool: &mut BufferPool) -> Result<bool> {
        if self.is_loaded() {
            trace!("already loaded");
            return Ok(false);
        }

        let read = reader.read_file(self, pool, ReadFlags { decompress: true })?;
        let payload: Arc<[u8]> = Arc::from(read.payload());
        let view = ArchetypeView::attach(self.archetype, &read.header, &payload);
        self.set_references(&read.header);

        let mut state = self.state.write();
        // another thread may have won the race, keep its result
        if state.payload.is_none() {
            state.header = read.header;
            state.payload = Some(payload);
            state.view = Some(view);
        }

        Ok(true)
    }

    /// Release the loaded body, keeping the references
    pub fn unload(&self) {
        let mut state = self.state.write();
        state.header.clear();
        state.payload = None;
        state.view = None;
    }
}

/// A folder of the bigfile
#[derive(Debug)]
pub struct Folder {
    id: FolderId,
    name: String,
    path: String,
    files: Vec<Arc<FileEntry>>,
    folders: IndexMap<FolderId, Folder>,
}

impl Folder {
    fn new(id: FolderId, name: String, path: String) -> Self {
        Self {
            id,
            name,
            path,
            files: Vec::new(),
            folders: IndexMap::new(),
        }
    }

    /// Id of the folder
    pub fn id(&self) -> FolderId {
        self.id
    }

    /// Path segment of the folder
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full path, ending with `/` for every folder but the root
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Files directly inside this folder
    pub fn files(&self) -> &[Arc<FileEntry>] {
        &self.files
    }

    /// Direct subfolders, keyed by id
    pub fn folders(&self) -> &IndexMap<FolderId, Folder> {
        &self.folders
    }

    /// Every file below this folder, depth first: a folder's own files come before its subfolders
    pub fn walk_files(&self) -> Vec<Arc<FileEntry>> {
        let mut files = Vec::new();
        self.collect_files(&mut files);
        files
    }

    fn collect_files(&self, out: &mut Vec<Arc<FileEntry>>) {
        out.extend(self.files.iter().cloned());
        for folder in self.folders.values() {
            folder.collect_files(out);
        }
    }

    /// This folder and every folder below it, depth first
    pub fn walk_folders(&self) -> Vec<&Folder> {
        let mut folders = vec![self];
        for folder in self.folders.values() {
            folders.extend(folder.walk_folders());
        }
        folders
    }

    /// Every file below this folder with the given archetype, depth first
    pub fn files_of_archetype(&self, archetype: Archetype) -> Vec<Arc<FileEntry>> {
        self.walk_files()
            .into_iter()
            .filter(|file| file.archetype() == archetype)
            .collect()
    }

    fn sort(&mut self) {
        self.files
            .sort_by(|a, b| a.name().cmp(b.name()).then(a.key().cmp(&b.key())));
        self.folders
            .sort_by(|ak, a, bk, b| a.name.cmp(&b.name).then(ak.cmp(bk)));
        for folder in self.folders.values_mut() {
            folder.sort();
        }
    }
}

/// Folder hierarchy of a bigfile
#[derive(Debug)]
pub struct Tree {
    root: Folder,
    /// ids from the first level below the root down to the folder
    chains: HashMap<FolderId, Vec<FolderId>>,
}

impl Tree {
    /// The root folder
    pub fn root(&self) -> &Folder {
        &self.root
    }

    /// Find a folder by id
    pub fn folder(&self, id: FolderId) -> Option<&Folder> {
        if id == self.root.id {
            return Some(&self.root);
        }
        let chain = self.chains.get(&id)?;
        chain
            .iter()
            .try_fold(&self.root, |folder, id| folder.folders.get(id))
    }

    fn folder_mut(&mut self, id: FolderId) -> Option<&mut Folder> {
        if id == self.root.id {
            return Some(&mut self.root);
        }
        let chain = self.chains.get(&id)?;
        chain
            .iter()
            .try_fold(&mut self.root, |folder, id| folder.folders.get_mut(id))
    }

    /// Number of folders, root included
    pub fn folder_count(&self) -> usize {
        self.chains.len() + 1
    }

    /// Every file, depth first
    pub fn walk_files(&self) -> Vec<Arc<FileEntry>> {
        self.root.walk_files()
    }

    /// Sort files by name then key and subfolders by name then id, in every folder
    #[instrument(skip(self))]
    pub fn sort(&mut self) {
        self.root.sort();
    }
}

/// Flat index over every file of a bigfile
#[derive(Debug, Default)]
pub struct FileMappingData {
    files_list: Vec<Arc<FileEntry>>,
    by_key: IndexMap<FileKey, Arc<FileEntry>>,
}

impl FileMappingData {
    fn new(by_key: IndexMap<FileKey, Arc<FileEntry>>) -> Self {
        let mut files_list: Vec<_> = by_key.values().cloned().collect();
        sort_by_offset(&mut files_list);
        Self { files_list, by_key }
    }

    /// Files ordered by payload offset, entries without a payload last
    pub fn files_list(&self) -> &[Arc<FileEntry>] {
        &self.files_list
    }

    /// Files in the order of their records
    pub fn entries(&self) -> impl Iterator<Item = &Arc<FileEntry>> {
        self.by_key.values()
    }

    /// Find a file by key
    pub fn get(&self, key: FileKey) -> Option<&Arc<FileEntry>> {
        self.by_key.get(&key)
    }

    /// Number of files
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    /// Whether there are no files
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

/// Stable sort by offset ascending, with unlinked entries moved to the end in their original order
pub fn sort_by_offset(files: &mut [Arc<FileEntry>]) {
    files.sort_by_key(|file| (file.is_unlinked(), file.offset()));
}

fn malformed(message: String) -> Error {
    Error::MalformedContainer(message)
}

/// Whether `name` is exactly one normal path segment, so joining it never leaves the parent directory
pub(crate) fn is_plain_segment(name: &str) -> bool {
    let mut components = Path::new(name).components();
    !name.contains(|c: char| c == '/' || c == '\\')
        && matches!(components.next(), Some(Component::Normal(_)))
        && components.next().is_none()
}

/// Build the folder tree and the file index from the metadata records
#[instrument(skip_all, fields(files = metadata.files.len(), folders = metadata.folders.len()), err)]
pub fn build(metadata: &Metadata) -> Result<(Tree, FileMappingData)> {
    let mut records = metadata.folders.iter();
    let root = match records.next() {
        Some(record) if record.is_root() => record,
        Some(record) => {
            return Err(malformed(format!(
                "first folder record {} is not the root",
                record.id
            )))
        }
        None => return Err(malformed("no root folder".into())),
    };

    let mut tree = Tree {
        root: Folder::new(root.id, root.name(), String::new()),
        chains: HashMap::new(),
    };

    for record in records {
        if record.is_root() {
            return Err(malformed(format!("second root folder {}", record.id)));
        }
        if record.id == tree.root.id || tree.chains.contains_key(&record.id) {
            return Err(malformed(format!("duplicate folder id {}", record.id)));
        }

        let mut chain = if record.parent == tree.root.id {
            Vec::new()
        } else {
            tree.chains.get(&record.parent).cloned().ok_or_else(|| {
                malformed(format!(
                    "folder {} has unknown parent {}",
                    record.id, record.parent
                ))
            })?
        };

        let parent = tree.folder_mut(record.parent).ok_or_else(|| {
            malformed(format!(
                "folder {} has unknown parent {}",
                record.id, record.parent
            ))
        })?;
        let name = record.name();
        if !is_plain_segment(&name) {
            return Err(malformed(format!(
                "folder {} has unusable name {name:?}",
                record.id
            )));
        }
        let path = format!("{}{name}/", parent.path);
        trace!(id = record.id, %path, "folder");
        parent
            .folders
            .insert(record.id, Folder::new(record.id, name, path));

        chain.push(record.id);
        tree.chains.insert(record.id, chain);
    }

    let mut by_key = IndexMap::with_capacity(metadata.files.len());
    for record in &metadata.files {
        if record.offset < OFFSET_UNLINKED {
            return Err(malformed(format!(
                "file {} has negative offset {}",
                record.key, record.offset
            )));
        }
        let name = record.name();
        if !name.is_empty() && !is_plain_segment(&name) {
            return Err(malformed(format!(
                "file {} has unusable name {name:?}",
                record.key
            )));
        }
        let folder = tree.folder_mut(record.folder).ok_or_else(|| {
            malformed(format!(
                "file {} is in unknown folder {}",
                record.key, record.folder
            ))
        })?;

        let entry = Arc::new(FileEntry::from_record(record, &folder.path));
        if by_key.insert(record.key, entry.clone()).is_some() {
            return Err(malformed(format!("duplicate file key {}", record.key)));
        }
        folder.files.push(entry);
    }

    debug!(folders = tree.folder_count(), files = by_key.len(), "built tree");
    Ok((tree, FileMappingData::new(by_key)))
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use crate::archetype::Archetype;
    use crate::error::{Error, Result};
    use crate::metadata::Metadata;
    use crate::tree::{build, sort_by_offset};
    use crate::types::{
        encode_name, BigFileHeader, FileKey, FileRecord, FolderId, FolderRecord, NO_PARENT,
    };

    fn folder(id: FolderId, parent: FolderId, name: &str) -> Result<FolderRecord> {
        Ok(FolderRecord {
            id,
            parent,
            name: encode_name(name)?,
        })
    }

    fn file(key: u32, folder: FolderId, name: &str, offset: i32) -> Result<FileRecord> {
        Ok(FileRecord {
            key: FileKey(key),
            offset,
            folder,
            name: encode_name(name)?,
            ..Default::default()
        })
    }

    fn sample() -> Result<Metadata> {
        Ok(Metadata::new(
            BigFileHeader::default(),
            vec![
                file(0x30, 2, "b.dds", 5)?,
                file(0x10, 0, "root.bin", -1)?,
                file(0x20, 1, "a.dds", 2)?,
                file(0x21, 1, "a.dds", 8)?,
                file(0x40, 1, "0.dds", -1)?,
            ],
            vec![
                folder(0, NO_PARENT, "")?,
                folder(1, 0, "tex")?,
                folder(2, 1, "ui")?,
            ],
        ))
    }

    #[test]
    fn build_paths() -> Result<()> {
        let (tree, mapping) = build(&sample()?)?;

        assert_eq!(tree.root().path(), "");
        assert_eq!(tree.folder(1).map(|f| f.path()), Some("tex/"));
        assert_eq!(tree.folder(2).map(|f| f.path()), Some("tex/ui/"));
        assert_eq!(tree.folder_count(), 3);

        let file = mapping.get(FileKey(0x30)).map(|f| f.full_path().to_owned());
        assert_eq!(file.as_deref(), Some("tex/ui/b.dds"));
        assert!(mapping.get(FileKey(0x99)).is_none());

        Ok(())
    }

    #[test]
    fn depth_first_walk_lists_files_before_subfolders() -> Result<()> {
        let (tree, _) = build(&sample()?)?;

        let keys: Vec<u32> = tree.walk_files().iter().map(|f| f.key().0).collect();
        assert_eq!(keys, vec![0x10, 0x20, 0x21, 0x40, 0x30]);

        Ok(())
    }

    #[test]
    fn files_list_is_offset_ordered() -> Result<()> {
        let (_, mapping) = build(&sample()?)?;

        let offsets: Vec<i32> = mapping.files_list().iter().map(|f| f.offset()).collect();
        assert_eq!(offsets, vec![2, 5, 8, -1, -1]);

        let sentinels: Vec<u32> = mapping.files_list()[3..].iter().map(|f| f.key().0).collect();
        assert_eq!(sentinels, vec![0x10, 0x40]);

        let record_order: Vec<u32> = mapping.entries().map(|f| f.key().0).collect();
        assert_eq!(record_order, vec![0x30, 0x10, 0x20, 0x21, 0x40]);

        Ok(())
    }

    #[test]
    fn sort_by_offset_keeps_sentinel_order() -> Result<()> {
        let (_, mapping) = build(&sample()?)?;
        let mut files: Vec<_> = mapping.entries().cloned().collect();
        files.reverse();

        sort_by_offset(&mut files);
        let keys: Vec<u32> = files.iter().map(|f| f.key().0).collect();
        assert_eq!(keys, vec![0x20, 0x30, 0x21, 0x40, 0x10]);

        Ok(())
    }

    #[test]
    fn sort_orders_by_name_then_key() -> Result<()> {
        let (mut tree, _) = build(&sample()?)?;
        tree.sort();

        let tex = tree.folder(1).map(|f| {
            f.files()
                .iter()
                .map(|f| (f.name().to_owned(), f.key().0))
                .collect::<Vec<_>>()
        });
        assert_eq!(
            tex,
            Some(vec![
                ("0.dds".to_owned(), 0x40),
                ("a.dds".to_owned(), 0x20),
                ("a.dds".to_owned(), 0x21),
            ])
        );
        assert_eq!(tree.folder(2).map(|f| f.id()), Some(2));

        Ok(())
    }

    #[test]
    fn files_of_archetype_searches_subfolders() -> Result<()> {
        let mut metadata = sample()?;
        metadata.files[0].file_type = 1;
        let (tree, _) = build(&metadata)?;

        let found = tree.root().files_of_archetype(Archetype::TextureMetadata);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].key(), FileKey(0x30));

        Ok(())
    }

    #[test]
    fn malformed_trees_are_rejected() -> Result<()> {
        let cases = vec![
            Metadata::new(BigFileHeader::default(), vec![], vec![]),
            Metadata::new(
                BigFileHeader::default(),
                vec![],
                vec![folder(1, 0, "tex")?],
            ),
            Metadata::new(
                BigFileHeader::default(),
                vec![],
                vec![folder(0, NO_PARENT, "")?, folder(1, 7, "tex")?],
            ),
            Metadata::new(
                BigFileHeader::default(),
                vec![],
                vec![
                    folder(0, NO_PARENT, "")?,
                    folder(1, 0, "a")?,
                    folder(1, 0, "b")?,
                ],
            ),
            Metadata::new(
                BigFileHeader::default(),
                vec![file(1, 0, "a", 0)?, file(1, 0, "b", 2)?],
                vec![folder(0, NO_PARENT, "")?],
            ),
            Metadata::new(
                BigFileHeader::default(),
                vec![file(1, 3, "a", 0)?],
                vec![folder(0, NO_PARENT, "")?],
            ),
            Metadata::new(
                BigFileHeader::default(),
                vec![file(1, 0, "a", -2)?],
                vec![folder(0, NO_PARENT, "")?],
            ),
        ];

        for metadata in cases {
            assert!(matches!(
                build(&metadata),
                Err(Error::MalformedContainer(_))
            ));
        }

        Ok(())
    }

    #[test]
    fn names_must_stay_inside_their_folder() -> Result<()> {
        let mut cases = Vec::new();
        for name in ["..", ".", "", "a/b", "/etc", "a\\b"] {
            cases.push(Metadata::new(
                BigFileHeader::default(),
                vec![file(1, 1, "escaped.bin", 0)?],
                vec![folder(0, NO_PARENT, "")?, folder(1, 0, name)?],
            ));
        }
        for name in ["..", "../escaped.bin", "/tmp/escaped.bin", "tex\\..\\a"] {
            cases.push(Metadata::new(
                BigFileHeader::default(),
                vec![file(1, 0, name, 0)?],
                vec![folder(0, NO_PARENT, "")?],
            ));
        }

        for metadata in cases {
            assert!(matches!(
                build(&metadata),
                Err(Error::MalformedContainer(_))
            ));
        }

        Ok(())
    }
}
