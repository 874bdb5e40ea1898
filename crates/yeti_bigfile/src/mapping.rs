//! Key to loose file path table of an unpacked bigfile
//!
//! Names inside a bigfile are not unique, so unpacking gives every file a collision free path below
//! `chunks/`. The table is written next to the unpacked tree and is required to pack it again.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Component, Path};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace};

use crate::error::{Error, Result};
use crate::tree::Tree;
use crate::types::FileKey;

/// Where one file of the bigfile lives in the unpacked tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenamedFile {
    /// Key of the file
    pub key: FileKey,
    /// Name stored in the file record
    pub original_name: String,
    /// Path relative to the chunks directory
    pub file_name: String,
    /// Whether the loose file holds the stored zlib stream instead of the body
    pub compressed: bool,
}

/// Check that `relative` only names entries below the directory it gets joined onto
pub(crate) fn relative_path(relative: &str) -> Result<&Path> {
    let path = Path::new(relative);
    let plain = !relative.contains('\\')
        && path.components().all(|c| matches!(c, Component::Normal(_)));
    if plain {
        Ok(path)
    } else {
        Err(Error::UnsafePath(relative.to_owned()))
    }
}

#[derive(Serialize, Deserialize)]
struct MappingFile {
    files: Vec<RenamedFile>,
}

/// Hands out unique relative paths, suffixing repeats with `_1`, `_2`, ...
#[derive(Debug, Default)]
pub struct PathAllocator {
    assigned: HashSet<String>,
    counters: HashMap<String, u32>,
}

impl PathAllocator {
    /// Create an allocator with no assigned paths
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `candidate`, or the first free suffixed variant of it
    pub fn assign(&mut self, candidate: &str) -> String {
        if self.assigned.insert(candidate.to_owned()) {
            return candidate.to_owned();
        }

        let counter = self.counters.entry(candidate.to_owned()).or_insert(0);
        loop {
            *counter += 1;
            let renamed = format!("{candidate}_{counter}");
            if self.assigned.insert(renamed.clone()) {
                return renamed;
            }
        }
    }
}

/// Mapping from file key to its loose file, in depth first tree order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenamedFileMapping {
    files: IndexMap<FileKey, RenamedFile>,
}

impl RenamedFileMapping {
    /// Create an empty mapping
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign a path to every file of `tree`, depth first.
    ///
    /// With `keep_stored` the loose files of compressed entries hold their stored zlib stream and are flagged.
    #[instrument(skip(tree))]
    pub fn build(tree: &Tree, keep_stored: bool) -> Self {
        let mut allocator = PathAllocator::new();
        let mut mapping = Self::new();

        for file in tree.walk_files() {
            let file_name = allocator.assign(file.full_path());
            if file_name != file.full_path() {
                debug!(key = %file.key(), from = file.full_path(), to = %file_name, "renamed");
            } else {
                trace!(key = %file.key(), %file_name, "mapped");
            }

            mapping.insert(RenamedFile {
                key: file.key(),
                original_name: file.name().to_owned(),
                file_name,
                compressed: keep_stored && file.compression().is_compressed(),
            });
        }

        mapping
    }

    /// Add or replace the entry for a key
    pub fn insert(&mut self, file: RenamedFile) -> Option<RenamedFile> {
        self.files.insert(file.key, file)
    }

    /// Find the entry of a key
    pub fn get(&self, key: FileKey) -> Option<&RenamedFile> {
        self.files.get(&key)
    }

    /// Entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &RenamedFile> {
        self.files.values()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether there are no entries
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Write the mapping as JSON
    #[instrument(skip_all, fields(path = %path.as_ref().display()), err)]
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        let file = MappingFile {
            files: self.files.values().cloned().collect(),
        };
        serde_json::to_writer_pretty(&mut writer, &file)?;
        writer.flush()?;
        Ok(())
    }

    /// Read a mapping written by [`RenamedFileMapping::save`]
    #[instrument(skip_all, fields(path = %path.as_ref().display()), err)]
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let file: MappingFile = serde_json::from_reader(reader)?;

        let mut mapping = Self::new();
        for entry in file.files {
            relative_path(&entry.file_name)?;
            mapping.insert(entry);
        }
        debug!(files = mapping.len(), "loaded mapping");
        Ok(mapping)
    }
}
