//! Options of the unpack and pack engines, and the settings file they can be built from

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bon::Builder;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::Result;

/// Number of workers used when nothing else is configured
pub const DEFAULT_THREADS: usize = 4;

/// Extension of packed bigfiles
pub const BIGFILE_EXTENSION: &str = "big";

/// Cooperative stop request shared with running workers
///
/// Workers check the token between files, so the file in flight is always finished or rolled back.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create a token that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every holder of the token to stop
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether a stop has been requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Options for unpacking a bigfile into a directory
#[derive(Debug, Clone, Builder)]
pub struct UnpackOptions {
    /// Directory receiving `yeti.gex`, `chunks/` and `renamed_mapping.json`
    #[builder(into)]
    pub directory: PathBuf,

    /// Write decompressed bodies. When unset, compressed files keep their stored zlib stream.
    #[builder(default = true)]
    pub decompress: bool,

    /// Number of workers
    #[builder(default = DEFAULT_THREADS)]
    pub threads: usize,

    /// Stop request checked between files
    #[builder(default)]
    pub cancel: CancelToken,
}

/// Options for packing an unpacked directory into a bigfile
#[derive(Debug, Clone, Builder)]
pub struct PackOptions {
    /// Directory the container is written to
    #[builder(into)]
    pub directory: PathBuf,

    /// File name of the container, without extension
    #[builder(into, default = String::from("Yeti"))]
    pub output_name: String,

    /// Deflate every payload
    #[builder(default)]
    pub compress: bool,

    /// Number of workers
    #[builder(default = DEFAULT_THREADS)]
    pub threads: usize,

    /// Remove the `chunks/` directory once the written container has been verified
    #[builder(default)]
    pub delete_chunks: bool,

    /// Stop request checked between files
    #[builder(default)]
    pub cancel: CancelToken,
}

impl PackOptions {
    /// Path of the container that will be written
    pub fn output_path(&self) -> PathBuf {
        self.directory
            .join(format!("{}.{BIGFILE_EXTENSION}", self.output_name))
    }
}

/// User settings for unpacking and packing, stored as JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BigFileConfig {
    /// Write decompressed bodies when unpacking
    pub decompress: bool,
    /// Use more than one worker
    pub use_threading: bool,
    /// Number of workers when threading is enabled
    pub thread_count: usize,
    /// Remove `chunks/` after a verified pack
    pub delete_chunks_after_pack: bool,
}

impl Default for BigFileConfig {
    fn default() -> Self {
        Self {
            decompress: true,
            use_threading: true,
            thread_count: DEFAULT_THREADS,
            delete_chunks_after_pack: false,
        }
    }
}

impl BigFileConfig {
    /// Read settings from a JSON file, missing fields take their default
    #[instrument(skip_all, fields(path = %path.as_ref().display()), err)]
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Number of workers these settings ask for
    pub fn threads(&self) -> usize {
        if self.use_threading {
            self.thread_count.max(1)
        } else {
            1
        }
    }

    /// Unpack options for `directory`
    pub fn unpack_options(&self, directory: impl Into<PathBuf>) -> UnpackOptions {
        UnpackOptions::builder()
            .directory(directory)
            .decompress(self.decompress)
            .threads(self.threads())
            .build()
    }

    /// Pack options for `directory`
    pub fn pack_options(&self, directory: impl Into<PathBuf>) -> PackOptions {
        PackOptions::builder()
            .directory(directory)
            .threads(self.threads())
            .delete_chunks(self.delete_chunks_after_pack)
            .build()
    }
}
