//! Loading file bodies and cross references into the tree

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, instrument, warn};

use crate::buffers::BufferPool;
use crate::error::{Error, FileNotFoundError, Result};
use crate::reader::{read_all_headers, FileReader};
use crate::tree::{sort_by_offset, FileEntry};

/// Outcome of a load pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Files read successfully
    pub loaded: usize,
    /// Files already present, only for full loads
    pub cached: usize,
    /// Files without a payload
    pub unlinked: usize,
    /// Files that failed to read
    pub failed: usize,
    /// Wall time of the pass
    pub elapsed: Duration,
}

/// Loads files through one reader with its own buffer pool
pub struct FileLoader {
    reader: Box<dyn FileReader>,
    pool: BufferPool,
}

impl FileLoader {
    /// Create a loader reading through `reader`
    pub fn new(reader: Box<dyn FileReader>) -> Self {
        Self {
            reader,
            pool: BufferPool::new(),
        }
    }

    fn record_failure(report: &mut LoadReport, entry: &FileEntry, err: Error) -> Result<()> {
        match err {
            Error::FileNotFound(FileNotFoundError::Unlinked(_)) => {
                warn!(key = %entry.key(), path = entry.full_path(), "file has no payload");
                report.unlinked += 1;
                Ok(())
            }
            e if e.is_recoverable() => {
                error!(key = %entry.key(), path = entry.full_path(), "couldn't read file: {e}");
                report.failed += 1;
                Ok(())
            }
            e => Err(e),
        }
    }

    /// Header-only pass recording the references of every file, in payload order
    #[instrument(skip_all, fields(files = files.len()), err)]
    pub fn load_references(&mut self, files: &[Arc<FileEntry>]) -> Result<LoadReport> {
        let start = Instant::now();
        let mut report = LoadReport::default();
        let flags = self.reader.default_flags();

        for (entry, header) in read_all_headers(self.reader.as_mut(), files, flags) {
            match header {
                Ok(header) => {
                    entry.set_references(&header);
                    report.loaded += 1;
                }
                Err(e) => Self::record_failure(&mut report, &entry, e)?,
            }
        }

        report.elapsed = start.elapsed();
        info!(
            loaded = report.loaded,
            unlinked = report.unlinked,
            failed = report.failed,
            "loaded references in {:.3}s",
            report.elapsed.as_secs_f64()
        );
        Ok(report)
    }

    /// Load the full body of every file, in payload order
    #[instrument(skip_all, fields(files = files.len()), err)]
    pub fn load_files(&mut self, files: &[Arc<FileEntry>]) -> Result<LoadReport> {
        let start = Instant::now();
        let mut report = LoadReport::default();

        let mut files = files.to_vec();
        sort_by_offset(&mut files);

        for entry in files {
            debug!(key = %entry.key(), path = entry.full_path(), "loading file");
            if entry.is_unlinked() {
                let err = FileNotFoundError::Unlinked(entry.key()).into();
                Self::record_failure(&mut report, &entry, err)?;
                continue;
            }

            match entry.load(self.reader.as_mut(), &mut self.pool) {
                Ok(true) => report.loaded += 1,
                Ok(false) => report.cached += 1,
                Err(e) => Self::record_failure(&mut report, &entry, e)?,
            }
        }

        report.elapsed = start.elapsed();
        info!(
            loaded = report.loaded,
            cached = report.cached,
            failed = report.failed,
            "loaded files in {:.3}s",
            report.elapsed.as_secs_f64()
        );
        Ok(report)
    }

    /// Bytes retained by the buffer pool of this loader
    pub fn retained_bytes(&self) -> usize {
        self.pool.retained_bytes()
    }
}
