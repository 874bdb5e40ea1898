//! Extracting a packed bigfile into a directory of loose files
//!

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, instrument, warn, Dispatch};

use crate::archive::{Backing, BigFile, MAPPING_FILE_NAME, METADATA_FILE_NAME, UNPACK_DIR};
use crate::buffers::BufferPool;
use crate::diagnostics::{UnpackDiagnostics, WorkerDiagnostics};
use crate::error::{Error, Result};
use crate::mapping::{relative_path, RenamedFileMapping};
use crate::options::UnpackOptions;
use crate::reader::{FileReader, PackedReader, ReadFlags};
use crate::tree::FileEntry;
use crate::workers::{run_partitions, ProgressFn, WorkerContext};

/// Extension of files being written by a worker
const PART_EXTENSION: &str = "part";

/// Unpack engine
///
/// Writes the metadata block to `yeti.gex`, mirrors the folder tree below `chunks/`, saves the rename mapping and
/// extracts every file with a fixed number of workers.
pub struct Unpacker<'a> {
    bigfile: &'a BigFile,
    dispatch: Dispatch,
    progress: Option<Box<ProgressFn<'static>>>,
}

impl<'a> Unpacker<'a> {
    /// Create an engine logging through the current default dispatcher
    pub fn new(bigfile: &'a BigFile) -> Self {
        Self {
            bigfile,
            dispatch: tracing::dispatcher::get_default(Dispatch::clone),
            progress: None,
        }
    }

    /// Log through `dispatch` instead
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Receive `(completed, total)` after every file, extracted or skipped
    pub fn with_progress(mut self, progress: impl Fn(usize, usize) + Send + Sync + 'static) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    /// Unpack into `options.directory`
    pub fn unpack(&self, options: &UnpackOptions) -> Result<UnpackDiagnostics> {
        tracing::dispatcher::with_default(&self.dispatch, || self.run(options))
    }

    #[instrument(skip_all, fields(directory = %options.directory.display()), err)]
    fn run(&self, options: &UnpackOptions) -> Result<UnpackDiagnostics> {
        let Backing::Packed(source) = self.bigfile.backing() else {
            return Err(Error::CustomError(
                "only packed bigfiles can be unpacked".into(),
            ));
        };
        let loaded = self.bigfile.require_loaded()?;
        let mut diagnostics = UnpackDiagnostics::default();
        let dir = &options.directory;
        let chunks = dir.join(UNPACK_DIR);

        info!("generating metadata file...");
        let started = Instant::now();
        fs::create_dir_all(dir)?;
        fs::write(dir.join(METADATA_FILE_NAME), self.bigfile.raw_metadata_block()?)?;
        diagnostics.metadata = started.elapsed();

        info!("creating unpacked directories...");
        let started = Instant::now();
        for folder in loaded.tree.root().walk_folders() {
            let path = chunks.join(relative_path(folder.path())?);
            debug!(path = %path.display(), "creating directory");
            fs::create_dir_all(path)?;
        }
        diagnostics.directories = started.elapsed();

        info!("creating renamed mapping file...");
        let started = Instant::now();
        let renamed = RenamedFileMapping::build(&loaded.tree, !options.decompress);
        renamed.save(dir.join(MAPPING_FILE_NAME))?;
        diagnostics.mapping = started.elapsed();

        info!("beginning extract...");
        let started = Instant::now();
        let data_offset = loaded.metadata.data_offset();
        let flags = ReadFlags {
            decompress: options.decompress,
        };
        let (workers, _) = run_partitions(
            "unpack",
            &self.dispatch,
            options.threads,
            loaded.mapping.files_list(),
            &options.cancel,
            self.progress.as_deref(),
            |files, context, worker| {
                let mut reader = PackedReader::open(source, data_offset)?;
                unpack_files(&mut reader, files, &renamed, &chunks, flags, context, worker)
            },
        )?;
        diagnostics.files = started.elapsed();
        diagnostics.workers = workers;
        diagnostics.cancelled = options.cancel.is_cancelled();

        if diagnostics.cancelled {
            warn!("unpack cancelled");
        } else {
            info!(
                processed = diagnostics.processed(),
                skipped = diagnostics.skipped(),
                "unpack complete in {:.3}s",
                diagnostics.files.as_secs_f64()
            );
        }
        Ok(diagnostics)
    }
}

fn part_path(path: &Path) -> PathBuf {
    let mut part = path.as_os_str().to_owned();
    part.push(".");
    part.push(PART_EXTENSION);
    PathBuf::from(part)
}

/// Write `bytes` next to `path` and move it into place once complete
fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let part = part_path(path);
    if let Err(e) = fs::write(&part, bytes).and_then(|_| fs::rename(&part, path)) {
        let _ = fs::remove_file(&part);
        return Err(e.into());
    }
    Ok(())
}

fn unpack_files(
    reader: &mut dyn FileReader,
    files: &[Arc<FileEntry>],
    renamed: &RenamedFileMapping,
    chunks: &Path,
    flags: ReadFlags,
    context: &WorkerContext,
    worker: &mut WorkerDiagnostics,
) -> Result<()> {
    let mut pool = BufferPool::new();

    for file in files {
        if context.should_stop() {
            debug!(worker = worker.worker, "stopping early");
            break;
        }

        if file.name().is_empty() {
            error!(key = %file.key(), "file does not have a file name");
            worker.skipped += 1;
            context.file_done();
            continue;
        }
        let Some(mapped) = renamed.get(file.key()) else {
            error!(key = %file.key(), "file is missing from the renamed mapping");
            worker.skipped += 1;
            context.file_done();
            continue;
        };

        let read = match reader.read_file(file, &mut pool, flags) {
            Ok(read) => read,
            Err(e) if e.is_recoverable() => {
                warn!(key = %file.key(), path = file.full_path(), "skipping file: {e}");
                worker.skipped += 1;
                context.file_done();
                continue;
            }
            Err(e) => return Err(e),
        };

        debug!(key = %file.key(), to = %mapped.file_name, size = read.size(), "unpacking file");
        write_atomically(&chunks.join(relative_path(&mapped.file_name)?), read.body())?;
        worker.processed += 1;
        context.file_done();
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use std::path::Path;

    use pretty_assertions::assert_eq;

    use crate::unpack::{part_path, write_atomically};

    #[test]
    fn part_path_appends_extension() {
        assert_eq!(
            part_path(Path::new("chunks/tex/a.dds")),
            Path::new("chunks/tex/a.dds.part")
        );
        assert_eq!(
            part_path(Path::new("chunks/a.dds_1")),
            Path::new("chunks/a.dds_1.part")
        );
    }

    #[test]
    fn atomic_write_leaves_no_part_file() -> crate::error::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("a.bin");

        write_atomically(&path, b"body")?;
        assert_eq!(std::fs::read(&path)?, b"body");
        assert!(!part_path(&path).exists());

        Ok(())
    }
}
