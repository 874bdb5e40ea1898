//! Packing a loaded bigfile, usually an unpacked directory, back into a single container
//!

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crc::{Crc, CRC_32_ISO_HDLC};
use tracing::{debug, error, info, instrument, warn, Dispatch};

use crate::archive::{BigFile, LoadedBigFile};
use crate::buffers::BufferPool;
use crate::compression::{encode_stored, write_frame, CompressionMethod};
use crate::diagnostics::{PackDiagnostics, WorkerDiagnostics};
use crate::error::{Error, FileNotFoundError, Result};
use crate::metadata::Metadata;
use crate::options::PackOptions;
use crate::reader::{FileReader, PackedReader, ReadFlags};
use crate::tree::FileEntry;
use crate::types::{FileKey, OFFSET_ALIGNMENT, OFFSET_UNLINKED};
use crate::workers::{run_partitions, ProgressFn, WorkerContext};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Where a worker put one file inside its partition
#[derive(Debug, Clone, Copy)]
struct Placement {
    key: FileKey,
    /// Byte offset inside the partition, `None` when the file has no payload
    offset: Option<u64>,
    size: u32,
    compression: CompressionMethod,
    crc: u32,
}

/// What one worker produced
#[derive(Debug)]
struct Partition {
    path: PathBuf,
    len: u64,
    placements: Vec<Placement>,
}

/// Pack engine
///
/// Workers frame (and optionally deflate) their share of the files into temporary partition files. The
/// container is then assembled next to its final path, moved into place and read back before anything is
/// deleted.
pub struct Packer<'a> {
    bigfile: &'a BigFile,
    dispatch: Dispatch,
    progress: Option<Box<ProgressFn<'static>>>,
}

impl<'a> Packer<'a> {
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

    /// Receive `(completed, total)` after every file, packed or skipped
    pub fn with_progress(mut self, progress: impl Fn(usize, usize) + Send + Sync + 'static) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    /// Pack into `options.output_path()`
    pub fn pack(&self, options: &PackOptions) -> Result<PackDiagnostics> {
        tracing::dispatcher::with_default(&self.dispatch, || self.run(options))
    }

    #[instrument(skip_all, fields(output = %options.output_path().display()), err)]
    fn run(&self, options: &PackOptions) -> Result<PackDiagnostics> {
        let loaded = self.bigfile.require_loaded()?;
        let output = options.output_path();
        let mut diagnostics = PackDiagnostics::default();
        fs::create_dir_all(&options.directory)?;

        let compression = CompressionMethod::from(options.compress);
        let files = loaded.tree.walk_files();

        info!("packing {} files...", files.len());
        let started = Instant::now();
        let result = run_partitions(
            "pack",
            &self.dispatch,
            options.threads,
            &files,
            &options.cancel,
            self.progress.as_deref(),
            |files, context, worker| {
                let path = partition_path(&output, worker.worker);
                let mut reader = self.bigfile.reader_for(&loaded)?;
                pack_files(reader.as_mut(), files, &path, compression, context, worker)
            },
        );
        diagnostics.files = started.elapsed();

        let partitions = match result {
            Ok((workers, partitions)) => {
                diagnostics.workers = workers;
                partitions
            }
            Err(e) => {
                remove_partitions(&output, options.threads);
                return Err(e);
            }
        };

        diagnostics.cancelled = options.cancel.is_cancelled();
        if diagnostics.cancelled {
            warn!("pack cancelled, nothing written");
            remove_partitions(&output, options.threads);
            return Ok(diagnostics);
        }

        let started = Instant::now();
        let assembled = assemble(&loaded, &partitions, &output);
        remove_partitions(&output, options.threads);
        let placements = assembled?;
        diagnostics.assemble = started.elapsed();

        let started = Instant::now();
        verify(&output, &loaded, &placements)?;
        diagnostics.verify = started.elapsed();
        diagnostics.output = Some(output.clone());

        if options.delete_chunks {
            if let Some(chunks) = self.bigfile.chunks_dir() {
                info!(path = %chunks.display(), "deleting unpacked files");
                fs::remove_dir_all(chunks)?;
            }
        }

        info!(
            processed = diagnostics.processed(),
            skipped = diagnostics.skipped(),
            "pack complete in {:.3}s",
            (diagnostics.files + diagnostics.assemble + diagnostics.verify).as_secs_f64()
        );
        Ok(diagnostics)
    }
}

fn sibling(output: &Path, suffix: &str) -> PathBuf {
    let mut path = output.as_os_str().to_owned();
    path.push(suffix);
    PathBuf::from(path)
}

fn partition_path(output: &Path, worker: usize) -> PathBuf {
    sibling(output, &format!(".part{worker}"))
}

fn remove_partitions(output: &Path, threads: usize) {
    for worker in 0..threads.max(1) {
        let _ = fs::remove_file(partition_path(output, worker));
    }
}

fn pack_files(
    reader: &mut dyn FileReader,
    files: &[Arc<FileEntry>],
    path: &Path,
    compression: CompressionMethod,
    context: &WorkerContext,
    worker: &mut WorkerDiagnostics,
) -> Result<Partition> {
    let mut pool = BufferPool::new();
    let mut out = BufWriter::new(File::create(path)?);
    let mut len = 0u64;
    let mut placements = Vec::with_capacity(files.len());

    for file in files {
        if context.should_stop() {
            debug!(worker = worker.worker, "stopping early");
            break;
        }

        let unlinked = Placement {
            key: file.key(),
            offset: None,
            size: 0,
            compression: CompressionMethod::None,
            crc: 0,
        };

        if file.is_unlinked() {
            placements.push(unlinked);
            worker.processed += 1;
            context.file_done();
            continue;
        }

        let read = match reader.read_file(file, &mut pool, ReadFlags { decompress: true }) {
            Ok(read) => read,
            Err(Error::FileNotFound(e)) => {
                warn!(path = file.full_path(), "{e}, packing it without payload");
                placements.push(unlinked);
                worker.skipped += 1;
                context.file_done();
                continue;
            }
            Err(e) if e.is_recoverable() => {
                error!(path = file.full_path(), "couldn't read file, packing it without payload: {e}");
                placements.push(unlinked);
                worker.skipped += 1;
                context.file_done();
                continue;
            }
            Err(e) => return Err(e),
        };

        let body = read.body();
        let stored = encode_stored(body, compression)?;
        let written = write_frame(&mut out, &stored, body.len() as u32, compression)?;
        debug!(key = %file.key(), offset = len, size = body.len(), "packed file");

        placements.push(Placement {
            key: file.key(),
            offset: Some(len),
            size: body.len() as u32,
            compression,
            crc: CRC32.checksum(body),
        });
        len += written;
        worker.processed += 1;
        context.file_done();
    }

    out.flush()?;
    Ok(Partition {
        path: path.to_owned(),
        len,
        placements,
    })
}

/// Write the container to a temporary path and move it over `output`
#[instrument(skip_all, err)]
fn assemble(
    loaded: &LoadedBigFile,
    partitions: &[Partition],
    output: &Path,
) -> Result<HashMap<FileKey, Placement>> {
    let mut placements = HashMap::with_capacity(loaded.mapping.len());
    let mut base = 0u64;
    for partition in partitions {
        for placement in &partition.placements {
            let mut placement = *placement;
            placement.offset = placement.offset.map(|offset| base + offset);
            placements.insert(placement.key, placement);
        }
        base += partition.len;
    }

    let files = loaded
        .mapping
        .entries()
        .map(|entry| match placements.get(&entry.key()) {
            Some(Placement {
                offset: Some(offset),
                size,
                compression,
                ..
            }) => {
                let offset = i32::try_from(offset / OFFSET_ALIGNMENT).map_err(|_| {
                    Error::CustomError("payload segment too large for offsets".into())
                })?;
                entry.to_record(offset, *size, *compression)
            }
            _ => entry.to_record(OFFSET_UNLINKED, 0, CompressionMethod::None),
        })
        .collect::<Result<Vec<_>>>()?;

    let metadata = Metadata::new(
        loaded.metadata.header,
        files,
        loaded.metadata.folders.clone(),
    );

    let temporary = sibling(output, ".tmp");
    let written = (|| -> Result<()> {
        let mut out = BufWriter::new(File::create(&temporary)?);
        metadata.write(&mut out)?;
        for partition in partitions {
            let mut input = BufReader::new(File::open(&partition.path)?);
            io::copy(&mut input, &mut out)?;
        }
        out.flush()?;
        Ok(())
    })();

    if let Err(e) = written.and_then(|_| Ok(fs::rename(&temporary, output)?)) {
        let _ = fs::remove_file(&temporary);
        return Err(e);
    }

    info!(files = metadata.files.len(), "wrote {}", output.display());
    Ok(placements)
}

/// Re-open the written container and check every payload
#[instrument(skip_all, err)]
fn verify(output: &Path, loaded: &LoadedBigFile, placements: &HashMap<FileKey, Placement>) -> Result<()> {
    let bigfile = BigFile::open_packed(output);
    bigfile.load_from_disk()?;
    let written = bigfile.require_loaded()?;
    let mapping = &written.mapping;
    if mapping.len() != loaded.mapping.len() {
        return Err(Error::Verification(format!(
            "expected {} files, found {}",
            loaded.mapping.len(),
            mapping.len()
        )));
    }

    let mut reader = PackedReader::open(output, written.metadata.data_offset())?;
    let mut pool = BufferPool::new();
    for file in mapping.files_list() {
        let Some(placement) = placements.get(&file.key()) else {
            return Err(Error::Verification(format!("unexpected file {}", file.key())));
        };
        if placement.offset.is_none() {
            continue;
        }

        let read = match reader.read_file(file, &mut pool, ReadFlags { decompress: true }) {
            Ok(read) => read,
            Err(Error::FileNotFound(FileNotFoundError::Unlinked(key))) => {
                return Err(Error::Verification(format!("{key} lost its payload")))
            }
            Err(e) => return Err(e),
        };
        if CRC32.checksum(read.body()) != placement.crc {
            return Err(Error::Verification(format!(
                "checksum mismatch for {}",
                file.key()
            )));
        }
    }

    debug!(files = mapping.len(), "verified");
    Ok(())
}

#[cfg(test)]
mod test {
    use std::path::Path;

    use pretty_assertions::assert_eq;

    use crate::pack::{partition_path, sibling};

    #[test]
    fn temporary_paths_sit_next_to_the_output() {
        let output = Path::new("out/Yeti.big");
        assert_eq!(sibling(output, ".tmp"), Path::new("out/Yeti.big.tmp"));
        assert_eq!(partition_path(output, 3), Path::new("out/Yeti.big.part3"));
    }
}
