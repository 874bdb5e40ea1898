//! Timing and progress reports of unpack and pack runs

use std::path::PathBuf;
use std::time::Duration;

use tracing::info;

/// What one worker did with its partition
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerDiagnostics {
    /// Index of the worker
    pub worker: usize,
    /// Index of the first file of the partition in the ordered file list
    pub start: usize,
    /// Number of files in the partition
    pub count: usize,
    /// Wall time spent by the worker
    pub elapsed: Duration,
    /// Files that were written
    pub processed: usize,
    /// Files that were logged and skipped
    pub skipped: usize,
}

/// Log the per-worker table once every worker has joined
pub(crate) fn log_worker_table(operation: &str, workers: &[WorkerDiagnostics]) {
    info!("{operation} time taken:");
    info!(
        "{:>8} {:>10} {:>8} {:>8} {:>10} {:>8}",
        "Worker", "Time", "Index", "Count", "Processed", "Skipped"
    );
    for worker in workers {
        info!(
            "{:>8} {:>9.3}s {:>8} {:>8} {:>10} {:>8}",
            worker.worker,
            worker.elapsed.as_secs_f64(),
            worker.start,
            worker.count,
            worker.processed,
            worker.skipped
        );
    }
}

/// Report of an unpack run
#[derive(Debug, Clone, Default)]
pub struct UnpackDiagnostics {
    /// Time to write the metadata side-car file
    pub metadata: Duration,
    /// Time to create the folder tree
    pub directories: Duration,
    /// Time to build and save the rename mapping
    pub mapping: Duration,
    /// Time from spawning the workers to the join
    pub files: Duration,
    /// One entry per worker, ordered by worker index
    pub workers: Vec<WorkerDiagnostics>,
    /// Whether the run stopped early on request
    pub cancelled: bool,
}

impl UnpackDiagnostics {
    /// Files written by every worker
    pub fn processed(&self) -> usize {
        self.workers.iter().map(|w| w.processed).sum()
    }

    /// Files skipped by every worker
    pub fn skipped(&self) -> usize {
        self.workers.iter().map(|w| w.skipped).sum()
    }
}

/// Report of a pack run
#[derive(Debug, Clone, Default)]
pub struct PackDiagnostics {
    /// Time from spawning the workers to the join
    pub files: Duration,
    /// Time to assemble the container from the partitions
    pub assemble: Duration,
    /// Time to verify the written container
    pub verify: Duration,
    /// One entry per worker, ordered by worker index
    pub workers: Vec<WorkerDiagnostics>,
    /// Whether the run stopped early on request
    pub cancelled: bool,
    /// The container that was written, `None` when cancelled
    pub output: Option<PathBuf>,
}

impl PackDiagnostics {
    /// Files written by every worker
    pub fn processed(&self) -> usize {
        self.workers.iter().map(|w| w.processed).sum()
    }

    /// Files skipped by every worker
    pub fn skipped(&self) -> usize {
        self.workers.iter().map(|w| w.skipped).sum()
    }
}
