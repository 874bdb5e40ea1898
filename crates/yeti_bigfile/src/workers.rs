//! Fixed size worker pool shared by the unpack and pack engines
//!
//! The ordered file list is cut into one contiguous range per worker. Every worker runs on its own thread of a
//! dedicated rayon pool, under the dispatch of the engine that started it, and the summary is only produced once
//! the scope has joined.

use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, error, info, Dispatch};

use crate::diagnostics::{log_worker_table, WorkerDiagnostics};
use crate::error::{Error, Result};
use crate::options::CancelToken;

/// Callback receiving `(completed, total)` after every file
pub type ProgressFn<'a> = dyn Fn(usize, usize) + Send + Sync + 'a;

/// Split `len` items into `threads` ranges of `len / threads`, the remainder going to the last range
pub fn partitions(len: usize, threads: usize) -> Vec<Range<usize>> {
    let threads = threads.max(1);
    let base = len / threads;
    let remainder = len % threads;

    (0..threads)
        .map(|i| {
            let start = i * base;
            let count = if i + 1 == threads { base + remainder } else { base };
            start..start + count
        })
        .collect()
}

/// Shared view of a run handed to every worker
pub(crate) struct WorkerContext<'a> {
    cancel: &'a CancelToken,
    abort: &'a AtomicBool,
    completed: &'a AtomicUsize,
    total: usize,
    progress: Option<&'a ProgressFn<'a>>,
}

impl WorkerContext<'_> {
    /// Whether the worker should stop before its next file
    pub fn should_stop(&self) -> bool {
        self.cancel.is_cancelled() || self.abort.load(Ordering::SeqCst)
    }

    /// Count one more finished file
    pub fn file_done(&self) {
        let completed = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(progress) = self.progress {
            progress(completed, self.total);
        }
    }
}

/// Run `work` over `items`, one partition per worker, and collect what every worker returns
///
/// The first fatal error stops every other worker before its next file and is returned as
/// [`Error::RunAborted`] together with the diagnostics of all workers.
pub(crate) fn run_partitions<T, O, F>(
    operation: &str,
    dispatch: &Dispatch,
    threads: usize,
    items: &[T],
    cancel: &CancelToken,
    progress: Option<&ProgressFn<'_>>,
    work: F,
) -> Result<(Vec<WorkerDiagnostics>, Vec<O>)>
where
    T: Sync,
    O: Send,
    F: Fn(&[T], &WorkerContext, &mut WorkerDiagnostics) -> Result<O> + Sync,
{
    let ranges = partitions(items.len(), threads);
    info!(
        "divided {} files into {} partitions of {} with {} left over",
        items.len(),
        ranges.len(),
        items.len() / ranges.len(),
        items.len() % ranges.len()
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(ranges.len())
        .thread_name(|i| format!("yeti-worker-{i}"))
        .build()?;

    let abort = AtomicBool::new(false);
    let completed = AtomicUsize::new(0);
    let failure: Mutex<Option<Error>> = Mutex::new(None);
    let finished: Mutex<Vec<(WorkerDiagnostics, Option<O>)>> = Mutex::new(Vec::new());

    let context = WorkerContext {
        cancel,
        abort: &abort,
        completed: &completed,
        total: items.len(),
        progress,
    };

    pool.scope(|scope| {
        for (worker, range) in ranges.into_iter().enumerate() {
            let work = &work;
            let context = &context;
            let abort = &abort;
            let failure = &failure;
            let finished = &finished;
            let slice = &items[range.clone()];

            scope.spawn(move |_| {
                tracing::dispatcher::with_default(dispatch, || {
                    let started = Instant::now();
                    let mut diagnostics = WorkerDiagnostics {
                        worker,
                        start: range.start,
                        count: range.len(),
                        ..Default::default()
                    };
                    debug!(worker, start = range.start, count = range.len(), "worker started");

                    let output = match work(slice, context, &mut diagnostics) {
                        Ok(output) => Some(output),
                        Err(e) => {
                            error!(worker, "worker stopped: {e}");
                            abort.store(true, Ordering::SeqCst);
                            failure.lock().get_or_insert(e);
                            None
                        }
                    };

                    diagnostics.elapsed = started.elapsed();
                    debug!(worker, "worker finished");
                    finished.lock().push((diagnostics, output));
                });
            });
        }
    });

    let mut finished = finished.into_inner();
    finished.sort_by_key(|(diagnostics, _)| diagnostics.worker);
    let (workers, outputs): (Vec<_>, Vec<_>) = finished.into_iter().unzip();

    log_worker_table(operation, &workers);

    if let Some(source) = failure.into_inner() {
        return Err(Error::RunAborted {
            workers,
            source: Box::new(source),
        });
    }

    Ok((workers, outputs.into_iter().flatten().collect()))
}
