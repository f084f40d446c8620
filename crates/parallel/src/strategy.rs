//! Chunk execution on a bounded worker pool

use std::collections::BTreeMap;

use crossbeam_channel::unbounded;
use tracing::{debug, info};

use crate::chunk::Chunk;
use crate::context::JobContext;
use crate::error::{ParallelError, Result};

/// How chunks are executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessingMode {
    /// On the calling thread, in chunk order
    Sequential,
    /// Parallel processing using all available cores
    #[default]
    Parallel,
    /// Parallel with specified number of threads
    ParallelWith(usize),
}

impl ProcessingMode {
    /// `Sequential` for one worker, `ParallelWith(n)` otherwise
    pub fn for_workers(workers: usize) -> Self {
        match workers {
            0 | 1 => ProcessingMode::Sequential,
            n => ProcessingMode::ParallelWith(n),
        }
    }

    fn build_pool(&self) -> Result<Option<rayon::ThreadPool>> {
        let threads = match self {
            ProcessingMode::Sequential => return Ok(None),
            ProcessingMode::Parallel => num_cpus(),
            ProcessingMode::ParallelWith(n) => (*n).max(1),
        };
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("polystat-worker-{}", i))
            .build()
            .map(Some)
            .map_err(|e| ParallelError::ThreadPool(e.to_string()))
    }
}

/// Outcome of [`ChunkRunner::run`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSummary {
    /// Chunks whose work ran to completion
    pub completed: usize,
    /// Chunks never started because the job was cancelled
    pub skipped: usize,
    pub cancelled: bool,
}

/// Runs chunks on worker threads and hands results to a single
/// coordinator in chunk order.
///
/// Workers check the [`JobContext`] before starting each chunk: they wait
/// while it is paused and skip the chunk once it is cancelled. Results come
/// back over a channel; the coordinator (the calling thread) buffers them
/// and calls `merge` in ascending chunk index, so the output order never
/// depends on scheduling.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChunkRunner {
    mode: ProcessingMode,
}

enum Message<T> {
    Done(usize, T),
    Skipped(usize),
}

impl ChunkRunner {
    pub fn new(mode: ProcessingMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> ProcessingMode {
        self.mode
    }

    /// Run `work` for every chunk in `chunks` and `merge` the results.
    ///
    /// `merge` is called on the calling thread only.
    pub fn run<T, W, M>(
        &self,
        chunks: &[Chunk],
        context: &JobContext,
        work: W,
        mut merge: M,
    ) -> Result<RunSummary>
    where
        T: Send,
        W: Fn(&Chunk) -> T + Sync,
        M: FnMut(&Chunk, T),
    {
        let pool = self.build_pool_logged(chunks.len())?;
        let mut summary = RunSummary::default();

        let Some(pool) = pool else {
            for chunk in chunks {
                if !context.checkpoint() {
                    summary.skipped += 1;
                    continue;
                }
                let result = work(chunk);
                summary.completed += 1;
                merge(chunk, result);
            }
            summary.cancelled = context.is_cancelled();
            return Ok(summary);
        };

        let (tx, rx) = unbounded::<Message<T>>();
        let work = &work;
        pool.in_place_scope(|scope| {
            for (pos, chunk) in chunks.iter().enumerate() {
                let tx = tx.clone();
                scope.spawn(move |_| {
                    let message = if context.checkpoint() {
                        Message::Done(pos, work(chunk))
                    } else {
                        Message::Skipped(pos)
                    };
                    // The coordinator outlives every worker
                    let _ = tx.send(message);
                });
            }
            drop(tx);

            // Reorder buffer: release results strictly by position
            let mut pending: BTreeMap<usize, Option<T>> = BTreeMap::new();
            let mut next = 0;
            for message in rx.iter() {
                match message {
                    Message::Done(pos, result) => {
                        summary.completed += 1;
                        pending.insert(pos, Some(result));
                    }
                    Message::Skipped(pos) => {
                        summary.skipped += 1;
                        pending.insert(pos, None);
                    }
                }
                while let Some(slot) = pending.remove(&next) {
                    if let Some(result) = slot {
                        merge(&chunks[next], result);
                    }
                    next += 1;
                }
            }
        });

        summary.cancelled = context.is_cancelled();
        debug!(?summary, "chunk run finished");
        Ok(summary)
    }

    fn build_pool_logged(&self, chunks: usize) -> Result<Option<rayon::ThreadPool>> {
        let pool = self.mode.build_pool()?;
        info!(
            chunks,
            workers = pool.as_ref().map(|p| p.current_num_threads()).unwrap_or(1),
            "dispatching chunks"
        );
        Ok(pool)
    }
}

/// Get the number of available CPU cores
pub fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
