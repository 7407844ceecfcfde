use rayon::prelude::*;

use crate::error::VirmetError;

/// Fixed-size pool of workers used for every fan-out in the pipeline
/// (quality filtering per shard, homology search per shard, archive
/// conversion per alignment).
///
/// Each call to [`WorkerPool::run`] blocks until every task has finished;
/// results are returned in task order and the first error, if any, is
/// returned after all workers have completed.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        Self { workers: workers.max(1) }
    }
    /// Pool sized to the available parallelism, capped at `limit`.
    pub fn bounded(limit: usize) -> Self {
        Self::new(available_parallelism().min(limit))
    }
    pub fn workers(&self) -> usize {
        self.workers
    }
    pub fn run<T, R, F>(&self, tasks: Vec<T>, worker: F) -> Result<Vec<R>, VirmetError>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> Result<R, VirmetError> + Sync + Send,
    {
        if tasks.is_empty() {
            return Ok(Vec::new());
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()?;

        let results: Vec<Result<R, VirmetError>> = pool.install(|| {
            tasks.into_par_iter().map(|task| worker(task)).collect()
        });

        results.into_iter().collect()
    }
}

/// Number of logical processors, falling back to two when it cannot be
/// determined.
pub fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
}
