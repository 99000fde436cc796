//! Worker-count resolution.

/// Number of CPUs this process may use; at least 1.
pub fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Backend selected by a requested worker count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerCount {
    /// Run in the calling thread.
    Sequential,
    /// Run on this many worker processes (always at least 2).
    Pooled(usize),
}

impl WorkerCount {
    /// Resolve `n_jobs` against `available` CPUs.
    ///
    /// `0` and `1` are sequential; `-k` requests `max(1, available - k + 1)`.
    /// A resolved count of one worker runs sequentially.
    pub fn resolve(n_jobs: i64, available: usize) -> Self {
        let workers = if n_jobs < 0 {
            (available as i64).saturating_add(1).saturating_add(n_jobs).max(1) as usize
        } else {
            n_jobs as usize
        };
        if workers <= 1 {
            WorkerCount::Sequential
        } else {
            WorkerCount::Pooled(workers)
        }
    }

    /// Resolve against this machine's CPUs.
    pub fn detect(n_jobs: i64) -> Self {
        Self::resolve(n_jobs, available_parallelism())
    }

    pub fn workers(self) -> usize {
        match self {
            WorkerCount::Sequential => 1,
            WorkerCount::Pooled(n) => n,
        }
    }
}
