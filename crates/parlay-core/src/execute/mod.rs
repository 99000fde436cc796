//! Execution backends for call units.
//!
//! # Backends
//!
//! - **Sequential** - Runs each unit in the calling thread as soon as it is
//!   submitted. No serialization, no promotion; task errors are returned
//!   exactly as the task raised them.
//! - **Pooled** - Runs units on a fixed pool of worker processes. Arguments
//!   are promoted and encoded before submission; failures come back as
//!   classified outcomes.
//!
//! # Architecture
//!
//! ```text
//! Dispatcher
//!     │
//!     └── Backend (chosen once per invocation)
//!             │
//!             ├── SequentialBackend ── TaskRegistry lookup → call
//!             │
//!             └── PooledBackend
//!                     │
//!                     ├── Promoter (arrays → ArrayHandle)
//!                     ├── encode CallPayload → Run frame
//!                     └── WorkerPool
//!                             ├── pump thread ─ worker process (serve loop)
//!                             └── completions → UnitOutcome → Result
//! ```
//!
//! # Module Structure
//!
//! - `envelope` - `ExceptionEnvelope` and `UnitOutcome` classification
//! - `pooled` - `PooledBackend` over worker processes
//! - `sequential` - `SequentialBackend` in the calling thread

mod envelope;
mod pooled;
mod sequential;

use std::sync::Arc;

pub use envelope::{ExceptionEnvelope, UnitOutcome};
pub use pooled::PooledBackend;
pub use sequential::SequentialBackend;

use crate::call::{CallUnit, TaskRegistry};
use crate::config::ParallelConfig;
use crate::error::{Error, Result};
use crate::mmap::ScratchArena;
use crate::parallelism::WorkerCount;
use crate::value::Value;

/// A finished unit: its input position and its result.
#[derive(Debug)]
pub struct Completed {
    pub index: usize,
    pub result: Result<Value>,
}

/// Backend chosen for one dispatch invocation.
pub enum Backend {
    Sequential(SequentialBackend),
    Pooled(PooledBackend),
}

impl Backend {
    /// Pick the backend for `count`.
    ///
    /// `arena` is only needed, and only called, for the pooled backend.
    pub fn select(
        count: WorkerCount,
        config: &ParallelConfig,
        registry: Arc<TaskRegistry>,
        arena: impl FnOnce() -> Result<Arc<ScratchArena>>,
    ) -> Result<Self> {
        match count {
            WorkerCount::Sequential => Ok(Backend::Sequential(SequentialBackend::new(registry))),
            WorkerCount::Pooled(workers) => Ok(Backend::Pooled(PooledBackend::spawn(
                &config.worker,
                workers,
                arena()?,
                config.max_nbytes,
            )?)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Backend::Sequential(_) => "sequential",
            Backend::Pooled(_) => "pooled",
        }
    }

    pub fn workers(&self) -> usize {
        match self {
            Backend::Sequential(_) => 1,
            Backend::Pooled(p) => p.workers(),
        }
    }

    pub fn is_sequential(&self) -> bool {
        matches!(self, Backend::Sequential(_))
    }

    /// Hand a unit to the backend. Errors here are dispatch-time errors.
    pub fn submit(&mut self, index: usize, unit: CallUnit) -> Result<()> {
        match self {
            Backend::Sequential(b) => b.submit(index, unit),
            Backend::Pooled(b) => b.submit(index, unit),
        }
    }

    /// Wait for the next completed unit.
    pub fn next_completion(&mut self) -> Result<Completed> {
        match self {
            Backend::Sequential(b) => b
                .next_completion()
                .ok_or_else(|| Error::Ipc("no unit is in flight".to_string())),
            Backend::Pooled(b) => b.next_completion(),
        }
    }

    pub fn shutdown(&mut self) {
        if let Backend::Pooled(b) = self {
            b.shutdown();
        }
    }
}
