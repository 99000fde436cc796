//! Process-pool backend.
//!
//! Units are promoted and encoded on the calling thread, so anything that
//! prevents a unit from being sent fails synchronously in `submit`. Results
//! come back asynchronously from the worker pool and are classified there.

use std::sync::Arc;

use crate::call::{Callable, CallUnit};
use crate::error::{Error, Result};
use crate::ipc::protocol::{self, CallPayload, WorkerCommand};
use crate::ipc::{Job, WorkerPool, WorkerSpec};
use crate::mmap::{Promoter, ScratchArena};

use super::Completed;

/// Backend that runs units on a fixed pool of worker processes.
pub struct PooledBackend {
    pool: WorkerPool,
    arena: Arc<ScratchArena>,
    max_nbytes: Option<usize>,
}

impl PooledBackend {
    /// Spawn `workers` processes. Promoted arrays go to `arena`.
    pub fn spawn(
        spec: &WorkerSpec,
        workers: usize,
        arena: Arc<ScratchArena>,
        max_nbytes: Option<usize>,
    ) -> Result<Self> {
        Ok(Self {
            pool: WorkerPool::spawn(spec, workers)?,
            arena,
            max_nbytes,
        })
    }

    pub fn workers(&self) -> usize {
        self.pool.size()
    }

    /// Prepare `unit` for transfer and queue it.
    pub fn submit(&mut self, index: usize, unit: CallUnit) -> Result<()> {
        let frame = self.prepare(index, unit)?;
        self.pool.submit(Job { index, frame })
    }

    /// Promote and encode a unit into a `Run` frame.
    fn prepare(&self, index: usize, unit: CallUnit) -> Result<Vec<u8>> {
        let task = match unit.callable() {
            Callable::Named(name) => name.clone(),
            Callable::Local { label, .. } => {
                return Err(Error::Transfer(format!(
                    "task `{}` is an in-process closure and cannot be sent to a worker process",
                    label
                )));
            }
        };

        let unit = Promoter::new(&self.arena, self.max_nbytes).promote_unit(unit)?;
        let (_, args) = unit.into_parts();
        let payload = CallPayload {
            task,
            args: args.args,
            kwargs: args.kwargs,
        };

        let transfer = |e: Error| Error::Transfer(format!("cannot send unit {}: {}", index, e));
        let payload = protocol::encode(&payload).map_err(transfer)?;
        protocol::encode_frame(&WorkerCommand::Run {
            index: index as u64,
            payload,
        })
        .map_err(transfer)
    }

    /// Block until a queued unit completes.
    pub fn next_completion(&mut self) -> Result<Completed> {
        let completion = self.pool.recv_completion()?;
        Ok(Completed {
            index: completion.index,
            result: completion.outcome.and_then(|outcome| outcome.into_result()),
        })
    }

    /// Wait for queued units to finish and stop the workers.
    pub fn shutdown(&mut self) {
        self.pool.shutdown();
    }
}
