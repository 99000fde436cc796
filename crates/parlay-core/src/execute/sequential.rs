//! In-process sequential backend.
//!
//! Runs each unit inside `submit`, in the calling thread, with its arguments
//! as-is. Task errors come back untouched.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::call::{Callable, CallUnit, TaskRegistry};
use crate::error::{Error, Result};
use crate::value::Value;

use super::Completed;

/// Backend that executes units immediately in the calling thread.
pub struct SequentialBackend {
    registry: Arc<TaskRegistry>,
    ready: VecDeque<Completed>,
}

impl SequentialBackend {
    pub fn new(registry: Arc<TaskRegistry>) -> Self {
        Self {
            registry,
            ready: VecDeque::new(),
        }
    }

    /// Run `unit` now; its result is returned by the next [`next_completion`].
    ///
    /// Fails only if a named task is not registered.
    ///
    /// [`next_completion`]: SequentialBackend::next_completion
    pub fn submit(&mut self, index: usize, unit: CallUnit) -> Result<()> {
        let result = self.run(&unit)?;
        self.ready.push_back(Completed { index, result });
        Ok(())
    }

    fn run(&self, unit: &CallUnit) -> Result<Result<Value>> {
        let func = match unit.callable() {
            Callable::Named(name) => self
                .registry
                .get(name)
                .ok_or_else(|| Error::UnknownTask(name.clone()))?,
            Callable::Local { func, .. } => func,
        };
        Ok(func(unit.call_args()).map_err(Error::Task))
    }

    pub fn next_completion(&mut self) -> Option<Completed> {
        self.ready.pop_front()
    }
}
