//! The dispatch loop.
//!
//! Pulls call units lazily from an input sequence, keeps at most a bounded
//! number of them outstanding on the backend, and re-sequences results by
//! input position. The first failure stops the pull; units already in flight
//! drain and their results are discarded.

use std::sync::Arc;
use std::time::Instant;

use crate::call::{CallUnit, TaskRegistry};
use crate::config::{ParallelConfig, PreDispatch};
use crate::error::{Error, Result};
use crate::execute::{Backend, Completed};
use crate::mmap::ScratchArena;
use crate::parallelism::WorkerCount;
use crate::progress::{DispatchCallback, ProgressLogger};
use crate::value::Value;

/// Backpressure window: the number of submitted, not yet completed units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchWindow {
    outstanding: usize,
    limit: Option<usize>,
}

impl DispatchWindow {
    /// `None` means unbounded.
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            outstanding: 0,
            limit,
        }
    }

    pub fn has_room(&self) -> bool {
        self.limit.is_none_or(|limit| self.outstanding < limit)
    }

    pub fn acquire(&mut self) {
        debug_assert!(self.has_room(), "dispatch window overflow");
        self.outstanding += 1;
    }

    pub fn release(&mut self) {
        self.outstanding = self.outstanding.saturating_sub(1);
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }
}

/// Runs sequences of call units against a registry.
pub struct Dispatcher {
    config: ParallelConfig,
    registry: Arc<TaskRegistry>,
    arena: Option<Arc<ScratchArena>>,
    callbacks: Vec<Box<dyn DispatchCallback>>,
}

impl Dispatcher {
    /// Create a dispatcher. A [`ProgressLogger`] is attached when
    /// `config.verbose > 0`.
    pub fn new(config: ParallelConfig, registry: Arc<TaskRegistry>) -> Self {
        let mut callbacks: Vec<Box<dyn DispatchCallback>> = Vec::new();
        if config.verbose > 0 {
            callbacks.push(Box::new(ProgressLogger::new(config.verbose, config.n_jobs)));
        }
        Self {
            config,
            registry,
            arena: None,
            callbacks,
        }
    }

    /// Add a progress observer.
    pub fn with_callback(mut self, callback: impl DispatchCallback + 'static) -> Self {
        self.callbacks.push(Box::new(callback));
        self
    }

    /// Promote arrays into `arena` instead of a per-invocation scratch
    /// directory. The arena outlives every invocation that uses it.
    pub fn with_arena(mut self, arena: Arc<ScratchArena>) -> Self {
        self.arena = Some(arena);
        self
    }

    pub fn config(&self) -> &ParallelConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Run `name` once per input, each input as the single positional argument.
    pub fn execute_map<I, V>(&self, name: &str, inputs: I) -> Result<Vec<Value>>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.execute(
            inputs
                .into_iter()
                .map(|input| Ok(CallUnit::named(name).arg(input))),
        )
    }

    /// Run infallibly produced units.
    pub fn execute_all<I>(&self, units: I) -> Result<Vec<Value>>
    where
        I: IntoIterator<Item = CallUnit>,
    {
        self.execute(units.into_iter().map(Ok))
    }

    /// Run every unit produced by `units` and return results in input order.
    ///
    /// An `Err` produced by `units` is returned as-is. Otherwise the first
    /// failing unit's error is returned and no results are.
    pub fn execute<I>(&self, units: I) -> Result<Vec<Value>>
    where
        I: IntoIterator<Item = Result<CallUnit>>,
    {
        let start = Instant::now();
        let count = WorkerCount::detect(self.config.n_jobs);
        let limit = self.config.pre_dispatch.limit(count.workers())?;

        let mut backend = Backend::select(count, &self.config, Arc::clone(&self.registry), || {
            self.scratch_arena()
        })?;
        // Sequential units complete inside submit.
        let limit = if backend.is_sequential() { Some(1) } else { limit };

        tracing::debug!(
            "Dispatching with {} backend ({} workers, window {:?})",
            backend.name(),
            backend.workers(),
            limit
        );
        for cb in &self.callbacks {
            cb.on_started(backend.name(), backend.workers(), limit);
        }

        let window = DispatchWindow::new(limit);
        let outcome = self.run_loop(&mut backend, units.into_iter(), window, start);
        backend.shutdown();

        // Failures were already reported through on_failed.
        if let Ok(values) = &outcome {
            for cb in &self.callbacks {
                cb.on_finished(values.len(), start.elapsed());
            }
        }
        outcome
    }

    fn run_loop<I>(
        &self,
        backend: &mut Backend,
        mut input: I,
        mut window: DispatchWindow,
        start: Instant,
    ) -> Result<Vec<Value>>
    where
        I: Iterator<Item = Result<CallUnit>>,
    {
        let mut results: Vec<Option<Value>> = Vec::new();
        let mut failure: Option<Error> = None;
        let mut exhausted = false;
        let mut completed = 0usize;

        loop {
            while failure.is_none() && !exhausted && window.has_room() {
                let index = results.len();
                match input.next() {
                    None => exhausted = true,
                    Some(Err(e)) => {
                        self.notify_failed(index, &e);
                        failure = Some(e);
                    }
                    Some(Ok(unit)) => {
                        results.push(None);
                        for cb in &self.callbacks {
                            cb.on_dispatched(index, unit.callable().label());
                        }
                        match backend.submit(index, unit) {
                            Ok(()) => window.acquire(),
                            Err(e) => {
                                self.notify_failed(index, &e);
                                failure = Some(e);
                            }
                        }
                    }
                }
            }

            if window.outstanding() == 0 {
                break;
            }

            let Completed { index, result } = match backend.next_completion() {
                Ok(done) => done,
                Err(e) => {
                    // The pool is gone; nothing else will complete.
                    tracing::error!("Lost the worker pool: {}", e);
                    failure.get_or_insert(e);
                    break;
                }
            };
            window.release();

            match result {
                Ok(value) if failure.is_none() => {
                    completed += 1;
                    if let Some(slot) = results.get_mut(index) {
                        *slot = Some(value);
                    }
                    for cb in &self.callbacks {
                        cb.on_completed(index, completed, start.elapsed());
                    }
                }
                Ok(_) => tracing::debug!("Discarding result of unit {} after failure", index),
                Err(e) => {
                    self.notify_failed(index, &e);
                    if failure.is_none() {
                        failure = Some(e);
                    }
                }
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }
        results
            .into_iter()
            .enumerate()
            .map(|(index, value)| {
                value.ok_or_else(|| Error::Ipc(format!("unit {} produced no result", index)))
            })
            .collect()
    }

    fn notify_failed(&self, index: usize, error: &Error) {
        tracing::debug!("Unit {} failed: {}", index, error);
        for cb in &self.callbacks {
            cb.on_failed(index, error);
        }
    }

    fn scratch_arena(&self) -> Result<Arc<ScratchArena>> {
        if let Some(arena) = &self.arena {
            return Ok(Arc::clone(arena));
        }
        let arena = match &self.config.temp_folder {
            Some(folder) => ScratchArena::in_folder(folder)?,
            None => ScratchArena::new()?,
        };
        Ok(Arc::new(arena))
    }
}

/// Run `units` against `registry` with `worker_count` workers.
///
/// Environment overrides from [`ParallelConfig::from_env`] apply.
pub fn execute<I>(
    registry: Arc<TaskRegistry>,
    units: I,
    worker_count: i64,
    pre_dispatch: PreDispatch,
    verbosity: u32,
) -> Result<Vec<Value>>
where
    I: IntoIterator<Item = Result<CallUnit>>,
{
    let config = ParallelConfig::from_env()?
        .n_jobs(worker_count)
        .pre_dispatch(pre_dispatch)
        .verbose(verbosity);
    Dispatcher::new(config, registry).execute(units)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::error::TaskError;

    fn registry() -> Arc<TaskRegistry> {
        let mut registry = TaskRegistry::new();
        registry
            .register("square", |a| {
                let x = a.int(0)?;
                Ok(Value::Int(x * x))
            })
            .register("division", |a| {
                let (x, y) = (a.int(0)?, a.int(1)?);
                if y == 0 {
                    return Err(TaskError::zero_division("division by zero"));
                }
                Ok(Value::Int(x / y))
            });
        Arc::new(registry)
    }

    fn sequential() -> Dispatcher {
        Dispatcher::new(ParallelConfig::default().n_jobs(1), registry())
    }

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<String>>>);

    impl Recorder {
        fn push(&self, event: String) {
            self.0.lock().unwrap().push(event);
        }

        fn events(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    impl DispatchCallback for Recorder {
        fn on_dispatched(&self, index: usize, _task: &str) {
            self.push(format!("Dispatched {}", index));
        }

        fn on_completed(&self, index: usize, _completed: usize, _elapsed: Duration) {
            self.push(format!("Completed {}", index));
        }

        fn on_failed(&self, index: usize, _error: &Error) {
            self.push(format!("Failed {}", index));
        }

        fn on_finished(&self, completed: usize, _elapsed: Duration) {
            self.push(format!("Finished {}", completed));
        }
    }

    #[test]
    fn test_window_bounds() {
        let mut window = DispatchWindow::new(Some(2));
        assert!(window.has_room());
        window.acquire();
        window.acquire();
        assert!(!window.has_room());
        window.release();
        assert!(window.has_room());
        assert_eq!(window.outstanding(), 1);

        let unbounded = DispatchWindow::new(None);
        assert!(unbounded.has_room());
    }

    #[test]
    fn test_execute_map_in_order() {
        let results = sequential().execute_map("square", 0..10i64).unwrap();
        let expected: Vec<Value> = (0..10i64).map(|x| Value::Int(x * x)).collect();
        assert_eq!(results, expected);
    }

    #[test]
    fn test_empty_input() {
        let results = sequential().execute_all(Vec::new()).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_sequential_alternates() {
        let recorder = Recorder::default();
        let dispatcher = sequential().with_callback(recorder.clone());
        dispatcher.execute_map("square", 0..3i64).unwrap();

        assert_eq!(
            recorder.events(),
            vec![
                "Dispatched 0",
                "Completed 0",
                "Dispatched 1",
                "Completed 1",
                "Dispatched 2",
                "Completed 2",
                "Finished 3",
            ]
        );
    }

    #[test]
    fn test_task_error_is_unwrapped_and_stops_input() {
        let pulled = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&pulled);
        let units = [(6i64, 3i64), (1, 0), (4, 2), (9, 3)]
            .into_iter()
            .map(move |(x, y)| {
                *counter.lock().unwrap() += 1;
                Ok(CallUnit::named("division").arg(x).arg(y))
            });

        let recorder = Recorder::default();
        let err = sequential()
            .with_callback(recorder.clone())
            .execute(units)
            .unwrap_err();
        match err {
            Error::Task(e) => assert_eq!(e.kind(), TaskError::ZERO_DIVISION),
            other => panic!("expected task error, got {:?}", other),
        }
        assert_eq!(*pulled.lock().unwrap(), 2);
        assert_eq!(
            recorder.events(),
            vec!["Dispatched 0", "Completed 0", "Dispatched 1", "Failed 1"]
        );
    }

    #[test]
    fn test_input_error_is_unwrapped() {
        let units = (0..5i64).map(|x| {
            if x == 3 {
                Err(Error::input("producer broke at 3"))
            } else {
                Ok(CallUnit::named("square").arg(x))
            }
        });

        let err = sequential().execute(units).unwrap_err();
        assert!(matches!(err, Error::Input(ref msg) if msg == "producer broke at 3"));
    }

    #[test]
    fn test_unknown_task_is_dispatch_error() {
        let err = sequential().execute_map("cube", 0..3i64).unwrap_err();
        assert!(matches!(err, Error::UnknownTask(ref name) if name == "cube"));
    }

    #[test]
    fn test_zero_pre_dispatch_is_rejected() {
        let dispatcher = Dispatcher::new(
            ParallelConfig::default().n_jobs(1).pre_dispatch(0usize),
            registry(),
        );
        let err = dispatcher.execute_map("square", 0..3i64).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_local_closures_run_sequentially() {
        let units = (1..4i64).map(|x| {
            Ok(CallUnit::local("triple", |a| Ok(Value::Int(a.int(0)? * 3))).arg(x))
        });
        let results = sequential().execute(units).unwrap();
        assert_eq!(results, vec![Value::Int(3), Value::Int(6), Value::Int(9)]);
    }

    #[test]
    fn test_free_execute() {
        let units = (0..4i64).map(|x| Ok(CallUnit::named("square").arg(x)));
        let results = execute(registry(), units, 0, PreDispatch::All, 0).unwrap();
        assert_eq!(results.len(), 4);
        assert_eq!(results[3], Value::Int(9));
    }
}
