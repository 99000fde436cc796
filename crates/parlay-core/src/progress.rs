//! Progress reporting for dispatch invocations.

use std::time::Duration;

use crate::error::Error;

/// Callback trait for dispatch progress reporting.
///
/// Every method has an empty default so observers only implement what they
/// need.
pub trait DispatchCallback: Send {
    /// Called once the backend is ready.
    fn on_started(&self, _backend: &str, _workers: usize, _window: Option<usize>) {}

    /// Called right before unit `index` is submitted.
    fn on_dispatched(&self, _index: usize, _task: &str) {}

    /// Called when unit `index` completes successfully.
    fn on_completed(&self, _index: usize, _completed: usize, _elapsed: Duration) {}

    /// Called when unit `index` fails, or when producing or submitting it fails.
    fn on_failed(&self, _index: usize, _error: &Error) {}

    /// Called when the invocation returns its results. Not called after a
    /// failure.
    fn on_finished(&self, _completed: usize, _elapsed: Duration) {}
}

/// Logs progress through `tracing` at a rate set by `verbosity`.
///
/// Verbosity 0 is silent. Levels 1 to 10 log every `2^(10 - verbosity)`
/// completions; above 10 every completion is logged.
#[derive(Debug, Clone)]
pub struct ProgressLogger {
    verbosity: u32,
    label: String,
}

impl ProgressLogger {
    pub fn new(verbosity: u32, n_jobs: i64) -> Self {
        Self {
            verbosity,
            label: format!("Parallel(n_jobs={})", n_jobs),
        }
    }

    /// Whether the `completed`-th completion should be logged.
    pub fn should_log(&self, completed: usize) -> bool {
        match self.verbosity {
            0 => false,
            v if v > 10 => true,
            v => completed % (1usize << (10 - v)) == 0,
        }
    }
}

impl DispatchCallback for ProgressLogger {
    fn on_started(&self, backend: &str, workers: usize, window: Option<usize>) {
        if self.verbosity > 0 {
            let window = window.map_or("all".to_string(), |w| w.to_string());
            tracing::info!(
                "[{}]: Using {} backend with {} workers, pre-dispatch {}",
                self.label,
                backend,
                workers,
                window
            );
        }
    }

    fn on_completed(&self, _index: usize, completed: usize, elapsed: Duration) {
        if self.should_log(completed) {
            tracing::info!(
                "[{}]: Done {:>4} jobs | elapsed: {:>8.1}s",
                self.label,
                completed,
                elapsed.as_secs_f64()
            );
        }
    }

    fn on_failed(&self, index: usize, error: &Error) {
        if self.verbosity > 0 {
            tracing::warn!("[{}]: Unit {} failed: {}", self.label, index, error);
        }
    }

    fn on_finished(&self, completed: usize, elapsed: Duration) {
        if self.verbosity > 0 {
            tracing::info!(
                "[{}]: Done {:>4} out of {:>4} | elapsed: {:>8.1}s finished",
                self.label,
                completed,
                completed,
                elapsed.as_secs_f64()
            );
        }
    }
}
