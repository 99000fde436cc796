//! Error types for parlay-core.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::execute::ExceptionEnvelope;

/// Result type for parlay-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while dispatching call units.
#[derive(Debug, Error)]
pub enum Error {
    /// The input sequence failed while producing a call unit.
    #[error("input error: {0}")]
    Input(String),

    /// A call unit could not be prepared for transfer to a worker process.
    #[error("transfer error: {0}")]
    Transfer(String),

    /// A named task is not present in the registry.
    #[error("unknown task: {0}")]
    UnknownTask(String),

    /// Invalid dispatcher configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A task failed while running in the calling process.
    ///
    /// The task's own error is carried through untouched.
    #[error(transparent)]
    Task(#[from] TaskError),

    /// A task failed inside a worker process.
    #[error("{0}")]
    Remote(ExceptionEnvelope),

    /// A worker was interrupted while running a task.
    #[error("worker interrupted: {0}")]
    WorkerInterrupt(String),

    /// Failed to create or open a memory-mapped buffer.
    #[error("mapping error: {0}")]
    Mapping(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// IPC communication error with worker process.
    #[error("IPC error: {0}")]
    Ipc(String),
}

impl Error {
    /// Wrap a failure raised by a lazy input producer.
    pub fn input(err: impl fmt::Display) -> Self {
        Self::Input(err.to_string())
    }

    /// Whether this error stands for an interrupted task, in either backend.
    pub fn is_cancellation(&self) -> bool {
        match self {
            Self::WorkerInterrupt(_) => true,
            Self::Task(e) => e.is_interrupt(),
            _ => false,
        }
    }

    /// The remote envelope, when the failure crossed a process boundary.
    pub fn envelope(&self) -> Option<&ExceptionEnvelope> {
        match self {
            Self::Remote(envelope) => Some(envelope),
            _ => None,
        }
    }
}

/// Failure raised by a task callable.
///
/// `kind` plays the role of an exception class name; it is what a parent
/// process sees when the task ran in a worker.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct TaskError {
    kind: String,
    message: String,
    interrupt: bool,
}

impl TaskError {
    pub const ZERO_DIVISION: &'static str = "ZeroDivisionError";
    pub const VALUE: &'static str = "ValueError";
    pub const TYPE: &'static str = "TypeError";
    pub const KEY: &'static str = "KeyError";
    pub const INTERRUPT: &'static str = "KeyboardInterrupt";

    /// Create an error of the given kind.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            interrupt: false,
        }
    }

    /// A cancellation signal observed by the task.
    pub fn interrupted(message: impl Into<String>) -> Self {
        Self {
            kind: Self::INTERRUPT.to_string(),
            message: message.into(),
            interrupt: true,
        }
    }

    pub fn zero_division(message: impl Into<String>) -> Self {
        Self::new(Self::ZERO_DIVISION, message)
    }

    pub fn value(message: impl Into<String>) -> Self {
        Self::new(Self::VALUE, message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(Self::TYPE, message)
    }

    pub fn missing_key(key: &str) -> Self {
        Self::new(Self::KEY, format!("missing argument `{}`", key))
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_interrupt(&self) -> bool {
        self.interrupt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_error_display() {
        let err = TaskError::zero_division("division by zero");
        assert_eq!(err.to_string(), "ZeroDivisionError: division by zero");
        assert!(!err.is_interrupt());
    }

    #[test]
    fn test_task_error_is_transparent() {
        let err: Error = TaskError::value("bad input").into();
        assert_eq!(err.to_string(), "ValueError: bad input");
        assert!(matches!(err, Error::Task(ref e) if e.kind() == TaskError::VALUE));
    }

    #[test]
    fn test_cancellation_detection() {
        assert!(Error::WorkerInterrupt("sigint".into()).is_cancellation());
        assert!(Error::Task(TaskError::interrupted("stop")).is_cancellation());
        assert!(!Error::Task(TaskError::value("x")).is_cancellation());
        assert!(!Error::Transfer("x".into()).is_cancellation());
    }
}
