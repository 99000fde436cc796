//! Classification of task outcomes observed in worker processes.
//!
//! A worker never sends a live error value back to the parent. It reports
//! one of three outcomes: success, cancellation, or a failure described by
//! an [`ExceptionEnvelope`] of plain strings.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, TaskError};
use crate::value::Value;

/// Serializable description of a task failure in a worker process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionEnvelope {
    kind_name: String,
    message: String,
    formatted_context: String,
}

impl ExceptionEnvelope {
    pub const PANIC: &'static str = "Panic";
    pub const TRANSFER: &'static str = "TransferError";
    pub const UNKNOWN_TASK: &'static str = "UnknownTask";

    pub fn new(
        kind_name: impl Into<String>,
        message: impl Into<String>,
        formatted_context: impl Into<String>,
    ) -> Self {
        Self {
            kind_name: kind_name.into(),
            message: message.into(),
            formatted_context: formatted_context.into(),
        }
    }

    /// Capture `kind`/`message` raised while running `task` with `args`.
    pub fn capture(task: &str, args: &str, kind: &str, message: &str) -> Self {
        let formatted_context = format!(
            "Worker process {} failed while running `{}{}`\n{}\n{}: {}",
            std::process::id(),
            task,
            args,
            "-".repeat(72),
            kind,
            message
        );
        Self::new(kind, message, formatted_context)
    }

    pub fn kind_name(&self) -> &str {
        &self.kind_name
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Human-readable context: where the failure happened and on which call.
    pub fn formatted_context(&self) -> &str {
        &self.formatted_context
    }
}

impl fmt::Display for ExceptionEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind_name, self.message)?;
        if f.alternate() && !self.formatted_context.is_empty() {
            write!(f, "\n{}", self.formatted_context)?;
        }
        Ok(())
    }
}

/// Terminal classification of one call unit run in a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UnitOutcome {
    Success(Value),
    /// The worker observed a cancellation signal.
    Cancelled { message: String },
    Failed(ExceptionEnvelope),
}

impl UnitOutcome {
    /// Classify a task result inside the worker.
    ///
    /// Interrupts take priority over any other classification.
    pub fn from_task_result(
        task: &str,
        args: &str,
        result: std::result::Result<Value, TaskError>,
    ) -> Self {
        match result {
            Ok(value) => UnitOutcome::Success(value),
            Err(e) if e.is_interrupt() => UnitOutcome::Cancelled {
                message: e.message().to_string(),
            },
            Err(e) => {
                UnitOutcome::Failed(ExceptionEnvelope::capture(task, args, e.kind(), e.message()))
            }
        }
    }

    /// Rebuild the caller-side result.
    pub fn into_result(self) -> Result<Value> {
        match self {
            UnitOutcome::Success(value) => Ok(value),
            UnitOutcome::Cancelled { message } => Err(Error::WorkerInterrupt(message)),
            UnitOutcome::Failed(envelope) => Err(Error::Remote(envelope)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_is_classified() {
        let outcome = UnitOutcome::from_task_result(
            "division",
            "(1, 0)",
            Err(TaskError::zero_division("division by zero")),
        );
        let err = outcome.into_result().unwrap_err();

        let envelope = err.envelope().expect("remote failure");
        assert_eq!(envelope.kind_name(), "ZeroDivisionError");
        assert_eq!(envelope.message(), "division by zero");
        assert!(envelope.formatted_context().contains("`division(1, 0)`"));
        assert!(envelope.formatted_context().ends_with("ZeroDivisionError: division by zero"));
    }

    #[test]
    fn test_interrupt_wins() {
        let outcome =
            UnitOutcome::from_task_result("stop", "()", Err(TaskError::interrupted("ctrl-c")));
        assert_eq!(
            outcome,
            UnitOutcome::Cancelled {
                message: "ctrl-c".to_string()
            }
        );
        let err = outcome.into_result().unwrap_err();
        assert!(matches!(err, Error::WorkerInterrupt(_)));
        assert!(err.envelope().is_none());
    }

    #[test]
    fn test_display_alternate_includes_context() {
        let envelope = ExceptionEnvelope::new("ValueError", "bad", "ctx line");
        assert_eq!(envelope.to_string(), "ValueError: bad");
        assert_eq!(format!("{:#}", envelope), "ValueError: bad\nctx line");
    }

    #[test]
    fn test_outcome_survives_the_wire() {
        let outcome = UnitOutcome::Failed(ExceptionEnvelope::new("ValueError", "bad", "ctx"));
        let bytes = bincode::serialize(&outcome).unwrap();
        let decoded: UnitOutcome = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, outcome);
    }
}
