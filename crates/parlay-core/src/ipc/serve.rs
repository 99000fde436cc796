//! Request loop run inside worker processes.
//!
//! A worker executable builds its [`TaskRegistry`] and hands it to
//! [`serve`]. The loop answers `Ping`, runs `Run` commands one at a time and
//! exits on `Shutdown` or when the parent closes stdin.

use std::io::{BufReader, BufWriter, Read, Write};
use std::panic::{AssertUnwindSafe, catch_unwind};

use crate::call::{CallArgs, TaskRegistry};
use crate::error::Result;
use crate::execute::{ExceptionEnvelope, UnitOutcome};

use super::protocol::{
    CallPayload, WorkerCommand, WorkerResponse, decode, read_message_opt, write_message,
};

/// Serve commands on this process's stdin/stdout.
///
/// On unix, the original stdout is reserved for protocol frames and file
/// descriptor 1 is redirected to stderr, so tasks that print cannot corrupt
/// the stream.
pub fn serve(registry: &TaskRegistry) -> Result<()> {
    let input = BufReader::new(std::io::stdin().lock());
    let output = BufWriter::new(protocol_stdout()?);
    serve_io(registry, input, output)
}

#[cfg(unix)]
fn protocol_stdout() -> Result<std::fs::File> {
    use std::os::fd::FromRawFd;

    std::io::stdout().flush()?;
    // SAFETY: plain descriptor duplication; the duplicate is owned by the
    // returned File and fd 1 stays valid (now pointing at stderr). The
    // duplicate is close-on-exec so workers spawned by nested dispatch do
    // not hold the parent's pipe open.
    unsafe {
        let fd = libc::fcntl(libc::STDOUT_FILENO, libc::F_DUPFD_CLOEXEC, 0);
        if fd < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        if libc::dup2(libc::STDERR_FILENO, libc::STDOUT_FILENO) < 0 {
            let err = std::io::Error::last_os_error();
            libc::close(fd);
            return Err(err.into());
        }
        Ok(std::fs::File::from_raw_fd(fd))
    }
}

#[cfg(not(unix))]
fn protocol_stdout() -> Result<std::io::Stdout> {
    Ok(std::io::stdout())
}

/// Serve commands read from `input`, writing responses to `output`.
pub fn serve_io<R: Read, W: Write>(
    registry: &TaskRegistry,
    mut input: R,
    mut output: W,
) -> Result<()> {
    tracing::debug!("Worker {} serving {} tasks", std::process::id(), registry.len());

    while let Some(command) = read_message_opt::<_, WorkerCommand>(&mut input)? {
        match command {
            WorkerCommand::Ping => write_message(&mut output, &WorkerResponse::Pong)?,
            WorkerCommand::Run { index, payload } => {
                let outcome = run_payload(registry, &payload);
                write_message(&mut output, &WorkerResponse::Done { index, outcome })?;
            }
            WorkerCommand::Shutdown => {
                write_message(&mut output, &WorkerResponse::ShuttingDown)?;
                return Ok(());
            }
        }
    }

    tracing::debug!("Parent closed the command stream");
    Ok(())
}

/// Decode and run one payload, classifying whatever happens.
pub fn run_payload(registry: &TaskRegistry, payload: &[u8]) -> UnitOutcome {
    let payload: CallPayload = match decode(payload) {
        Ok(p) => p,
        Err(e) => {
            return UnitOutcome::Failed(ExceptionEnvelope::capture(
                "<undecodable>",
                "",
                ExceptionEnvelope::TRANSFER,
                &e.to_string(),
            ));
        }
    };

    let args = CallArgs::new(payload.args, payload.kwargs);
    let summary = args.summary();

    let Some(func) = registry.get(&payload.task) else {
        return UnitOutcome::Failed(ExceptionEnvelope::capture(
            &payload.task,
            &summary,
            ExceptionEnvelope::UNKNOWN_TASK,
            &format!("no task named `{}` in this worker", payload.task),
        ));
    };

    match catch_unwind(AssertUnwindSafe(|| func(&args))) {
        Ok(result) => UnitOutcome::from_task_result(&payload.task, &summary, result),
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            UnitOutcome::Failed(ExceptionEnvelope::capture(
                &payload.task,
                &summary,
                ExceptionEnvelope::PANIC,
                &message,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use crate::ipc::protocol::{encode, read_message};
    use crate::value::Value;
    use std::collections::BTreeMap;
    use std::io::Cursor;

    fn registry() -> TaskRegistry {
        let mut registry = TaskRegistry::new();
        registry
            .register("square", |a| Ok(Value::Int(a.int(0)?.pow(2))))
            .register("division", |a| {
                let y = a.int(1)?;
                if y == 0 {
                    return Err(TaskError::zero_division("division by zero"));
                }
                Ok(Value::Float(a.int(0)? as f64 / y as f64))
            })
            .register("boom", |_| panic!("kaboom"));
        registry
    }

    fn payload(task: &str, args: Vec<Value>) -> Vec<u8> {
        encode(&CallPayload {
            task: task.to_string(),
            args,
            kwargs: BTreeMap::new(),
        })
        .unwrap()
    }

    #[test]
    fn test_session() {
        let mut input = Vec::new();
        write_message(&mut input, &WorkerCommand::Ping).unwrap();
        write_message(
            &mut input,
            &WorkerCommand::Run {
                index: 3,
                payload: payload("square", vec![Value::Int(5)]),
            },
        )
        .unwrap();
        write_message(&mut input, &WorkerCommand::Shutdown).unwrap();

        let mut output = Vec::new();
        serve_io(&registry(), Cursor::new(input), &mut output).unwrap();

        let mut cursor = Cursor::new(output);
        assert!(matches!(read_message(&mut cursor).unwrap(), WorkerResponse::Pong));
        match read_message(&mut cursor).unwrap() {
            WorkerResponse::Done { index, outcome } => {
                assert_eq!(index, 3);
                assert_eq!(outcome, UnitOutcome::Success(Value::Int(25)));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(read_message(&mut cursor).unwrap(), WorkerResponse::ShuttingDown));
    }

    #[test]
    fn test_task_error_is_enveloped() {
        let division = payload("division", vec![Value::Int(1), Value::Int(0)]);
        let outcome = run_payload(&registry(), &division);
        match outcome {
            UnitOutcome::Failed(envelope) => {
                assert_eq!(envelope.kind_name(), "ZeroDivisionError");
                assert!(envelope.formatted_context().contains("division(1, 0)"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_panic_is_enveloped() {
        let outcome = run_payload(&registry(), &payload("boom", vec![]));
        match outcome {
            UnitOutcome::Failed(envelope) => {
                assert_eq!(envelope.kind_name(), ExceptionEnvelope::PANIC);
                assert_eq!(envelope.message(), "kaboom");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unknown_task_and_garbage_payload() {
        let outcome = run_payload(&registry(), &payload("cube", vec![Value::Int(2)]));
        assert!(matches!(
            outcome,
            UnitOutcome::Failed(ref e) if e.kind_name() == ExceptionEnvelope::UNKNOWN_TASK
        ));

        let outcome = run_payload(&registry(), &[0xff, 0xff, 0xff]);
        assert!(matches!(
            outcome,
            UnitOutcome::Failed(ref e) if e.kind_name() == ExceptionEnvelope::TRANSFER
        ));
    }

    #[test]
    fn test_closed_input_ends_loop() {
        let mut output = Vec::new();
        serve_io(&registry(), Cursor::new(Vec::new()), &mut output).unwrap();
        assert!(output.is_empty());
    }
}
