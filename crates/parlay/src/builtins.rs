//! Tasks served by the `parlay-worker` executable.
//!
//! A parent process can only dispatch named tasks that its workers also
//! know, so both sides build their registry from [`registry`].

use std::collections::BTreeMap;
use std::time::Duration;

use parlay_core::{
    Array, CallArgs, Error, ParallelConfig, Record, TaskError, TaskRegistry, Value,
};

/// Registry with every built-in task.
pub fn registry() -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    registry
        .register("square", square)
        .register("division", division)
        .register("power_sum", power_sum)
        .register("raise_on", raise_on)
        .register("interrupt", interrupt)
        .register("sleep_echo", sleep_echo)
        .register("panic", panic_task)
        .register("describe_arrays", describe_arrays)
        .register("array_sum", array_sum)
        .register("exit_process", exit_process)
        .register("nested_square", nested_square);
    registry
}

/// `x * x`, keeping integers integral.
fn square(args: &CallArgs) -> Result<Value, TaskError> {
    match args.get(0)? {
        Value::Int(x) => x
            .checked_mul(*x)
            .map(Value::Int)
            .ok_or_else(|| overflow(format!("{} squared overflows", x))),
        _ => {
            let x = args.float(0)?;
            Ok(Value::Float(x * x))
        }
    }
}

/// `x / y` as a float.
fn division(args: &CallArgs) -> Result<Value, TaskError> {
    let (x, y) = (args.float(0)?, args.float(1)?);
    if y == 0.0 {
        return Err(TaskError::zero_division("division by zero"));
    }
    Ok(Value::Float(x / y))
}

/// `x^2 + y + z` with `y` and `z` defaulting to zero.
fn power_sum(args: &CallArgs) -> Result<Value, TaskError> {
    let x = args.int(0)?;
    let y = args.int_or(1, "y", 0)?;
    let z = args.int_or(2, "z", 0)?;
    x.checked_mul(x)
        .and_then(|sq| sq.checked_add(y))
        .and_then(|sum| sum.checked_add(z))
        .map(Value::Int)
        .ok_or_else(|| overflow(format!("{}^2 + {} + {} overflows", x, y, z)))
}

fn overflow(message: String) -> TaskError {
    TaskError::new("OverflowError", message)
}

/// Echo `x`, failing with a `ValueError` when it equals `bad` (7 by default).
fn raise_on(args: &CallArgs) -> Result<Value, TaskError> {
    let x = args.int(0)?;
    let bad = args.int_or(1, "bad", 7)?;
    if x == bad {
        return Err(TaskError::value(format!("refusing to process {}", x)));
    }
    Ok(Value::Int(x))
}

/// Sleep, then report an interruption.
fn interrupt(args: &CallArgs) -> Result<Value, TaskError> {
    let delay = args.int_or(0, "delay_ms", 0)?;
    std::thread::sleep(Duration::from_millis(delay.max(0) as u64));
    Err(TaskError::interrupted("interrupted by task"))
}

/// Sleep `ms` milliseconds, then return `x` unchanged.
fn sleep_echo(args: &CallArgs) -> Result<Value, TaskError> {
    let x = args.get(0)?.clone();
    let ms = args.int_or(1, "ms", 0)?;
    std::thread::sleep(Duration::from_millis(ms.max(0) as u64));
    Ok(x)
}

fn panic_task(args: &CallArgs) -> Result<Value, TaskError> {
    let message = args
        .param(0, "msg")
        .and_then(Value::as_str)
        .unwrap_or("task panicked")
        .to_string();
    panic!("{}", message);
}

/// Describe every array reachable from the arguments.
///
/// Returns one `ArrayInfo` record per array, in argument order, each with
/// its location (`args[0]`, `kwargs.d`, `args[2].c`, ...), whether it is
/// mapped, its handle fields when mapped, and the sum of its elements.
fn describe_arrays(args: &CallArgs) -> Result<Value, TaskError> {
    let mut found = Vec::new();
    for (i, value) in args.args.iter().enumerate() {
        collect_arrays(value, format!("args[{}]", i), &mut found);
    }
    for (name, value) in &args.kwargs {
        collect_arrays(value, format!("kwargs.{}", name), &mut found);
    }
    Ok(Value::List(
        found
            .into_iter()
            .map(|(location, array)| Value::Record(array_info(location, array)))
            .collect(),
    ))
}

fn collect_arrays<'a>(value: &'a Value, location: String, found: &mut Vec<(String, &'a Array)>) {
    match value {
        Value::Array(array) => found.push((location, array)),
        Value::List(items) => {
            for (i, item) in items.iter().enumerate() {
                collect_arrays(item, format!("{}[{}]", location, i), found);
            }
        }
        Value::Map(entries) => collect_in_map(entries, &location, found),
        Value::Record(record) => collect_in_map(&record.attrs, &location, found),
        _ => {}
    }
}

fn collect_in_map<'a>(
    entries: &'a BTreeMap<String, Value>,
    location: &str,
    found: &mut Vec<(String, &'a Array)>,
) {
    for (name, item) in entries {
        collect_arrays(item, format!("{}.{}", location, name), found);
    }
}

fn array_info(location: String, array: &Array) -> Record {
    let shape: Vec<Value> = array.shape().iter().map(|&d| Value::from(d)).collect();
    let mut info = Record::new("ArrayInfo")
        .with("location", location)
        .with("mapped", array.is_mapped())
        .with("dtype", array.element_type().name())
        .with("shape", Value::List(shape))
        .with("order", array.order().code().to_string())
        .with("sum", array.sum());
    if let Some(handle) = array.handle() {
        info = info
            .with("path", handle.backing_path.display().to_string())
            .with("mode", handle.access_mode.code())
            .with("offset", handle.byte_offset);
    }
    info
}

/// Sum of the elements of array `a`.
fn array_sum(args: &CallArgs) -> Result<Value, TaskError> {
    let value = args.param(0, "a").ok_or_else(|| TaskError::missing_key("a"))?;
    let array = value.as_array().ok_or_else(|| {
        TaskError::type_error(format!("expected array, got {}", value.type_name()))
    })?;
    Ok(Value::Float(array.sum()))
}

/// Terminate the worker process with `code`.
fn exit_process(args: &CallArgs) -> Result<Value, TaskError> {
    let code = args.int_or(0, "code", 1)?;
    std::process::exit(code as i32);
}

/// Squares of `0..n`, computed by a nested two-worker pool.
fn nested_square(args: &CallArgs) -> Result<Value, TaskError> {
    let n = args.int_or(0, "n", 0)?;
    let results = crate::dispatcher(ParallelConfig::default().n_jobs(2))
        .execute_map("square", 0..n)
        .map_err(nested_failure)?;
    Ok(Value::List(results))
}

/// Surface a nested invocation's failure as this task's own.
fn nested_failure(err: Error) -> TaskError {
    match err {
        Error::Task(e) => e,
        Error::Remote(envelope) => TaskError::new(envelope.kind_name(), envelope.message()),
        Error::WorkerInterrupt(message) => TaskError::interrupted(message),
        other => TaskError::new("ParallelError", other.to_string()),
    }
}
