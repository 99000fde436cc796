//! Call units and the task registry.
//!
//! A [`CallUnit`] packages a function reference with its positional and
//! keyword arguments. Function references that must cross a process boundary
//! are names resolved in a [`TaskRegistry`] on both sides; closures can only
//! run in the calling process.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::TaskError;
use crate::value::Value;

/// Signature shared by every task callable.
pub type TaskFn = Arc<dyn Fn(&CallArgs) -> Result<Value, TaskError> + Send + Sync>;

/// The function a call unit invokes.
#[derive(Clone)]
pub enum Callable {
    /// A task registered under this name; transferable to worker processes.
    Named(String),
    /// An in-process closure. Runs sequentially, cannot be transferred.
    Local { label: String, func: TaskFn },
}

impl Callable {
    /// Name used in logs and diagnostics.
    pub fn label(&self) -> &str {
        match self {
            Callable::Named(name) => name,
            Callable::Local { label, .. } => label,
        }
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callable::Named(name) => f.debug_tuple("Named").field(name).finish(),
            Callable::Local { label, .. } => f.debug_tuple("Local").field(label).finish(),
        }
    }
}

/// Positional and keyword arguments of a call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CallArgs {
    pub args: Vec<Value>,
    pub kwargs: BTreeMap<String, Value>,
}

impl CallArgs {
    pub fn new(args: Vec<Value>, kwargs: BTreeMap<String, Value>) -> Self {
        Self { args, kwargs }
    }

    /// Positional argument `index`.
    pub fn get(&self, index: usize) -> Result<&Value, TaskError> {
        self.args.get(index).ok_or_else(|| {
            TaskError::type_error(format!(
                "missing positional argument {} (got {})",
                index,
                self.args.len()
            ))
        })
    }

    pub fn kwarg(&self, name: &str) -> Option<&Value> {
        self.kwargs.get(name)
    }

    /// Parameter given either positionally at `index` or by keyword `name`.
    pub fn param(&self, index: usize, name: &str) -> Option<&Value> {
        self.args.get(index).or_else(|| self.kwargs.get(name))
    }

    pub fn int(&self, index: usize) -> Result<i64, TaskError> {
        let value = self.get(index)?;
        value.as_int().ok_or_else(|| expected("int", index, value))
    }

    pub fn float(&self, index: usize) -> Result<f64, TaskError> {
        let value = self.get(index)?;
        value.as_float().ok_or_else(|| expected("float", index, value))
    }

    /// Integer parameter with a default, positional or keyword.
    pub fn int_or(&self, index: usize, name: &str, default: i64) -> Result<i64, TaskError> {
        match self.param(index, name) {
            None => Ok(default),
            Some(value) => value.as_int().ok_or_else(|| expected("int", index, value)),
        }
    }

    /// Every argument value: positional first, then keyword in name order.
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.args.iter().chain(self.kwargs.values())
    }

    /// Compact rendering for diagnostics, e.g. `(1, 0, y=2)`.
    pub fn summary(&self) -> String {
        let mut parts: Vec<String> = self.args.iter().map(Value::summary).collect();
        parts.extend(
            self.kwargs
                .iter()
                .map(|(k, v)| format!("{}={}", k, v.summary())),
        );
        format!("({})", parts.join(", "))
    }
}

fn expected(type_name: &str, index: usize, got: &Value) -> TaskError {
    TaskError::type_error(format!(
        "argument {} must be {}, got {}",
        index,
        type_name,
        got.type_name()
    ))
}

/// A packaged function call waiting to be executed.
///
/// Built once with the builder methods, then consumed by a backend.
#[derive(Debug, Clone)]
pub struct CallUnit {
    callable: Callable,
    args: CallArgs,
}

impl CallUnit {
    /// Call the registered task `name`.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            callable: Callable::Named(name.into()),
            args: CallArgs::default(),
        }
    }

    /// Call an in-process closure.
    pub fn local<F>(label: impl Into<String>, func: F) -> Self
    where
        F: Fn(&CallArgs) -> Result<Value, TaskError> + Send + Sync + 'static,
    {
        Self {
            callable: Callable::Local {
                label: label.into(),
                func: Arc::new(func),
            },
            args: CallArgs::default(),
        }
    }

    /// Append a positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.args.push(value.into());
        self
    }

    /// Append several positional arguments.
    pub fn args<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.args.args.extend(values.into_iter().map(Into::into));
        self
    }

    /// Set a keyword argument.
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.kwargs.insert(name.into(), value.into());
        self
    }

    pub fn callable(&self) -> &Callable {
        &self.callable
    }

    pub fn call_args(&self) -> &CallArgs {
        &self.args
    }

    pub fn into_parts(self) -> (Callable, CallArgs) {
        (self.callable, self.args)
    }

    pub fn from_parts(callable: Callable, args: CallArgs) -> Self {
        Self { callable, args }
    }
}

/// Named task callables.
///
/// The parent process and every worker executable must register the same
/// names for pooled execution to find them.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: FxHashMap<String, TaskFn>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `func` under `name`, replacing any previous entry.
    pub fn register<F>(&mut self, name: impl Into<String>, func: F) -> &mut Self
    where
        F: Fn(&CallArgs) -> Result<Value, TaskError> + Send + Sync + 'static,
    {
        self.tasks.insert(name.into(), Arc::new(func));
        self
    }

    pub fn get(&self, name: &str) -> Option<&TaskFn> {
        self.tasks.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tasks.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_collects_arguments() {
        let unit = CallUnit::named("power_sum").arg(3i64).kwarg("y", 1i64);

        assert_eq!(unit.callable().label(), "power_sum");
        assert_eq!(unit.call_args().args, vec![Value::Int(3)]);
        assert_eq!(unit.call_args().kwarg("y"), Some(&Value::Int(1)));
        assert_eq!(unit.call_args().summary(), "(3, y=1)");
    }

    #[test]
    fn test_param_prefers_positional() {
        let args = CallArgs::new(
            vec![Value::Int(1), Value::Int(2)],
            BTreeMap::from([("y".to_string(), Value::Int(9))]),
        );
        assert_eq!(args.int_or(1, "y", 0).unwrap(), 2);
        assert_eq!(args.int_or(2, "z", 5).unwrap(), 5);

        let only_kw = CallArgs::new(
            vec![Value::Int(1)],
            BTreeMap::from([("y".to_string(), Value::Int(9))]),
        );
        assert_eq!(only_kw.int_or(1, "y", 0).unwrap(), 9);
    }

    #[test]
    fn test_typed_accessors_report_type_errors() {
        let args = CallArgs::new(vec![Value::Str("x".into())], BTreeMap::new());
        let err = args.int(0).unwrap_err();
        assert_eq!(err.kind(), TaskError::TYPE);
        assert!(err.message().contains("got str"));

        let err = args.int(3).unwrap_err();
        assert!(err.message().contains("missing positional argument 3"));
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = TaskRegistry::new();
        registry
            .register("square", |a| Ok(Value::Int(a.int(0)?.pow(2))))
            .register("one", |_| Ok(Value::Int(1)));

        assert_eq!(registry.names(), vec!["one", "square"]);
        let square = registry.get("square").unwrap();
        let out = square(&CallArgs::new(vec![Value::Int(4)], BTreeMap::new())).unwrap();
        assert_eq!(out, Value::Int(16));
        assert!(registry.get("cube").is_none());
    }
}
