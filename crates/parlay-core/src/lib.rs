//! Core engine for Parlay process-pool task dispatch.
//!
//! This crate provides:
//! - Lazy, backpressure-bounded dispatch of call units
//! - Sequential and process-pool execution backends
//! - Classification of failures that cross the process boundary
//! - Promotion of large arrays into shared memory-mapped buffers
//! - The worker-side serve loop and its IPC protocol

pub mod call;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod execute;
pub mod ipc;
pub mod mmap;
pub mod parallelism;
pub mod progress;
pub mod value;

pub use call::{CallArgs, CallUnit, Callable, TaskFn, TaskRegistry};
pub use config::{DEFAULT_MAX_NBYTES, ParallelConfig, PreDispatch, parse_byte_size};
pub use dispatch::{DispatchWindow, Dispatcher, execute};
pub use error::{Error, Result, TaskError};
pub use execute::{Backend, Completed, ExceptionEnvelope, UnitOutcome};
pub use ipc::{WorkerPool, WorkerSpec, serve};
pub use mmap::{
    AccessMode, Array, ArrayHandle, Element, ElementType, MappedArray, MemoryOrder, OwnedArray,
    ScratchArena,
};
pub use parallelism::{WorkerCount, available_parallelism};
pub use progress::{DispatchCallback, ProgressLogger};
pub use value::{FromRecord, IntoRecord, Record, Value};
