//! Inter-process communication for Parlay worker processes.
//!
//! This module provides the protocol, the parent-side worker pool, and the
//! request loop that worker executables run.

pub mod protocol;
mod serve;
mod worker;

pub use protocol::{CallPayload, WorkerCommand, WorkerResponse, read_message, write_message};
pub use serve::{run_payload, serve, serve_io};
pub use worker::{Completion, Job, WorkerHandle, WorkerPool, WorkerSpec};
