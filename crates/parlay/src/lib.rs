//! Parlay: parallel map over worker processes.
//!
//! Parlay runs a lazily produced sequence of independent call units on a
//! pool of worker processes, or in the calling thread when one worker is
//! requested:
//! - **Ordered results**: results come back in input order
//! - **Bounded dispatch**: at most `pre_dispatch` units are outstanding
//! - **Faithful failures**: worker failures keep their kind and context
//! - **Shared arrays**: large arrays travel as memory-mapped files
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use parlay::prelude::*;
//!
//! let units = (0..10i64).map(|x| Ok(CallUnit::named("square").arg(x)));
//! let squares = parlay::execute(units, 2, PreDispatch::All, 0)?;
//! ```
//!
//! Named tasks are looked up in [`builtins::registry`] on both sides of the
//! process boundary. Workers are started from the `parlay-worker`
//! executable, found through `PARLAY_WORKER_PATH`, next to the current
//! executable, or on `PATH`.
//!
//! For custom registries and worker executables, use
//! [`parlay_core::Dispatcher`] and [`parlay_core::serve`] directly.

pub mod builtins;

use std::sync::Arc;

pub use parlay_core;

use parlay_core::{CallUnit, Dispatcher, ParallelConfig, PreDispatch, Result, Value};

pub mod prelude {
    //! Common imports.
    //!
    //! ```rust,ignore
    //! use parlay::prelude::*;
    //! ```

    pub use parlay_core::{
        AccessMode, Array, ArrayHandle, CallArgs, CallUnit, DispatchCallback, Dispatcher, Error,
        ElementType, ExceptionEnvelope, MappedArray, MemoryOrder, OwnedArray, ParallelConfig,
        PreDispatch, Record, Result, ScratchArena, TaskError, TaskRegistry, Value,
    };
}

/// Run `units` with the built-in tasks on `n_jobs` workers.
///
/// `n_jobs` of `0` or `1` runs in the calling thread; `-k` uses all but
/// `k - 1` CPUs.
pub fn execute<I>(
    units: I,
    n_jobs: i64,
    pre_dispatch: PreDispatch,
    verbosity: u32,
) -> Result<Vec<Value>>
where
    I: IntoIterator<Item = Result<CallUnit>>,
{
    parlay_core::execute(
        Arc::new(builtins::registry()),
        units,
        n_jobs,
        pre_dispatch,
        verbosity,
    )
}

/// A dispatcher over the built-in tasks.
pub fn dispatcher(config: ParallelConfig) -> Dispatcher {
    Dispatcher::new(config, Arc::new(builtins::registry()))
}
