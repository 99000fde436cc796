//! Shared memory-mapped array buffers.
//!
//! - `array` - Array values, element types and memory order
//! - `handle` - `ArrayHandle` descriptions and live `MappedArray` views
//! - `arena` - Scratch directory for promoted buffers
//! - `promote` - Argument rewriting before transfer to a worker

mod arena;
mod array;
mod handle;
mod promote;

pub use arena::ScratchArena;
pub use array::{Array, Element, ElementType, MemoryOrder, OwnedArray, layout_nbytes};
pub use handle::{AccessMode, ArrayHandle, MappedArray};
pub use promote::{Promoter, should_promote};
