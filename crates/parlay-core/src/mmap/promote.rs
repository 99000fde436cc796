//! Argument rewriting before a call crosses a process boundary.
//!
//! The promoter walks the whole argument tree of a call unit (positional
//! arguments, keyword arguments, list and map containers, record attributes)
//! and decides, for each array leaf, how it will travel:
//!
//! 1. an array already backed by a mapped file keeps its handle untouched;
//! 2. an in-memory array of at least `threshold` bytes is written once to a
//!    new file in the scratch arena and replaced by a read-write mapping;
//! 3. anything smaller is left to ordinary serialization.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use crate::call::{CallArgs, CallUnit};
use crate::error::Result;
use crate::value::{Record, Value};

use super::arena::ScratchArena;
use super::array::{Array, OwnedArray};
use super::handle::MappedArray;

/// Whether an in-memory buffer of `nbytes` is promoted under `threshold`.
pub fn should_promote(nbytes: usize, threshold: Option<usize>) -> bool {
    match threshold {
        Some(limit) => nbytes > 0 && nbytes >= limit,
        None => false,
    }
}

/// Rewrites array arguments into shared memory-mapped views.
pub struct Promoter<'a> {
    arena: &'a ScratchArena,
    threshold: Option<usize>,
    /// Buffers already persisted for the current unit, by identity.
    persisted: FxHashMap<(usize, usize), MappedArray>,
    promoted: usize,
}

impl<'a> Promoter<'a> {
    /// `threshold` of `None` disables promotion of in-memory arrays.
    pub fn new(arena: &'a ScratchArena, threshold: Option<usize>) -> Self {
        Self {
            arena,
            threshold,
            persisted: FxHashMap::default(),
            promoted: 0,
        }
    }

    /// Total number of arrays persisted by this promoter.
    pub fn promoted(&self) -> usize {
        self.promoted
    }

    /// Rewrite every array argument of `unit`.
    pub fn promote_unit(&mut self, unit: CallUnit) -> Result<CallUnit> {
        self.persisted.clear();
        let (callable, call_args) = unit.into_parts();

        let args = call_args
            .args
            .into_iter()
            .map(|v| self.promote_value(v))
            .collect::<Result<Vec<_>>>()?;
        let kwargs = self.promote_map(call_args.kwargs)?;

        Ok(CallUnit::from_parts(callable, CallArgs::new(args, kwargs)))
    }

    fn promote_value(&mut self, value: Value) -> Result<Value> {
        Ok(match value {
            Value::Array(array) => Value::Array(self.promote_array(array)?),
            Value::List(items) => Value::List(
                items
                    .into_iter()
                    .map(|v| self.promote_value(v))
                    .collect::<Result<Vec<_>>>()?,
            ),
            Value::Map(map) => Value::Map(self.promote_map(map)?),
            Value::Record(record) => Value::Record(Record {
                class_name: record.class_name,
                attrs: self.promote_map(record.attrs)?,
            }),
            other => other,
        })
    }

    fn promote_map(&mut self, map: BTreeMap<String, Value>) -> Result<BTreeMap<String, Value>> {
        map.into_iter()
            .map(|(k, v)| Ok((k, self.promote_value(v)?)))
            .collect()
    }

    fn promote_array(&mut self, array: Array) -> Result<Array> {
        match array {
            Array::Mapped(mapped) => Ok(Array::Mapped(mapped)),
            Array::InMemory(owned) if should_promote(owned.nbytes(), self.threshold) => {
                Ok(Array::Mapped(self.persist(&owned)?))
            }
            small @ Array::InMemory(_) => Ok(small),
        }
    }

    fn persist(&mut self, owned: &OwnedArray) -> Result<MappedArray> {
        let key = owned.buffer_id();
        if let Some(mapped) = self.persisted.get(&key) {
            let handle = mapped.handle();
            if handle.shape == owned.shape() && handle.memory_order == owned.order() {
                return Ok(mapped.clone());
            }
        }

        let handle = self.arena.persist(owned)?;
        tracing::debug!(
            "Promoted {} byte array to {}",
            owned.nbytes(),
            handle.backing_path.display()
        );
        let mapped = MappedArray::open(handle)?;
        self.persisted.insert(key, mapped.clone());
        self.promoted += 1;
        Ok(mapped)
    }
}
