//! Scratch area for promoted array buffers.
//!
//! Every backing file lives in one temporary directory that is removed when
//! the arena is dropped. Files are created exclusively and written once.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use tempfile::TempDir;

use crate::error::{Error, Result};

use super::array::OwnedArray;
use super::handle::{AccessMode, ArrayHandle};

/// Temporary directory holding backing files for promoted arrays.
pub struct ScratchArena {
    dir: TempDir,
    allocated: AtomicUsize,
}

impl ScratchArena {
    /// Create an arena under the system temporary directory.
    pub fn new() -> Result<Self> {
        Self::in_folder(&std::env::temp_dir())
    }

    /// Create an arena under `parent`.
    pub fn in_folder(parent: &Path) -> Result<Self> {
        std::fs::create_dir_all(parent)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("parlay-{}-", std::process::id()))
            .tempdir_in(parent)?;
        tracing::debug!("Created scratch arena at {}", dir.path().display());
        Ok(Self {
            dir,
            allocated: AtomicUsize::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Number of backing files allocated so far.
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Create a fresh backing file of `size` bytes.
    pub fn allocate(&self, size: usize) -> Result<(PathBuf, File)> {
        let path = self
            .dir
            .path()
            .join(format!("{}.mmap", uuid::Uuid::new_v4()));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| Error::Mapping(format!("failed to create {}: {}", path.display(), e)))?;
        file.set_len(size as u64)?;
        self.allocated.fetch_add(1, Ordering::Relaxed);
        Ok((path, file))
    }

    /// Write `array` into a new backing file and describe it with a handle.
    pub fn persist(&self, array: &OwnedArray) -> Result<ArrayHandle> {
        let (path, mut file) = self.allocate(array.nbytes())?;
        file.write_all(array.bytes())?;
        file.sync_data()?;

        Ok(ArrayHandle::new(path, array.element_type(), array.shape().to_vec())
            .with_mode(AccessMode::ReadWrite)
            .with_order(array.order()))
    }
}

impl std::fmt::Debug for ScratchArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScratchArena")
            .field("path", &self.dir.path())
            .field("allocated", &self.allocated())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mmap::MemoryOrder;

    #[test]
    fn test_persist_round_trip() {
        let parent = tempfile::TempDir::new().unwrap();
        let arena = ScratchArena::in_folder(parent.path()).unwrap();

        let array = OwnedArray::from_vec(vec![2, 3], (0..6).map(|i| i as f64).collect::<Vec<_>>())
            .unwrap()
            .with_order(MemoryOrder::ColumnMajor);
        let handle = arena.persist(&array).unwrap();

        assert!(handle.backing_path.starts_with(arena.path()));
        assert_eq!(handle.access_mode, AccessMode::ReadWrite);
        assert_eq!(handle.memory_order, MemoryOrder::ColumnMajor);
        assert_eq!(handle.shape, vec![2, 3]);

        let mapped = handle.open().unwrap();
        assert_eq!(mapped.bytes(), array.bytes());
        assert_eq!(arena.allocated(), 1);
    }

    #[test]
    fn test_files_removed_on_drop() {
        let parent = tempfile::TempDir::new().unwrap();
        let arena = ScratchArena::in_folder(parent.path()).unwrap();
        let (path, _file) = arena.allocate(16).unwrap();
        let dir = arena.path().to_path_buf();
        assert!(path.exists());

        drop(arena);
        assert!(!path.exists());
        assert!(!dir.exists());
    }
}
