//! Memory-mapped array views and the handles that describe them.
//!
//! An [`ArrayHandle`] is the transferable description of a view; a
//! [`MappedArray`] is the live mapping. A mapped array serializes as its
//! handle and is reopened from the handle when deserialized, so a view
//! crosses a process boundary without its bytes being copied.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::{Mmap, MmapMut, MmapOptions};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::array::{ElementType, MemoryOrder, layout_nbytes};

/// How a backing file is mapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessMode {
    /// Shared read-only mapping (`r`).
    ReadOnly,
    /// Shared writable mapping; writes reach the file (`r+`).
    ReadWrite,
    /// Private writable mapping; writes stay in this process (`c`).
    CopyOnWrite,
}

impl AccessMode {
    pub fn code(self) -> &'static str {
        match self {
            AccessMode::ReadOnly => "r",
            AccessMode::ReadWrite => "r+",
            AccessMode::CopyOnWrite => "c",
        }
    }
}

/// Reconstructable description of a view over a backing file.
///
/// Handles never own the backing file; its lifetime belongs to whoever
/// created it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArrayHandle {
    pub backing_path: PathBuf,
    pub element_type: ElementType,
    pub shape: Vec<usize>,
    pub byte_offset: usize,
    pub access_mode: AccessMode,
    pub memory_order: MemoryOrder,
}

impl ArrayHandle {
    /// Read-write, row-major handle starting at offset zero.
    pub fn new(
        backing_path: impl Into<PathBuf>,
        element_type: ElementType,
        shape: Vec<usize>,
    ) -> Self {
        Self {
            backing_path: backing_path.into(),
            element_type,
            shape,
            byte_offset: 0,
            access_mode: AccessMode::ReadWrite,
            memory_order: MemoryOrder::RowMajor,
        }
    }

    pub fn with_offset(mut self, byte_offset: usize) -> Self {
        self.byte_offset = byte_offset;
        self
    }

    pub fn with_mode(mut self, access_mode: AccessMode) -> Self {
        self.access_mode = access_mode;
        self
    }

    pub fn with_order(mut self, memory_order: MemoryOrder) -> Self {
        self.memory_order = memory_order;
        self
    }

    /// Size of the view in bytes.
    pub fn nbytes(&self) -> usize {
        layout_nbytes(self.element_type, &self.shape)
    }

    /// Open a live mapping for this handle.
    pub fn open(&self) -> Result<MappedArray> {
        MappedArray::open(self.clone())
    }
}

enum MapView {
    ReadOnly(Mmap),
    Writable(MmapMut),
    Empty,
}

impl MapView {
    fn bytes(&self) -> &[u8] {
        match self {
            MapView::ReadOnly(m) => &m[..],
            MapView::Writable(m) => &m[..],
            MapView::Empty => &[],
        }
    }
}

/// A live memory-mapped view over part of a backing file.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "ArrayHandle", into = "ArrayHandle")]
pub struct MappedArray {
    handle: ArrayHandle,
    view: Arc<MapView>,
}

impl MappedArray {
    /// Map the region described by `handle`.
    pub fn open(handle: ArrayHandle) -> Result<Self> {
        let nbytes = handle.nbytes();
        if nbytes == 0 {
            return Ok(Self {
                handle,
                view: Arc::new(MapView::Empty),
            });
        }

        let file = open_backing_file(&handle.backing_path, handle.access_mode)?;
        let file_len = file.metadata()?.len();
        let end = (handle.byte_offset + nbytes) as u64;
        if file_len < end {
            return Err(Error::Mapping(format!(
                "backing file {} has {} bytes, view needs {}",
                handle.backing_path.display(),
                file_len,
                end
            )));
        }

        let mut options = MmapOptions::new();
        options.offset(handle.byte_offset as u64).len(nbytes);

        // SAFETY: backing files are written once before their handle is
        // published and are never truncated while views exist.
        let view = unsafe {
            match handle.access_mode {
                AccessMode::ReadOnly => options.map(&file).map(MapView::ReadOnly),
                AccessMode::ReadWrite => options.map_mut(&file).map(MapView::Writable),
                AccessMode::CopyOnWrite => options.map_copy(&file).map(MapView::Writable),
            }
        }
        .map_err(|e| {
            Error::Mapping(format!(
                "failed to map {}: {}",
                handle.backing_path.display(),
                e
            ))
        })?;

        Ok(Self {
            handle,
            view: Arc::new(view),
        })
    }

    pub fn handle(&self) -> &ArrayHandle {
        &self.handle
    }

    pub fn bytes(&self) -> &[u8] {
        self.view.bytes()
    }

    /// Mutable access to the mapped bytes.
    ///
    /// Fails for read-only views and for views shared with clones.
    pub fn bytes_mut(&mut self) -> Result<&mut [u8]> {
        let path = self.handle.backing_path.display().to_string();
        match Arc::get_mut(&mut self.view) {
            Some(MapView::Writable(m)) => Ok(&mut m[..]),
            Some(MapView::Empty) => Ok(&mut []),
            Some(MapView::ReadOnly(_)) => {
                Err(Error::Mapping(format!("view of {} is read-only", path)))
            }
            None => Err(Error::Mapping(format!("view of {} is shared", path))),
        }
    }

    /// Flush writes of a read-write view to the backing file.
    pub fn flush(&self) -> Result<()> {
        if let (MapView::Writable(m), AccessMode::ReadWrite) =
            (self.view.as_ref(), self.handle.access_mode)
        {
            m.flush()?;
        }
        Ok(())
    }
}

fn open_backing_file(path: &Path, mode: AccessMode) -> Result<File> {
    let result = match mode {
        AccessMode::ReadOnly | AccessMode::CopyOnWrite => File::open(path),
        AccessMode::ReadWrite => OpenOptions::new().read(true).write(true).open(path),
    };
    result.map_err(|e| Error::Mapping(format!("failed to open {}: {}", path.display(), e)))
}

impl TryFrom<ArrayHandle> for MappedArray {
    type Error = Error;

    fn try_from(handle: ArrayHandle) -> Result<Self> {
        Self::open(handle)
    }
}

impl From<MappedArray> for ArrayHandle {
    fn from(array: MappedArray) -> Self {
        array.handle
    }
}

impl PartialEq for MappedArray {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl fmt::Debug for MappedArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedArray")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_f32_file(dir: &Path, name: &str, count: usize) -> PathBuf {
        let path = dir.join(name);
        let mut bytes = Vec::new();
        for i in 0..count {
            bytes.extend_from_slice(&(i as f32).to_le_bytes());
        }
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_open_preserves_handle() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = write_f32_file(temp.path(), "buffer.mmap", 100);

        let handle = ArrayHandle::new(&path, ElementType::F32, vec![10, 10])
            .with_order(MemoryOrder::ColumnMajor);
        let mapped = handle.open().unwrap();

        assert_eq!(mapped.handle(), &handle);
        assert_eq!(mapped.bytes().len(), 400);
        assert_eq!(&mapped.bytes()[4..8], &1.0f32.to_le_bytes());
    }

    #[test]
    fn test_offset_view() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = write_f32_file(temp.path(), "buffer.mmap", 100);

        let handle = ArrayHandle::new(&path, ElementType::F32, vec![9, 10])
            .with_offset(40)
            .with_mode(AccessMode::CopyOnWrite);
        let mapped = handle.open().unwrap();

        assert_eq!(&mapped.bytes()[0..4], &10.0f32.to_le_bytes());
    }

    #[test]
    fn test_view_past_end_is_rejected() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = write_f32_file(temp.path(), "short.mmap", 4);

        let err = ArrayHandle::new(&path, ElementType::F32, vec![8]).open().unwrap_err();
        assert!(matches!(err, Error::Mapping(_)));
    }

    #[test]
    fn test_copy_on_write_does_not_touch_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = write_f32_file(temp.path(), "cow.mmap", 4);

        let mut mapped = ArrayHandle::new(&path, ElementType::F32, vec![4])
            .with_mode(AccessMode::CopyOnWrite)
            .open()
            .unwrap();
        mapped.bytes_mut().unwrap()[0..4].copy_from_slice(&42.0f32.to_le_bytes());

        let on_disk = std::fs::read(&path).unwrap();
        assert_eq!(&on_disk[0..4], &0.0f32.to_le_bytes());
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = write_f32_file(temp.path(), "ro.mmap", 4);

        let mut mapped = ArrayHandle::new(&path, ElementType::F32, vec![4])
            .with_mode(AccessMode::ReadOnly)
            .open()
            .unwrap();
        assert!(mapped.bytes_mut().is_err());
    }

    #[test]
    fn test_serializes_as_handle() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = write_f32_file(temp.path(), "wire.mmap", 16);
        let mapped = ArrayHandle::new(&path, ElementType::F32, vec![4, 4])
            .open()
            .unwrap();

        let bytes = bincode::serialize(&mapped).unwrap();
        assert!(bytes.len() < 64 + path.as_os_str().len());

        let decoded: MappedArray = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded.handle(), mapped.handle());
        assert_eq!(decoded.bytes(), mapped.bytes());
    }
}
