//! Array-like argument values.
//!
//! Arrays are stored as raw little-endian bytes plus layout metadata. An
//! array is either owned in memory or backed by a memory-mapped file.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::handle::{ArrayHandle, MappedArray};

/// Element type of an array buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl ElementType {
    /// Size of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            ElementType::I8 | ElementType::U8 => 1,
            ElementType::I16 | ElementType::U16 => 2,
            ElementType::I32 | ElementType::U32 | ElementType::F32 => 4,
            ElementType::I64 | ElementType::U64 | ElementType::F64 => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ElementType::I8 => "int8",
            ElementType::U8 => "uint8",
            ElementType::I16 => "int16",
            ElementType::U16 => "uint16",
            ElementType::I32 => "int32",
            ElementType::U32 => "uint32",
            ElementType::I64 => "int64",
            ElementType::U64 => "uint64",
            ElementType::F32 => "float32",
            ElementType::F64 => "float64",
        }
    }
}

/// Memory layout of a multi-dimensional array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MemoryOrder {
    /// C order: the last index varies fastest.
    #[default]
    RowMajor,
    /// Fortran order: the first index varies fastest.
    ColumnMajor,
}

impl MemoryOrder {
    pub fn code(self) -> char {
        match self {
            MemoryOrder::RowMajor => 'C',
            MemoryOrder::ColumnMajor => 'F',
        }
    }
}

/// Scalar types that can be stored in an array.
pub trait Element: Copy {
    const TYPE: ElementType;

    fn write_le(self, out: &mut Vec<u8>);

    fn read_le(bytes: &[u8]) -> Self;

    fn to_f64(self) -> f64;
}

macro_rules! impl_element {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl Element for $ty {
                const TYPE: ElementType = ElementType::$variant;

                fn write_le(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }

                fn read_le(bytes: &[u8]) -> Self {
                    let mut buf = [0u8; std::mem::size_of::<$ty>()];
                    buf.copy_from_slice(&bytes[..std::mem::size_of::<$ty>()]);
                    <$ty>::from_le_bytes(buf)
                }

                fn to_f64(self) -> f64 {
                    self as f64
                }
            }
        )*
    };
}

impl_element! {
    i8 => I8,
    u8 => U8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f32 => F32,
    f64 => F64,
}

/// Number of bytes a buffer of this layout occupies.
pub fn layout_nbytes(element_type: ElementType, shape: &[usize]) -> usize {
    shape.iter().product::<usize>() * element_type.size()
}

fn decode_elements<T: Element>(element_type: ElementType, bytes: &[u8]) -> Result<Vec<T>> {
    if element_type != T::TYPE {
        return Err(Error::Deserialization(format!(
            "array holds {} elements, requested {}",
            element_type.name(),
            T::TYPE.name()
        )));
    }
    Ok(bytes.chunks_exact(T::TYPE.size()).map(T::read_le).collect())
}

fn sum_elements(element_type: ElementType, bytes: &[u8]) -> f64 {
    fn sum<T: Element>(bytes: &[u8]) -> f64 {
        bytes
            .chunks_exact(T::TYPE.size())
            .map(|chunk| T::read_le(chunk).to_f64())
            .sum()
    }
    match element_type {
        ElementType::I8 => sum::<i8>(bytes),
        ElementType::U8 => sum::<u8>(bytes),
        ElementType::I16 => sum::<i16>(bytes),
        ElementType::U16 => sum::<u16>(bytes),
        ElementType::I32 => sum::<i32>(bytes),
        ElementType::U32 => sum::<u32>(bytes),
        ElementType::I64 => sum::<i64>(bytes),
        ElementType::U64 => sum::<u64>(bytes),
        ElementType::F32 => sum::<f32>(bytes),
        ElementType::F64 => sum::<f64>(bytes),
    }
}

/// An array held in process memory.
///
/// The buffer is reference counted: cloning an `OwnedArray` shares the bytes,
/// which lets promotion persist a buffer once per call even when it appears
/// several times among the arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnedArray {
    element_type: ElementType,
    shape: Vec<usize>,
    order: MemoryOrder,
    data: Arc<[u8]>,
}

impl OwnedArray {
    /// Build an array from raw little-endian bytes.
    pub fn from_raw(
        element_type: ElementType,
        shape: Vec<usize>,
        order: MemoryOrder,
        data: Vec<u8>,
    ) -> Result<Self> {
        let expected = layout_nbytes(element_type, &shape);
        if data.len() != expected {
            return Err(Error::Deserialization(format!(
                "array of shape {:?} and type {} needs {} bytes, got {}",
                shape,
                element_type.name(),
                expected,
                data.len()
            )));
        }
        Ok(Self {
            element_type,
            shape,
            order,
            data: data.into(),
        })
    }

    /// Build a row-major array from elements in storage order.
    pub fn from_vec<T: Element>(shape: Vec<usize>, values: Vec<T>) -> Result<Self> {
        let mut data = Vec::with_capacity(values.len() * T::TYPE.size());
        for v in values {
            v.write_le(&mut data);
        }
        Self::from_raw(T::TYPE, shape, MemoryOrder::RowMajor, data)
    }

    /// One-dimensional array.
    pub fn from_slice<T: Element>(values: &[T]) -> Self {
        let mut data = Vec::with_capacity(values.len() * T::TYPE.size());
        for v in values {
            v.write_le(&mut data);
        }
        Self {
            element_type: T::TYPE,
            shape: vec![values.len()],
            order: MemoryOrder::RowMajor,
            data: data.into(),
        }
    }

    /// Same buffer reinterpreted with another memory order.
    pub fn with_order(mut self, order: MemoryOrder) -> Self {
        self.order = order;
        self
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn order(&self) -> MemoryOrder {
        self.order
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn nbytes(&self) -> usize {
        self.data.len()
    }

    /// Identity of the underlying shared buffer.
    pub(crate) fn buffer_id(&self) -> (usize, usize) {
        (self.data.as_ptr() as usize, self.data.len())
    }
}

/// An array argument: in memory, or backed by a memory-mapped file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Array {
    InMemory(OwnedArray),
    Mapped(MappedArray),
}

impl Array {
    pub fn is_mapped(&self) -> bool {
        matches!(self, Array::Mapped(_))
    }

    /// Handle of the backing file, for mapped arrays.
    pub fn handle(&self) -> Option<&ArrayHandle> {
        match self {
            Array::Mapped(m) => Some(m.handle()),
            Array::InMemory(_) => None,
        }
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            Array::InMemory(a) => a.element_type(),
            Array::Mapped(m) => m.handle().element_type,
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            Array::InMemory(a) => a.shape(),
            Array::Mapped(m) => &m.handle().shape,
        }
    }

    pub fn order(&self) -> MemoryOrder {
        match self {
            Array::InMemory(a) => a.order(),
            Array::Mapped(m) => m.handle().memory_order,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            Array::InMemory(a) => a.bytes(),
            Array::Mapped(m) => m.bytes(),
        }
    }

    pub fn nbytes(&self) -> usize {
        self.bytes().len()
    }

    pub fn len(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Elements in storage order.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        decode_elements(self.element_type(), self.bytes())
    }

    /// Sum of all elements as `f64`.
    pub fn sum(&self) -> f64 {
        sum_elements(self.element_type(), self.bytes())
    }

    pub fn summary(&self) -> String {
        let storage = match self {
            Array::InMemory(_) => "array".to_string(),
            Array::Mapped(m) => format!("memmap {}", m.handle().backing_path.display()),
        };
        format!(
            "<{} {} {:?} order={}>",
            storage,
            self.element_type().name(),
            self.shape(),
            self.order().code()
        )
    }
}

impl From<MappedArray> for Array {
    fn from(m: MappedArray) -> Self {
        Array::Mapped(m)
    }
}

impl From<OwnedArray> for Array {
    fn from(a: OwnedArray) -> Self {
        Array::InMemory(a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vec_checks_shape() {
        let ok = OwnedArray::from_vec(vec![2, 3], vec![0i32; 6]).unwrap();
        assert_eq!(ok.nbytes(), 24);

        let err = OwnedArray::from_vec(vec![2, 3], vec![0i32; 5]).unwrap_err();
        assert!(err.to_string().contains("needs 24 bytes"));
    }

    #[test]
    fn test_to_vec_checks_type() {
        let array = Array::from(OwnedArray::from_slice(&[1.5f64, 2.5]));
        assert_eq!(array.to_vec::<f64>().unwrap(), vec![1.5, 2.5]);
        assert!(array.to_vec::<f32>().is_err());
        assert_eq!(array.sum(), 4.0);
    }

    #[test]
    fn test_clones_share_buffer() {
        let a = OwnedArray::from_slice(&[1u8, 2, 3]);
        let b = a.clone();
        assert_eq!(a.buffer_id(), b.buffer_id());

        let c = OwnedArray::from_slice(&[1u8, 2, 3]);
        assert_ne!(a.buffer_id(), c.buffer_id());
    }

    #[test]
    fn test_layout_nbytes() {
        assert_eq!(layout_nbytes(ElementType::F32, &[10, 10]), 400);
        assert_eq!(layout_nbytes(ElementType::I64, &[9, 10]), 720);
        assert_eq!(layout_nbytes(ElementType::U8, &[]), 1);
    }
}
