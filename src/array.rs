//! Dense little-endian arrays and the dtypes they can hold
//!
//! [`Array`] is the value type flowing in and out of the engine. It is
//! deliberately dtype-erased: the element type lives in a [`Dtype`] tag
//! and the payload is packed little-endian bytes, which is exactly the
//! form samples take inside a chunk. Typed access goes through
//! [`Array::from_vec`] / [`Array::to_vec`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::packers::Packable;
use crate::TenstoreError;

/// Element types a tensor can store.
///
/// All of them are fixed-width numerics; the name doubles as the string
/// form used in the tensor meta JSON.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dtype {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
}

impl Dtype {
    /// Width of one element in bytes.
    pub fn itemsize(self) -> usize {
        match self {
            Dtype::U8 | Dtype::I8 => 1,
            Dtype::U16 | Dtype::I16 => 2,
            Dtype::U32 | Dtype::I32 | Dtype::F32 => 4,
            Dtype::U64 | Dtype::I64 | Dtype::F64 => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Dtype::U8 => "u8",
            Dtype::U16 => "u16",
            Dtype::U32 => "u32",
            Dtype::U64 => "u64",
            Dtype::I8 => "i8",
            Dtype::I16 => "i16",
            Dtype::I32 => "i32",
            Dtype::I64 => "i64",
            Dtype::F32 => "f32",
            Dtype::F64 => "f64",
        }
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        f.write_str(self.name())
    }
}

/// An element type that can live inside an [`Array`].
pub trait Element: Packable + Copy + num_traits::NumCast + num_traits::ToPrimitive {
    const DTYPE: Dtype;
}

macro_rules! impl_element {
    ($($rust_type:ty => $dtype:expr),+ $(,)?) => {
        $(impl Element for $rust_type {
            const DTYPE: Dtype = $dtype;
        })+
    };
}

impl_element!(
    u8 => Dtype::U8,
    u16 => Dtype::U16,
    u32 => Dtype::U32,
    u64 => Dtype::U64,
    i8 => Dtype::I8,
    i16 => Dtype::I16,
    i32 => Dtype::I32,
    i64 => Dtype::I64,
    f32 => Dtype::F32,
    f64 => Dtype::F64,
);

/// Expands `$body` once with `$T` bound to the Rust type of `$dtype`.
macro_rules! dtype_dispatch {
    ($dtype:expr, $T:ident => $body:expr) => {
        match $dtype {
            Dtype::U8 => {
                type $T = u8;
                $body
            }
            Dtype::U16 => {
                type $T = u16;
                $body
            }
            Dtype::U32 => {
                type $T = u32;
                $body
            }
            Dtype::U64 => {
                type $T = u64;
                $body
            }
            Dtype::I8 => {
                type $T = i8;
                $body
            }
            Dtype::I16 => {
                type $T = i16;
                $body
            }
            Dtype::I32 => {
                type $T = i32;
                $body
            }
            Dtype::I64 => {
                type $T = i64;
                $body
            }
            Dtype::F32 => {
                type $T = f32;
                $body
            }
            Dtype::F64 => {
                type $T = f64;
                $body
            }
        }
    };
}

/// A dense multi-dimensional array.
///
/// The payload is the concatenation of all elements packed little-endian
/// in row-major order, which makes `as_bytes` the exact buffer a chunk
/// stores for an uncompressed sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    dtype: Dtype,
    shape: Vec<u64>,
    data: Vec<u8>,
}

impl Array {
    /// Builds an array from typed values, row-major.
    ///
    /// The number of values must match the product of `shape`.
    pub fn from_vec<T: Element>(values: Vec<T>, shape: &[u64]) -> crate::Result<Self> {
        let num_elements: u64 = shape.iter().product();
        if values.len() as u64 != num_elements {
            return Err(TenstoreError::BufferLenMismatch {
                buffer_len: values.len(),
                expected_len: num_elements as usize,
            });
        }

        let itemsize = T::DTYPE.itemsize();
        let mut data = vec![0u8; values.len() * itemsize];
        for (value, slot) in values.iter().zip(data.chunks_exact_mut(itemsize)) {
            value.pack_into(slot);
        }

        Ok(Self {
            dtype: T::DTYPE,
            shape: shape.to_vec(),
            data,
        })
    }

    /// Builds an array over raw little-endian bytes.
    pub fn from_le_bytes(dtype: Dtype, shape: &[u64], data: Vec<u8>) -> crate::Result<Self> {
        let num_elements: u64 = shape.iter().product();
        let expected_len = num_elements as usize * dtype.itemsize();
        if data.len() != expected_len {
            return Err(TenstoreError::BufferLenMismatch {
                buffer_len: data.len(),
                expected_len,
            });
        }
        Ok(Self {
            dtype,
            shape: shape.to_vec(),
            data,
        })
    }

    /// A rank-0 array holding a single value.
    pub fn scalar<T: Element>(value: T) -> Self {
        let mut data = vec![0u8; T::DTYPE.itemsize()];
        value.pack_into(&mut data);
        Self {
            dtype: T::DTYPE,
            shape: Vec::new(),
            data,
        }
    }

    /// An array of the given shape filled with zero bytes.
    pub fn zeros(dtype: Dtype, shape: &[u64]) -> Self {
        let num_elements: u64 = shape.iter().product();
        Self {
            dtype,
            shape: shape.to_vec(),
            data: vec![0u8; num_elements as usize * dtype.itemsize()],
        }
    }

    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    pub fn num_elements(&self) -> u64 {
        self.shape.iter().product()
    }

    pub fn nbytes(&self) -> usize {
        self.data.len()
    }

    /// The packed little-endian payload.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Unpacks the payload into typed values.
    ///
    /// Fails when `T` does not match the array's dtype.
    pub fn to_vec<T: Element>(&self) -> crate::Result<Vec<T>> {
        if T::DTYPE != self.dtype {
            return Err(TenstoreError::TensorDtypeMismatch {
                expected: self.dtype,
                got: T::DTYPE,
            });
        }
        let itemsize = self.dtype.itemsize();
        Ok(self
            .data
            .chunks_exact(itemsize)
            .map(T::unpack_from)
            .collect())
    }

    /// Reinterprets the same elements under a new shape.
    pub fn reshape(&self, shape: &[u64]) -> crate::Result<Self> {
        let num_elements: u64 = shape.iter().product();
        if num_elements != self.num_elements() {
            return Err(TenstoreError::BufferLenMismatch {
                buffer_len: self.data.len(),
                expected_len: num_elements as usize * self.dtype.itemsize(),
            });
        }
        Ok(Self {
            dtype: self.dtype,
            shape: shape.to_vec(),
            data: self.data.clone(),
        })
    }

    /// Casts every element to `dtype`.
    ///
    /// Fails with [`TenstoreError::FailedCast`] when a value is not
    /// representable in the target type (for example `-1` as `u8`).
    pub fn astype(&self, dtype: Dtype) -> crate::Result<Self> {
        if dtype == self.dtype {
            return Ok(self.clone());
        }
        let from = self.dtype;
        dtype_dispatch!(from, S => dtype_dispatch!(dtype, D => {
            let source: Vec<S> = self.to_vec()?;
            let mut values: Vec<D> = Vec::with_capacity(source.len());
            for v in source {
                values.push(
                    num_traits::cast::<S, D>(v)
                        .ok_or(TenstoreError::FailedCast { from, to: dtype })?,
                );
            }
            Array::from_vec(values, &self.shape)
        }))
    }

    /// Stacks arrays of identical shape and dtype along a new first axis.
    pub fn stack(arrays: &[Array]) -> crate::Result<Self> {
        let first = arrays.first().ok_or(TenstoreError::ZeroSampleCount)?;
        let mut data = Vec::with_capacity(arrays.len() * first.data.len());
        for array in arrays {
            if array.shape != first.shape || array.dtype != first.dtype {
                return Err(TenstoreError::BufferLenMismatch {
                    buffer_len: array.data.len(),
                    expected_len: first.data.len(),
                });
            }
            data.extend_from_slice(&array.data);
        }
        let mut shape = Vec::with_capacity(first.shape.len() + 1);
        shape.push(arrays.len() as u64);
        shape.extend_from_slice(&first.shape);
        Ok(Self {
            dtype: first.dtype,
            shape,
            data,
        })
    }
}
