//! The bridge between user-facing values and stored sample buffers

use std::borrow::Cow;

use crate::array::{Array, Dtype, Element};
use crate::compression::{compress_array, decode_image, Compression};
use crate::TenstoreError;

/// One incoming sample: a raw array, an already-encoded image buffer,
/// or a scalar.
///
/// Whatever the origin, a sample knows its shape and dtype up front and
/// can produce the byte buffer the engine stores, re-encoding only when
/// the tensor's codec differs from the buffer it arrived with.
#[derive(Debug, Clone)]
pub struct Sample {
    array: Array,
    encoded: Option<(Vec<u8>, Compression)>,
}

impl Sample {
    pub fn from_array(array: Array) -> Self {
        Self {
            array,
            encoded: None,
        }
    }

    /// A rank-0 sample.
    pub fn from_scalar<T: Element>(value: T) -> Self {
        Self::from_array(Array::scalar(value))
    }

    /// Wraps an already-encoded image buffer.
    ///
    /// The buffer is decoded once to learn its shape and dtype; the
    /// original bytes are kept and stored as-is when the tensor uses
    /// the same codec.
    pub fn from_encoded(buffer: Vec<u8>, compression: Compression) -> crate::Result<Self> {
        if compression == Compression::Uncompressed {
            // raw buffers carry no shape information
            return Err(TenstoreError::UnsupportedCompression(
                "uncompressed buffers must be passed as arrays".to_string(),
            ));
        }
        let array = decode_image(&buffer)?;
        Ok(Self {
            array,
            encoded: Some((buffer, compression)),
        })
    }

    pub fn shape(&self) -> &[u64] {
        self.array.shape()
    }

    pub fn dtype(&self) -> Dtype {
        self.array.dtype()
    }

    pub fn array(&self) -> &Array {
        &self.array
    }

    /// Whether the sample arrived as pre-encoded bytes.
    pub fn is_encoded(&self) -> bool {
        self.encoded.is_some()
    }

    /// Casts a raw sample to another dtype.
    ///
    /// Pre-encoded samples cannot be cast without re-encoding and are
    /// rejected.
    pub fn astype(&self, dtype: Dtype) -> crate::Result<Self> {
        if let Some((_, _)) = &self.encoded {
            return Err(TenstoreError::TensorDtypeMismatch {
                expected: dtype,
                got: self.dtype(),
            });
        }
        Ok(Self::from_array(self.array.astype(dtype)?))
    }

    /// The byte buffer to store for this sample under the tensor's
    /// codec.
    ///
    /// Already-encoded bytes pass through untouched when the codec
    /// matches; otherwise the sample is (re-)encoded from its array
    /// form.
    pub fn encoded_bytes(&self, compression: Compression) -> crate::Result<Cow<'_, [u8]>> {
        if let Some((buffer, original)) = &self.encoded {
            if *original == compression {
                return Ok(Cow::Borrowed(buffer.as_slice()));
            }
        }
        match compression {
            Compression::Uncompressed => Ok(Cow::Borrowed(self.array.as_bytes())),
            _ => Ok(Cow::Owned(compress_array(&self.array, compression)?)),
        }
    }
}

impl From<Array> for Sample {
    fn from(array: Array) -> Self {
        Self::from_array(array)
    }
}
