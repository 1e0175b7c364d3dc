//! Definitions of error related things.

use std::fmt;

use crate::array::Dtype;
use crate::compression::Compression;

/// Errors of this crate
#[derive(Debug)]
#[non_exhaustive]
pub enum TenstoreError {
    /// A chunk was asked to store more bytes than it has room for.
    /// The engine pre-checks chunk capacity, so surfacing this is a bug.
    FullChunk {
        incoming_num_bytes: usize,
        max_data_bytes: usize,
    },
    /// Stored metadata does not add up (missing encoder for a non-empty
    /// tensor, malformed chunk header, ...)
    CorruptedMeta(String),
    /// The sample's rank does not match the rank of the tensor
    TensorInvalidSampleShape {
        shape: Vec<u64>,
        expected_rank: usize,
    },
    /// The sample's dtype does not match the tensor's dtype
    TensorDtypeMismatch { expected: Dtype, got: Dtype },
    /// A value could not be represented in the requested dtype
    FailedCast { from: Dtype, to: Dtype },
    /// Encoding a sample with the configured codec failed
    SampleCompression {
        shape: Vec<u64>,
        compression: Compression,
        message: String,
    },
    /// A stored buffer could not be decoded back into an array
    SampleDecompression,
    /// The compression name is not one of the supported codecs
    UnsupportedCompression(String),
    /// A dense read was requested but the selected samples do not all
    /// share one shape. Retry with a list read.
    DynamicTensor { key: String },
    /// Updating a sample with a different shape than the original is
    /// not supported yet.
    UpdateShapeNotSupported {
        expected: Vec<u64>,
        got: Vec<u64>,
    },
    /// Updating a sample with a different byte length than the original
    /// is not supported yet.
    UpdateNumBytesNotSupported {
        expected: usize,
        got: usize,
    },
    /// Samples that exceed the minimum chunk size are not supported yet.
    SampleTooLarge {
        num_bytes: usize,
        min_chunk_size: usize,
    },
    /// The serialized data was written by an incompatible library version
    UnsupportedVersion(String),
    /// A tensor with this key already exists in the store
    TensorAlreadyExists(String),
    /// Max chunk size must be a few bytes at the very least
    InvalidMaxChunkSize(usize),
    /// An encoder cannot register a run of zero samples
    ZeroSampleCount,
    /// The sample index is past the end of the tensor
    IndexOutOfBounds { index: u64, num_samples: u64 },
    /// The key was found neither in the cache nor in the backing storage
    KeyNotFound(String),
    /// The buffer length does not match `shape.product() * dtype.itemsize()`
    BufferLenMismatch {
        buffer_len: usize,
        expected_len: usize,
    },
    /// Wrapper around an io error from the std lib
    IoError(std::io::Error),
    /// Wrapper around a serde_json error raised by tensor meta (de)serialization
    JsonError(serde_json::Error),
}

impl From<std::io::Error> for TenstoreError {
    fn from(e: std::io::Error) -> Self {
        TenstoreError::IoError(e)
    }
}

impl From<serde_json::Error> for TenstoreError {
    fn from(e: serde_json::Error) -> Self {
        TenstoreError::JsonError(e)
    }
}

impl fmt::Display for TenstoreError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TenstoreError::FullChunk {
                incoming_num_bytes,
                max_data_bytes,
            } => write!(
                f,
                "Chunk does not have space for the incoming bytes (incoming={}, max={})",
                incoming_num_bytes, max_data_bytes
            ),
            TenstoreError::CorruptedMeta(msg) => write!(f, "Corrupted meta: {}", msg),
            TenstoreError::TensorInvalidSampleShape {
                shape,
                expected_rank,
            } => write!(
                f,
                "Sample shape {:?} has rank {}, but the tensor holds rank {} samples",
                shape,
                shape.len(),
                expected_rank
            ),
            TenstoreError::TensorDtypeMismatch { expected, got } => write!(
                f,
                "Sample dtype {} does not match the tensor dtype {}",
                got, expected
            ),
            TenstoreError::FailedCast { from, to } => {
                write!(f, "A {} value is not representable as {}", from, to)
            }
            TenstoreError::SampleCompression {
                shape,
                compression,
                message,
            } => write!(
                f,
                "Failed to encode sample of shape {:?} as {}: {}",
                shape, compression, message
            ),
            TenstoreError::SampleDecompression => {
                write!(f, "The buffer could not be decoded into an array")
            }
            TenstoreError::UnsupportedCompression(name) => {
                write!(f, "Compression '{}' is not supported", name)
            }
            TenstoreError::DynamicTensor { key } => write!(
                f,
                "Tensor '{}' has samples of varying shapes, read it as a list instead",
                key
            ),
            TenstoreError::UpdateShapeNotSupported { expected, got } => write!(
                f,
                "Updating a sample with a new shape is not supported (got: {:?}, expected: {:?})",
                got, expected
            ),
            TenstoreError::UpdateNumBytesNotSupported { expected, got } => write!(
                f,
                "Updating a sample with a different byte length is not supported (got: {}, expected: {})",
                got, expected
            ),
            TenstoreError::SampleTooLarge {
                num_bytes,
                min_chunk_size,
            } => write!(
                f,
                "Samples that exceed the minimum chunk size ({} bytes) are not supported (got: {} bytes)",
                min_chunk_size, num_bytes
            ),
            TenstoreError::UnsupportedVersion(version) => {
                write!(f, "Data written by incompatible version '{}'", version)
            }
            TenstoreError::TensorAlreadyExists(key) => {
                write!(f, "Tensor '{}' already exists", key)
            }
            TenstoreError::InvalidMaxChunkSize(size) => {
                write!(f, "Max chunk size should be > 2 bytes, got {}", size)
            }
            TenstoreError::ZeroSampleCount => {
                write!(f, "Cannot register a run of zero samples")
            }
            TenstoreError::IndexOutOfBounds { index, num_samples } => write!(
                f,
                "Index {} is out of bounds for a tensor of {} samples",
                index, num_samples
            ),
            TenstoreError::KeyNotFound(key) => write!(f, "Key '{}' does not exist", key),
            TenstoreError::BufferLenMismatch {
                buffer_len,
                expected_len,
            } => write!(
                f,
                "The len of the buffer ({}) does not match the sample's shape and dtype ({})",
                buffer_len, expected_len
            ),
            TenstoreError::IoError(e) => write!(f, "IoError: {}", e),
            TenstoreError::JsonError(e) => write!(f, "JsonError: {}", e),
        }
    }
}

impl std::error::Error for TenstoreError {}

pub type Result<T> = std::result::Result<T, TenstoreError>;
