//! Aggregate invariants of one tensor

use serde::{Deserialize, Serialize};

use crate::array::Dtype;
use crate::compression::Compression;
use crate::constants::FORMAT_VERSION;
use crate::storage::Cachable;
use crate::TenstoreError;

/// Per-tensor invariants, persisted as a small JSON document.
///
/// `length` counts registered samples and only ever grows. `min_shape`
/// and `max_shape` hold the per-axis extremes over every sample the
/// tensor has seen; their rank pins the rank of all future samples.
///
/// The meta is always updated *before* the sample payload is written:
/// after a crash the meta may claim more samples than the chunks hold,
/// which is detected and repaired when the tensor is opened, whereas
/// payload bytes without meta would be silently lost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorMeta {
    pub version: String,
    pub dtype: Option<Dtype>,
    pub sample_compression: Compression,
    pub length: u64,
    pub min_shape: Vec<u64>,
    pub max_shape: Vec<u64>,
}

impl TensorMeta {
    pub fn new(dtype: Option<Dtype>, sample_compression: Compression) -> Self {
        Self {
            version: FORMAT_VERSION.to_string(),
            dtype,
            sample_compression,
            length: 0,
            min_shape: Vec::new(),
            max_shape: Vec::new(),
        }
    }

    /// Checks that a sample can join this tensor without mutating
    /// anything.
    pub fn check_compatibility(&self, shape: &[u64], dtype: Dtype) -> crate::Result<()> {
        if let Some(expected) = self.dtype {
            if expected != dtype {
                return Err(TenstoreError::TensorDtypeMismatch {
                    expected,
                    got: dtype,
                });
            }
        }
        if self.length > 0 && self.min_shape.len() != shape.len() {
            return Err(TenstoreError::TensorInvalidSampleShape {
                shape: shape.to_vec(),
                expected_rank: self.min_shape.len(),
            });
        }
        Ok(())
    }

    /// Registers `num_samples` samples of the given shape and dtype.
    ///
    /// Callers must run [`check_compatibility`](Self::check_compatibility)
    /// first; this method assumes the sample fits the tensor.
    pub fn update(&mut self, shape: &[u64], dtype: Dtype, num_samples: u64) {
        if self.length == 0 {
            self.dtype = Some(dtype);
            self.min_shape = shape.to_vec();
            self.max_shape = shape.to_vec();
        } else {
            for (axis, &dim) in shape.iter().enumerate() {
                self.min_shape[axis] = self.min_shape[axis].min(dim);
                self.max_shape[axis] = self.max_shape[axis].max(dim);
            }
        }
        self.length += num_samples;
    }
}

impl Cachable for TensorMeta {
    fn nbytes(&self) -> usize {
        // the JSON document is tiny, an exact serialization is cheap
        serde_json::to_vec(self).map(|b| b.len()).unwrap_or(0)
    }

    fn tobytes(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn frombytes(buffer: &[u8]) -> crate::Result<Self> {
        Ok(serde_json::from_slice(buffer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_pins_dtype_and_rank() {
        let mut meta = TensorMeta::new(None, Compression::Uncompressed);
        meta.check_compatibility(&[2, 3], Dtype::I32).unwrap();
        meta.update(&[2, 3], Dtype::I32, 1);

        assert_eq!(meta.dtype, Some(Dtype::I32));
        assert_eq!(meta.length, 1);
        assert_eq!(meta.min_shape, vec![2, 3]);
        assert_eq!(meta.max_shape, vec![2, 3]);

        assert!(matches!(
            meta.check_compatibility(&[2, 3], Dtype::F32),
            Err(TenstoreError::TensorDtypeMismatch { .. })
        ));
        assert!(matches!(
            meta.check_compatibility(&[2, 3, 1], Dtype::I32),
            Err(TenstoreError::TensorInvalidSampleShape { .. })
        ));
    }

    #[test]
    fn test_shape_extremes_track_per_axis() {
        let mut meta = TensorMeta::new(Some(Dtype::U8), Compression::Uncompressed);
        meta.update(&[10, 10], Dtype::U8, 1);
        meta.update(&[5, 20], Dtype::U8, 1);

        assert_eq!(meta.min_shape, vec![5, 10]);
        assert_eq!(meta.max_shape, vec![10, 20]);
        assert_eq!(meta.length, 2);
    }

    #[test]
    fn test_preset_dtype_is_enforced_before_first_sample() {
        let meta = TensorMeta::new(Some(Dtype::U8), Compression::Jpeg);
        assert!(meta.check_compatibility(&[4, 4, 3], Dtype::F64).is_err());
        assert!(meta.check_compatibility(&[4, 4, 3], Dtype::U8).is_ok());
    }

    #[test]
    fn test_json_round_trip() {
        let mut meta = TensorMeta::new(Some(Dtype::F32), Compression::Png);
        meta.update(&[128, 128, 3], Dtype::F32, 12);

        let bytes = meta.tobytes().unwrap();
        let read = TensorMeta::frombytes(&bytes).unwrap();
        assert_eq!(read, meta);

        // field names are part of the storage format
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("\"dtype\":\"f32\""));
        assert!(text.contains("\"sample_compression\":\"png\""));
        assert!(text.contains("\"length\":12"));
    }
}
