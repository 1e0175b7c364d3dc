//! Per-sample shape tracking inside a chunk

use super::RleTable;
use crate::TenstoreError;

/// Encodes the shape of every sample a chunk holds.
///
/// One payload column per axis; a run of equal-shape samples collapses
/// into a single row, so uniform tensors index their shapes in O(1).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShapeEncoder {
    table: RleTable,
}

impl ShapeEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_table(table: RleTable) -> Self {
        Self { table }
    }

    pub(crate) fn table(&self) -> &RleTable {
        &self.table
    }

    pub fn num_samples(&self) -> u64 {
        self.table.num_samples()
    }

    pub fn num_rows(&self) -> usize {
        self.table.num_rows()
    }

    /// Registers `num_samples` samples of the given shape.
    ///
    /// All samples in one encoder share a rank; the tensor meta enforces
    /// this before anything reaches a chunk, so a mismatch here means a
    /// bookkeeping bug upstream.
    pub fn add_shape(&mut self, shape: &[u64], num_samples: u64) -> crate::Result<()> {
        if !self.table.is_empty() && self.table.width() != shape.len() + 1 {
            return Err(TenstoreError::TensorInvalidSampleShape {
                shape: shape.to_vec(),
                expected_rank: self.table.width() - 1,
            });
        }
        let combines = !self.table.is_empty() && {
            let last_row = self.table.num_rows() - 1;
            self.table.payload(last_row) == shape
        };
        self.table.register(shape, num_samples, combines)
    }

    /// The shape of the sample at `local_sample_index`.
    pub fn shape(&self, local_sample_index: u64) -> crate::Result<Vec<u64>> {
        let row_index = self.table.translate_index(local_sample_index)?;
        Ok(self.table.payload(row_index).to_vec())
    }

    /// Re-points one sample at a new shape, in place.
    pub fn set_shape(&mut self, local_sample_index: u64, shape: &[u64]) -> crate::Result<()> {
        if self.table.width() != shape.len() + 1 {
            return Err(TenstoreError::TensorInvalidSampleShape {
                shape: shape.to_vec(),
                expected_rank: self.table.width().saturating_sub(1),
            });
        }
        self.table
            .set(local_sample_index, shape, |row| &row[..shape.len()] == shape)
    }
}
