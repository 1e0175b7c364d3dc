//! Selection of samples along a tensor's first axis.

use crate::TenstoreError;

/// Which global sample indices a read targets.
///
/// A [`Index::Single`] selection reads one sample and hands it back
/// without a leading axis; ranges and full reads keep one entry per
/// selected sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Index {
    /// Every sample in the tensor.
    All,
    /// One sample.
    Single(u64),
    /// The half-open range `start..stop`, clamped to the tensor length.
    Range { start: u64, stop: u64 },
}

impl Index {
    /// Materializes the selected global sample indices for a tensor of
    /// `num_samples` samples.
    pub fn values(&self, num_samples: u64) -> crate::Result<Vec<u64>> {
        match *self {
            Index::All => Ok((0..num_samples).collect()),
            Index::Single(index) => {
                if index >= num_samples {
                    return Err(TenstoreError::IndexOutOfBounds { index, num_samples });
                }
                Ok(vec![index])
            }
            Index::Range { start, stop } => {
                let stop = stop.min(num_samples);
                if start >= stop {
                    return Ok(Vec::new());
                }
                Ok((start..stop).collect())
            }
        }
    }

    /// Whether the selection picks exactly one sample by index, in which
    /// case reads do not add a leading axis to the result.
    pub fn is_single(&self) -> bool {
        matches!(self, Index::Single(_))
    }
}
