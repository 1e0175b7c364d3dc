//! Per-sample byte ranges inside a chunk's data section

use super::RleTable;

const NUM_BYTES_COLUMN: usize = 0;
const START_BYTE_COLUMN: usize = 1;

/// Encodes the `(start_byte, end_byte)` range of every sample in a
/// chunk.
///
/// A row stores the per-sample byte length and the start byte of the
/// row's first sample; positions inside the row are derived, so a run
/// of equal-length samples costs one row no matter how long it is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BytePositionsEncoder {
    table: RleTable,
}

impl BytePositionsEncoder {
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

    /// Registers `num_samples` samples of `num_bytes` each.
    pub fn add_byte_position(&mut self, num_bytes: u64, num_samples: u64) -> crate::Result<()> {
        let combines = !self.table.is_empty() && {
            let last_row = self.table.num_rows() - 1;
            self.table.payload(last_row)[NUM_BYTES_COLUMN] == num_bytes
        };
        // a new row starts where the previous one ends
        let start_byte = self.num_bytes_encoded();
        self.table
            .register(&[num_bytes, start_byte], num_samples, combines)
    }

    /// The `(start_byte, end_byte)` range of the sample at
    /// `local_sample_index`.
    pub fn byte_position(&self, local_sample_index: u64) -> crate::Result<(u64, u64)> {
        let row_index = self.table.translate_index(local_sample_index)?;
        let payload = self.table.payload(row_index);
        let num_bytes = payload[NUM_BYTES_COLUMN];

        let index_in_row = local_sample_index - self.table.row_start(row_index);
        let start = payload[START_BYTE_COLUMN] + index_in_row * num_bytes;
        Ok((start, start + num_bytes))
    }

    /// Total bytes covered by all rows up to and including `row_index`.
    pub fn num_bytes_encoded_under_row(&self, row_index: usize) -> u64 {
        let payload = self.table.payload(row_index);
        payload[START_BYTE_COLUMN]
            + self.table.num_samples_at(row_index) * payload[NUM_BYTES_COLUMN]
    }

    /// Total bytes covered by the whole encoding.
    pub fn num_bytes_encoded(&self) -> u64 {
        if self.table.is_empty() {
            0
        } else {
            self.num_bytes_encoded_under_row(self.table.num_rows() - 1)
        }
    }

    /// Re-registers the byte length of one sample, in place.
    ///
    /// Only meaningful while the length does not change (the no-change
    /// action); start bytes of later rows are never rewritten.
    pub fn set_num_bytes(&mut self, local_sample_index: u64, num_bytes: u64) -> crate::Result<()> {
        let row_index = self.table.translate_index(local_sample_index)?;
        let start_byte = self.table.payload(row_index)[START_BYTE_COLUMN];
        self.table.set(local_sample_index, &[num_bytes, start_byte], |row| {
            row[NUM_BYTES_COLUMN] == num_bytes
        })
    }
}
