//! Mapping from global sample indices to the chunks that hold them

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use super::{read_table_u64, write_table_u64, RleTable};
use crate::storage::Cachable;
use crate::TenstoreError;

const CHUNK_ID_COLUMN: usize = 0;

/// Width in characters of a chunk's name, the zero-padded hex form of
/// its id.
pub const CHUNK_NAME_LEN: usize = 16;

/// Maps every global sample index to the id of the chunk storing it.
///
/// Chunk ids are drawn at random so chunks are addressable without any
/// central counter; the encoder re-rolls on the (astronomically rare)
/// collision within one tensor. A freshly generated id is held back
/// until its first sample is registered, so the table only ever
/// contains rows that cover at least one sample.
pub struct ChunkIdEncoder {
    table: RleTable,
    pending_id: Option<u64>,
    rng: SmallRng,
}

impl ChunkIdEncoder {
    pub fn new() -> Self {
        Self {
            table: RleTable::new(),
            pending_id: None,
            rng: SmallRng::from_entropy(),
        }
    }

    /// An encoder whose id sequence is reproducible. Meant for tests.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            table: RleTable::new(),
            pending_id: None,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    pub(crate) fn table(&self) -> &RleTable {
        &self.table
    }

    pub fn num_samples(&self) -> u64 {
        self.table.num_samples()
    }

    /// Number of chunks with at least one registered sample.
    pub fn num_chunks(&self) -> usize {
        self.table.num_rows()
    }

    fn contains_id(&self, id: u64) -> bool {
        if self.pending_id == Some(id) {
            return true;
        }
        (0..self.table.num_rows()).any(|row| self.table.payload(row)[CHUNK_ID_COLUMN] == id)
    }

    /// Draws a fresh nonzero chunk id.
    ///
    /// The id becomes the target of the next
    /// [`register_samples_to_last_chunk_id`](Self::register_samples_to_last_chunk_id)
    /// call; generating another id before registering abandons the
    /// previous one.
    pub fn generate_chunk_id(&mut self) -> u64 {
        loop {
            let id: u64 = self.rng.gen();
            if id != 0 && !self.contains_id(id) {
                self.pending_id = Some(id);
                return id;
            }
        }
    }

    /// Attributes the next `num_samples` samples to the most recent
    /// chunk id.
    pub fn register_samples_to_last_chunk_id(&mut self, num_samples: u64) -> crate::Result<()> {
        if num_samples == 0 {
            return Err(TenstoreError::ZeroSampleCount);
        }
        match self.pending_id.take() {
            Some(id) => self.table.register(&[id], num_samples, false),
            None => {
                if self.table.is_empty() {
                    return Err(TenstoreError::CorruptedMeta(
                        "cannot register samples before any chunk id was generated".to_string(),
                    ));
                }
                self.table.register(&[], num_samples, true)
            }
        }
    }

    /// The id of the chunk holding the sample at `global_sample_index`.
    pub fn chunk_id(&self, global_sample_index: u64) -> crate::Result<u64> {
        let row_index = self.table.translate_index(global_sample_index)?;
        Ok(self.table.payload(row_index)[CHUNK_ID_COLUMN])
    }

    /// The id of the `chunk_index`-th chunk.
    pub fn id_at_chunk(&self, chunk_index: usize) -> crate::Result<u64> {
        if chunk_index >= self.table.num_rows() {
            return Err(TenstoreError::IndexOutOfBounds {
                index: chunk_index as u64,
                num_samples: self.table.num_rows() as u64,
            });
        }
        Ok(self.table.payload(chunk_index)[CHUNK_ID_COLUMN])
    }

    pub fn last_chunk_id(&self) -> Option<u64> {
        if self.table.is_empty() {
            None
        } else {
            Some(self.table.payload(self.table.num_rows() - 1)[CHUNK_ID_COLUMN])
        }
    }

    /// Converts a global sample index into the index of that sample
    /// within its chunk.
    pub fn local_sample_index(&self, global_sample_index: u64) -> crate::Result<u64> {
        let row_index = self.table.translate_index(global_sample_index)?;
        Ok(global_sample_index - self.table.row_start(row_index))
    }

    /// The chunk's name under the storage key layout: fixed-width
    /// lowercase hex.
    pub fn name_from_id(id: u64) -> String {
        format!("{:016x}", id)
    }
}

impl Default for ChunkIdEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Cachable for ChunkIdEncoder {
    fn nbytes(&self) -> usize {
        8 + self.table.cells().len() * 8
    }

    fn tobytes(&self) -> crate::Result<Vec<u8>> {
        let mut buffer = Vec::with_capacity(self.nbytes());
        write_table_u64(&mut buffer, &self.table)?;
        Ok(buffer)
    }

    fn frombytes(buffer: &[u8]) -> crate::Result<Self> {
        let table = read_table_u64(&mut &buffer[..])?;
        Ok(Self {
            table,
            pending_id: None,
            rng: SmallRng::from_entropy(),
        })
    }
}
