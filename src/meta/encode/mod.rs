//! Run-length encoded lookup tables for per-sample metadata
//!
//! The three encoders ([`shape::ShapeEncoder`],
//! [`byte_positions::BytePositionsEncoder`] and
//! [`chunk_id::ChunkIdEncoder`]) all share the same layout: a 2-D table
//! whose right-most column holds the *last seen index*, the largest
//! global sample index the row applies to. Rows are strictly increasing
//! in that column, so resolving a sample index is a binary search over
//! it.
//!
//! Best case every sample shares one value and the whole tensor is a
//! single row; worst case every sample differs and the table degrades
//! to one row per sample with a log(N) lookup.

pub mod byte_positions;
pub mod chunk_id;
pub mod shape;

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::TenstoreError;

/// The 2-D table backing every encoder.
///
/// `width` is the number of columns (payload columns plus the last seen
/// index column) and is fixed by the first registered row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct RleTable {
    cells: Vec<u64>,
    width: usize,
}

impl RleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a table from its serialized cells.
    ///
    /// A width of 1 is legal: rank-0 samples leave a shape table with
    /// nothing but the last seen index column.
    pub fn from_cells(cells: Vec<u64>, width: usize) -> crate::Result<Self> {
        if width == 0 || cells.len() % width != 0 {
            return Err(TenstoreError::CorruptedMeta(format!(
                "encoder table of {} cells cannot have {} columns",
                cells.len(),
                width
            )));
        }
        Ok(Self { cells, width })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn cells(&self) -> &[u64] {
        &self.cells
    }

    pub fn num_rows(&self) -> usize {
        if self.width == 0 {
            0
        } else {
            self.cells.len() / self.width
        }
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    pub fn row(&self, row_index: usize) -> &[u64] {
        &self.cells[row_index * self.width..(row_index + 1) * self.width]
    }

    fn row_mut(&mut self, row_index: usize) -> &mut [u64] {
        &mut self.cells[row_index * self.width..(row_index + 1) * self.width]
    }

    /// Payload columns of a row, without the last seen index.
    pub fn payload(&self, row_index: usize) -> &[u64] {
        let row = self.row(row_index);
        &row[..self.width - 1]
    }

    pub fn last_index_of_row(&self, row_index: usize) -> u64 {
        self.row(row_index)[self.width - 1]
    }

    /// First global sample index a row covers.
    pub fn row_start(&self, row_index: usize) -> u64 {
        if row_index == 0 {
            0
        } else {
            self.last_index_of_row(row_index - 1) + 1
        }
    }

    pub fn num_samples(&self) -> u64 {
        if self.is_empty() {
            0
        } else {
            self.last_index_of_row(self.num_rows() - 1) + 1
        }
    }

    /// How many samples a single row covers.
    pub fn num_samples_at(&self, row_index: usize) -> u64 {
        self.last_index_of_row(row_index) + 1 - self.row_start(row_index)
    }

    /// Finds the row that covers `global_sample_index`.
    ///
    /// Binary search over the last seen index column, worst case log(N)
    /// in the number of rows.
    pub fn translate_index(&self, global_sample_index: u64) -> crate::Result<usize> {
        let num_samples = self.num_samples();
        if global_sample_index >= num_samples {
            return Err(TenstoreError::IndexOutOfBounds {
                index: global_sample_index,
                num_samples,
            });
        }

        let mut low = 0;
        let mut high = self.num_rows();
        while low < high {
            let mid = (low + high) / 2;
            if self.last_index_of_row(mid) < global_sample_index {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        Ok(low)
    }

    /// Registers a run of `num_samples` samples.
    ///
    /// When `combines` is true the run extends the last row and
    /// `payload` is ignored; otherwise a new row is appended. The first
    /// row registered fixes the table width.
    pub fn register(
        &mut self,
        payload: &[u64],
        num_samples: u64,
        combines: bool,
    ) -> crate::Result<()> {
        if num_samples == 0 {
            return Err(TenstoreError::ZeroSampleCount);
        }

        if self.is_empty() {
            self.width = payload.len() + 1;
            self.cells.reserve(self.width);
            self.cells.extend_from_slice(payload);
            self.cells.push(num_samples - 1);
        } else if combines {
            let last_row = self.num_rows() - 1;
            let width = self.width;
            self.row_mut(last_row)[width - 1] += num_samples;
        } else {
            debug_assert_eq!(payload.len() + 1, self.width);
            let next_last_index = self.num_samples() - 1 + num_samples;
            self.cells.extend_from_slice(payload);
            self.cells.push(next_last_index);
        }
        Ok(())
    }

    fn insert_row(&mut self, row_index: usize, payload: &[u64], last_index: u64) {
        let at = row_index * self.width;
        let mut row = Vec::with_capacity(self.width);
        row.extend_from_slice(payload);
        row.push(last_index);
        self.cells.splice(at..at, row);
    }

    fn remove_rows(&mut self, row_index: usize, count: usize) {
        let start = row_index * self.width;
        self.cells.drain(start..start + count * self.width);
    }

    /// Points sample `global_sample_index` at a new value, in place.
    ///
    /// `combine` decides whether a row's value is compatible with the
    /// incoming one. The cheapest applicable action wins; their order
    /// matters and must not be rearranged:
    ///
    /// 0. no change (row count delta 0)
    /// 1. squeeze (-2)
    /// 2. move up (0, or -1 when the moved row is drained)
    /// 3. move down (0, or -1 when the moved row is drained)
    /// 4. replace (0)
    /// 5. split up (+1)
    /// 6. split down (+1)
    /// 7. split middle (+2)
    ///
    /// Boundary moves only apply when the index sits at the edge of its
    /// row that touches the combinable neighbor.
    pub fn set(
        &mut self,
        global_sample_index: u64,
        payload: &[u64],
        combine: impl Fn(&[u64]) -> bool,
    ) -> crate::Result<()> {
        let row_index = self.translate_index(global_sample_index)?;
        if combine(self.row(row_index)) {
            return Ok(());
        }

        let width = self.width;
        let first = self.row_start(row_index);
        let last = self.last_index_of_row(row_index);
        let is_single = first == last;

        let has_above = row_index > 0;
        let has_below = row_index + 1 < self.num_rows();
        let can_combine_above = has_above && combine(self.row(row_index - 1));
        let can_combine_below = has_below && combine(self.row(row_index + 1));

        if is_single && can_combine_above && can_combine_below {
            // squeeze: the row above absorbs this row and the one below
            let below_last = self.last_index_of_row(row_index + 1);
            self.row_mut(row_index - 1)[width - 1] = below_last;
            self.remove_rows(row_index, 2);
        } else if can_combine_above && !can_combine_below && global_sample_index == first {
            // move the row boundary up
            self.row_mut(row_index - 1)[width - 1] += 1;
            if is_single {
                self.remove_rows(row_index, 1);
            }
        } else if can_combine_below && !can_combine_above && global_sample_index == last {
            // move the row boundary down
            if is_single {
                self.remove_rows(row_index, 1);
            } else {
                self.row_mut(row_index)[width - 1] -= 1;
            }
        } else if is_single {
            // replace the payload outright
            self.row_mut(row_index)[..width - 1].copy_from_slice(payload);
        } else if global_sample_index == first {
            // split up
            self.insert_row(row_index, payload, global_sample_index);
        } else if global_sample_index == last {
            // split down
            self.row_mut(row_index)[width - 1] = last - 1;
            self.insert_row(row_index + 1, payload, global_sample_index);
        } else {
            // split middle
            let old_payload = self.payload(row_index).to_vec();
            self.row_mut(row_index)[width - 1] = global_sample_index - 1;
            self.insert_row(row_index + 1, payload, global_sample_index);
            self.insert_row(row_index + 2, &old_payload, last);
        }
        Ok(())
    }
}

/// Writes a table as `u32` cells: `rows`, `cols`, then the cells in
/// row-major order. This is the form chunk headers embed.
pub(crate) fn write_table_u32<W: Write>(dst: &mut W, table: &RleTable) -> crate::Result<()> {
    dst.write_u32::<LittleEndian>(table.num_rows() as u32)?;
    dst.write_u32::<LittleEndian>(table.width() as u32)?;
    for &cell in table.cells() {
        dst.write_u32::<LittleEndian>(cell as u32)?;
    }
    Ok(())
}

pub(crate) fn read_table_u32<R: Read>(src: &mut R) -> crate::Result<RleTable> {
    let rows = src.read_u32::<LittleEndian>()? as usize;
    let cols = src.read_u32::<LittleEndian>()? as usize;
    if rows == 0 {
        return Ok(RleTable::new());
    }
    let mut cells = Vec::with_capacity(rows * cols);
    for _ in 0..rows * cols {
        cells.push(u64::from(src.read_u32::<LittleEndian>()?));
    }
    RleTable::from_cells(cells, cols)
}

/// Same framing as [`write_table_u32`] with full-width `u64` cells, for
/// tables that hold chunk ids and tensor-scale sample counts.
pub(crate) fn write_table_u64<W: Write>(dst: &mut W, table: &RleTable) -> crate::Result<()> {
    dst.write_u32::<LittleEndian>(table.num_rows() as u32)?;
    dst.write_u32::<LittleEndian>(table.width() as u32)?;
    for &cell in table.cells() {
        dst.write_u64::<LittleEndian>(cell)?;
    }
    Ok(())
}

pub(crate) fn read_table_u64<R: Read>(src: &mut R) -> crate::Result<RleTable> {
    let rows = src.read_u32::<LittleEndian>()? as usize;
    let cols = src.read_u32::<LittleEndian>()? as usize;
    if rows == 0 {
        return Ok(RleTable::new());
    }
    let mut cells = Vec::with_capacity(rows * cols);
    for _ in 0..rows * cols {
        cells.push(src.read_u64::<LittleEndian>()?);
    }
    RleTable::from_cells(cells, cols)
}

/// Serialized size in bytes of a table under the `u32` cell framing.
pub(crate) fn table_nbytes_u32(table: &RleTable) -> usize {
    8 + table.cells().len() * 4
}
