//! Chunks: the blobs samples are packed into
//!
//! A chunk is the atomic I/O unit of a tensor. Its payload is the
//! concatenation of sample buffers with no delimiters; two run-length
//! encoded header tables (shapes and byte positions) locate every
//! sample inside it.
//!
//! On-disk layout, little-endian throughout, every section prefixed by
//! a `u64` byte count:
//!
//! ```text
//! +---------+----------------+------------------------+------------+
//! | version | shapes table   | byte positions table   | data bytes |
//! | (utf8)  | rows, cols,    | rows, cols,            |            |
//! |         | cells (u32)    | cells (u32)            |            |
//! +---------+----------------+------------------------+------------+
//! ```

use std::io::{Read, Write};
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::constants::FORMAT_VERSION;
use crate::meta::encode::byte_positions::BytePositionsEncoder;
use crate::meta::encode::shape::ShapeEncoder;
use crate::meta::encode::{read_table_u32, table_nbytes_u32, write_table_u32};
use crate::storage::Cachable;
use crate::TenstoreError;

/// The payload buffer of a chunk.
///
/// Deserialized chunks hold a shared read-only buffer; the first
/// mutation promotes it to owned bytes. Reading never pays for a copy.
#[derive(Debug, Clone)]
enum ChunkData {
    Shared(Arc<[u8]>),
    Owned(Vec<u8>),
}

impl ChunkData {
    fn as_slice(&self) -> &[u8] {
        match self {
            ChunkData::Shared(data) => data,
            ChunkData::Owned(data) => data,
        }
    }

    fn len(&self) -> usize {
        self.as_slice().len()
    }

    fn to_mut(&mut self) -> &mut Vec<u8> {
        if let ChunkData::Shared(data) = self {
            *self = ChunkData::Owned(data.to_vec());
        }
        match self {
            ChunkData::Owned(data) => data,
            ChunkData::Shared(_) => unreachable!("buffer was just promoted"),
        }
    }
}

/// Blob storage of whole samples.
///
/// The engine decides which chunk a sample lands in; the chunk itself
/// only enforces that it never stores a partial sample and that its
/// headers always describe its data exactly.
#[derive(Debug, Clone)]
pub struct Chunk {
    shapes: ShapeEncoder,
    byte_positions: BytePositionsEncoder,
    data: ChunkData,
}

impl Default for Chunk {
    fn default() -> Self {
        Self::new()
    }
}

impl Chunk {
    pub fn new() -> Self {
        Self {
            shapes: ShapeEncoder::new(),
            byte_positions: BytePositionsEncoder::new(),
            data: ChunkData::Owned(Vec::new()),
        }
    }

    pub fn num_samples(&self) -> u64 {
        self.byte_positions.num_samples()
    }

    pub fn num_data_bytes(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[u8] {
        self.data.as_slice()
    }

    pub fn shapes(&self) -> &ShapeEncoder {
        &self.shapes
    }

    pub fn byte_positions(&self) -> &BytePositionsEncoder {
        &self.byte_positions
    }

    /// True while the chunk's data is below the engine's minimum size
    /// target.
    pub fn is_under_min_space(&self, min_data_bytes_target: usize) -> bool {
        self.num_data_bytes() < min_data_bytes_target
    }

    pub fn has_space_for(&self, num_bytes: usize, max_data_bytes: usize) -> bool {
        self.num_data_bytes() + num_bytes <= max_data_bytes
    }

    /// Stores `buffer` as one whole sample.
    ///
    /// `buffer` may be empty (an empty sample still occupies a header
    /// slot). Fails with [`TenstoreError::FullChunk`] when the chunk
    /// does not have space; the engine pre-checks, so callers normally
    /// never see that error.
    pub fn append_sample(
        &mut self,
        buffer: &[u8],
        max_data_bytes: usize,
        shape: &[u64],
    ) -> crate::Result<()> {
        let incoming_num_bytes = buffer.len();
        if !self.has_space_for(incoming_num_bytes, max_data_bytes) {
            return Err(TenstoreError::FullChunk {
                incoming_num_bytes,
                max_data_bytes,
            });
        }

        // headers first: a rejected shape must not leave stray bytes
        self.shapes.add_shape(shape, 1)?;
        self.byte_positions
            .add_byte_position(incoming_num_bytes as u64, 1)?;
        self.data.to_mut().extend_from_slice(buffer);
        Ok(())
    }

    /// Overwrites one sample in place.
    ///
    /// The incoming buffer must match the stored sample's shape and
    /// byte length exactly; anything else would shift every following
    /// sample and is not supported.
    pub fn update_sample(
        &mut self,
        local_sample_index: u64,
        buffer: &[u8],
        shape: &[u64],
    ) -> crate::Result<()> {
        let expected_shape = self.shapes.shape(local_sample_index)?;
        if expected_shape != shape {
            return Err(TenstoreError::UpdateShapeNotSupported {
                expected: expected_shape,
                got: shape.to_vec(),
            });
        }

        let (start_byte, end_byte) = self.byte_positions.byte_position(local_sample_index)?;
        let expected_num_bytes = (end_byte - start_byte) as usize;
        if buffer.len() != expected_num_bytes {
            return Err(TenstoreError::UpdateNumBytesNotSupported {
                expected: expected_num_bytes,
                got: buffer.len(),
            });
        }

        let data = self.data.to_mut();
        data[start_byte as usize..end_byte as usize].copy_from_slice(buffer);
        self.byte_positions
            .set_num_bytes(local_sample_index, buffer.len() as u64)
    }

    /// The stored bytes of one sample.
    pub fn sample_bytes(&self, local_sample_index: u64) -> crate::Result<&[u8]> {
        let (start_byte, end_byte) = self.byte_positions.byte_position(local_sample_index)?;
        Ok(&self.data.as_slice()[start_byte as usize..end_byte as usize])
    }

    /// The stored shape of one sample.
    pub fn sample_shape(&self, local_sample_index: u64) -> crate::Result<Vec<u64>> {
        self.shapes.shape(local_sample_index)
    }
}

fn major_version(version: &str) -> crate::Result<u64> {
    version
        .split('.')
        .next()
        .and_then(|major| major.parse().ok())
        .ok_or_else(|| {
            TenstoreError::CorruptedMeta(format!("malformed version string '{}'", version))
        })
}

impl Cachable for Chunk {
    /// Serialized size, computable without serializing. This is what the
    /// cache charges against its byte budget.
    fn nbytes(&self) -> usize {
        8 + FORMAT_VERSION.len()
            + 8
            + table_nbytes_u32(self.shapes.table())
            + 8
            + table_nbytes_u32(self.byte_positions.table())
            + 8
            + self.data.len()
    }

    fn tobytes(&self) -> crate::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.nbytes());

        out.write_u64::<LittleEndian>(FORMAT_VERSION.len() as u64)?;
        out.write_all(FORMAT_VERSION.as_bytes())?;

        out.write_u64::<LittleEndian>(table_nbytes_u32(self.shapes.table()) as u64)?;
        write_table_u32(&mut out, self.shapes.table())?;

        out.write_u64::<LittleEndian>(table_nbytes_u32(self.byte_positions.table()) as u64)?;
        write_table_u32(&mut out, self.byte_positions.table())?;

        out.write_u64::<LittleEndian>(self.data.len() as u64)?;
        out.write_all(self.data.as_slice())?;
        Ok(out)
    }

    fn frombytes(buffer: &[u8]) -> crate::Result<Self> {
        if buffer.is_empty() {
            return Ok(Self::new());
        }
        let mut src = buffer;

        let version_len = src.read_u64::<LittleEndian>()? as usize;
        if version_len > src.len() {
            return Err(TenstoreError::CorruptedMeta(
                "version length overruns the chunk buffer".to_string(),
            ));
        }
        let mut version_bytes = vec![0u8; version_len];
        src.read_exact(&mut version_bytes)?;
        let version = String::from_utf8(version_bytes).map_err(|_| {
            TenstoreError::CorruptedMeta("chunk version is not valid utf8".to_string())
        })?;
        if major_version(&version)? != major_version(FORMAT_VERSION)? {
            return Err(TenstoreError::UnsupportedVersion(version));
        }

        let shapes_len = src.read_u64::<LittleEndian>()? as usize;
        let shapes = read_table_u32(&mut src)?;
        if table_nbytes_u32(&shapes) != shapes_len {
            return Err(TenstoreError::CorruptedMeta(
                "shapes table does not match its section length".to_string(),
            ));
        }

        let byte_positions_len = src.read_u64::<LittleEndian>()? as usize;
        let byte_positions = read_table_u32(&mut src)?;
        if table_nbytes_u32(&byte_positions) != byte_positions_len {
            return Err(TenstoreError::CorruptedMeta(
                "byte positions table does not match its section length".to_string(),
            ));
        }

        let data_len = src.read_u64::<LittleEndian>()? as usize;
        if data_len != src.len() {
            return Err(TenstoreError::CorruptedMeta(
                "data section does not match its length prefix".to_string(),
            ));
        }

        let shapes = ShapeEncoder::from_table(shapes);
        let byte_positions = BytePositionsEncoder::from_table(byte_positions);
        if shapes.num_samples() != byte_positions.num_samples() {
            return Err(TenstoreError::CorruptedMeta(format!(
                "shape and byte position headers disagree ({} vs {} samples)",
                shapes.num_samples(),
                byte_positions.num_samples()
            )));
        }
        if byte_positions.num_bytes_encoded() != data_len as u64 {
            return Err(TenstoreError::CorruptedMeta(format!(
                "byte positions cover {} bytes but the chunk holds {}",
                byte_positions.num_bytes_encoded(),
                data_len
            )));
        }

        Ok(Self {
            shapes,
            byte_positions,
            data: ChunkData::Shared(Arc::from(src)),
        })
    }
}
