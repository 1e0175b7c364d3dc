//! The engine that packs samples into chunks and reads them back
//!
//! Every sample lives in exactly one chunk; chunks never store partial
//! samples. The engine owns no mutable state of its own: the tensor
//! meta, the chunk id encoder and every chunk live in the cache and are
//! re-resolved through it on each operation, so a flush can happen at
//! any cache boundary without the engine noticing.

use std::sync::Arc;

use log::{debug, warn};
use parking_lot::RwLock;

use crate::array::{Array, Dtype};
use crate::chunk::Chunk;
use crate::compression::{decompress_array, Compression};
use crate::constants::DEFAULT_MAX_CHUNK_SIZE;
use crate::index::Index;
use crate::keys::{chunk_id_encoder_key, chunk_key, tensor_meta_key};
use crate::meta::encode::chunk_id::ChunkIdEncoder;
use crate::meta::TensorMeta;
use crate::sample::Sample;
use crate::storage::LRUCache;
use crate::TenstoreError;

/// Minimum number of chunks that can hold `size` bytes of data.
fn min_chunk_ct_for_data_size(chunk_max_data_bytes: usize, size: usize) -> usize {
    size.div_ceil(chunk_max_data_bytes)
}

/// Configures and constructs a [`ChunkEngine`].
pub struct ChunkEngineBuilder {
    key: String,
    max_chunk_size: usize,
    dtype: Option<Dtype>,
    sample_compression: Compression,
    chunk_id_seed: Option<u64>,
}

impl ChunkEngineBuilder {
    fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            dtype: None,
            sample_compression: Compression::Uncompressed,
            chunk_id_seed: None,
        }
    }

    /// Hard upper bound on a chunk's data section.
    pub fn max_chunk_size(mut self, max_chunk_size: usize) -> Self {
        self.max_chunk_size = max_chunk_size;
        self
    }

    /// Pins the tensor dtype up front instead of inferring it from the
    /// first sample. Only meaningful for [`create`](Self::create).
    pub fn dtype(mut self, dtype: Dtype) -> Self {
        self.dtype = Some(dtype);
        self
    }

    /// Codec applied to every sample. Only meaningful for
    /// [`create`](Self::create).
    pub fn sample_compression(mut self, sample_compression: Compression) -> Self {
        self.sample_compression = sample_compression;
        self
    }

    /// Makes chunk id generation reproducible. Meant for tests.
    pub fn chunk_id_seed(mut self, seed: u64) -> Self {
        self.chunk_id_seed = Some(seed);
        self
    }

    fn build(self, cache: Arc<LRUCache>) -> crate::Result<ChunkEngine> {
        if self.max_chunk_size <= 2 {
            return Err(TenstoreError::InvalidMaxChunkSize(self.max_chunk_size));
        }
        Ok(ChunkEngine {
            key: self.key,
            cache,
            min_chunk_size: self.max_chunk_size / 2,
            max_chunk_size: self.max_chunk_size,
            chunk_id_seed: self.chunk_id_seed,
        })
    }

    /// Creates a fresh tensor and returns its engine.
    pub fn create(self, cache: Arc<LRUCache>) -> crate::Result<ChunkEngine> {
        let dtype = self.dtype;
        let sample_compression = self.sample_compression;
        let engine = self.build(cache)?;

        let meta_key = tensor_meta_key(&engine.key);
        if engine.cache.contains(&meta_key)? {
            return Err(TenstoreError::TensorAlreadyExists(engine.key));
        }
        let meta = Arc::new(RwLock::new(TensorMeta::new(dtype, sample_compression)));
        engine.cache.put(&meta_key, &meta)?;
        Ok(engine)
    }

    /// Opens an existing tensor.
    ///
    /// A crash between a meta update and the corresponding chunk write
    /// leaves the meta claiming one sample too many; opening detects
    /// this and truncates the meta back to the registered sample count.
    pub fn open(self, cache: Arc<LRUCache>) -> crate::Result<ChunkEngine> {
        let engine = self.build(cache)?;

        let meta_key = tensor_meta_key(&engine.key);
        let meta = engine.tensor_meta()?;
        let length = meta.read().length;

        let registered = if engine.chunk_id_encoder_exists()? {
            engine.chunk_id_encoder()?.read().num_samples()
        } else if length > 1 {
            return Err(TenstoreError::CorruptedMeta(format!(
                "tensor length is {} but no chunk id encoder was found",
                length
            )));
        } else {
            0
        };

        if length > registered {
            warn!(
                "tensor '{}': meta claims {} samples but {} are registered, truncating",
                engine.key, length, registered
            );
            meta.write().length = registered;
            engine.cache.put(&meta_key, &meta)?;
            engine.cache.maybe_flush()?;
        }
        Ok(engine)
    }
}

/// Handles creating chunks and filling them with incoming samples.
///
/// Packing policy: a sample is appended to the last chunk whenever that
/// does not increase the number of chunks the data would occupy anyway,
/// i.e. when `ceil((incoming + last) / max) == ceil(incoming / max)`.
/// Otherwise a fresh chunk is started. Since a sample never spans
/// chunks, every sealed chunk ends up holding at least
/// `max_chunk_size / 2` bytes and only the last chunk may run short.
///
/// ```
/// use std::sync::Arc;
/// use tenstore::{Array, ChunkEngine, Dtype, Index, LRUCache, MemoryProvider};
///
/// # fn main() -> tenstore::Result<()> {
/// let storage = Arc::new(MemoryProvider::new());
/// let cache = Arc::new(LRUCache::new(storage, 64 * 1024 * 1024));
///
/// let engine = ChunkEngine::builder("images").create(cache)?;
/// engine.extend_array(&Array::zeros(Dtype::U8, &[3, 28, 28]))?;
///
/// assert_eq!(engine.num_samples()?, 3);
/// assert_eq!(engine.array(&Index::Single(1))?.shape(), &[28, 28]);
/// # Ok(())
/// # }
/// ```
pub struct ChunkEngine {
    key: String,
    cache: Arc<LRUCache>,
    max_chunk_size: usize,
    min_chunk_size: usize,
    chunk_id_seed: Option<u64>,
}

impl ChunkEngine {
    pub fn builder(key: &str) -> ChunkEngineBuilder {
        ChunkEngineBuilder::new(key)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// No chunk's data section ever exceeds this.
    pub fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }

    /// Only the last chunk may hold less data than this; it is also the
    /// largest sample the engine accepts.
    pub fn min_chunk_size(&self) -> usize {
        self.min_chunk_size
    }

    fn tensor_meta(&self) -> crate::Result<Arc<RwLock<TensorMeta>>> {
        self.cache.get_cachable(&tensor_meta_key(&self.key))
    }

    fn chunk_id_encoder_exists(&self) -> crate::Result<bool> {
        self.cache.contains(&chunk_id_encoder_key(&self.key))
    }

    /// The chunk id encoder, created lazily for a tensor that has never
    /// been written to.
    fn chunk_id_encoder(&self) -> crate::Result<Arc<RwLock<ChunkIdEncoder>>> {
        let key = chunk_id_encoder_key(&self.key);
        if !self.cache.contains(&key)? {
            // the meta is updated before any payload write, so a fresh
            // tensor may legitimately claim one sample already
            let length = self.tensor_meta()?.read().length;
            if length > 1 {
                return Err(TenstoreError::CorruptedMeta(format!(
                    "tensor length is {} but no chunk id encoder was found",
                    length
                )));
            }
            let encoder = Arc::new(RwLock::new(match self.chunk_id_seed {
                Some(seed) => ChunkIdEncoder::with_seed(seed),
                None => ChunkIdEncoder::new(),
            }));
            self.cache.put(&key, &encoder)?;
            return Ok(encoder);
        }
        self.cache.get_cachable(&key)
    }

    pub fn num_samples(&self) -> crate::Result<u64> {
        if !self.chunk_id_encoder_exists()? {
            return Ok(0);
        }
        Ok(self.chunk_id_encoder()?.read().num_samples())
    }

    pub fn num_chunks(&self) -> crate::Result<usize> {
        if !self.chunk_id_encoder_exists()? {
            return Ok(0);
        }
        Ok(self.chunk_id_encoder()?.read().num_chunks())
    }

    fn last_chunk(
        &self,
        encoder: &Arc<RwLock<ChunkIdEncoder>>,
    ) -> crate::Result<Option<(String, Arc<RwLock<Chunk>>)>> {
        let id = match encoder.read().last_chunk_id() {
            Some(id) => id,
            None => return Ok(None),
        };
        let key = chunk_key(&self.key, &ChunkIdEncoder::name_from_id(id));
        let chunk = self.cache.get_cachable(&key)?;
        Ok(Some((key, chunk)))
    }

    /// The `chunk_index`-th chunk of the tensor.
    pub fn chunk_at(&self, chunk_index: usize) -> crate::Result<Arc<RwLock<Chunk>>> {
        let encoder = self.chunk_id_encoder()?;
        let id = encoder.read().id_at_chunk(chunk_index)?;
        self.cache
            .get_cachable(&chunk_key(&self.key, &ChunkIdEncoder::name_from_id(id)))
    }

    fn check_sample_size(&self, num_bytes: usize) -> crate::Result<()> {
        if num_bytes > self.min_chunk_size {
            return Err(TenstoreError::SampleTooLarge {
                num_bytes,
                min_chunk_size: self.min_chunk_size,
            });
        }
        Ok(())
    }

    /// Casts a raw sample to the tensor dtype when they disagree.
    /// Pre-encoded samples pass through and fail the meta compatibility
    /// check instead.
    fn conform_dtype(&self, sample: &Sample, tensor_dtype: Option<Dtype>) -> crate::Result<Sample> {
        match tensor_dtype {
            Some(dtype) if sample.dtype() != dtype && !sample.is_encoded() => {
                sample.astype(dtype)
            }
            _ => Ok(sample.clone()),
        }
    }

    /// Appends one sample.
    pub fn append(&self, sample: &Sample) -> crate::Result<()> {
        let meta = self.tensor_meta()?;
        let (compression, tensor_dtype) = {
            let meta = meta.read();
            (meta.sample_compression, meta.dtype)
        };

        let sample = self.conform_dtype(sample, tensor_dtype)?;
        let buffer = sample.encoded_bytes(compression)?;
        self.check_sample_size(buffer.len())?;
        self.append_bytes(&buffer, sample.shape(), sample.dtype())?;

        self.cache.maybe_flush()
    }

    /// Appends a batch of samples.
    ///
    /// Every buffer is encoded and validated before the first byte is
    /// written, so a bad sample anywhere in the batch leaves the tensor
    /// untouched.
    pub fn extend(&self, samples: &[Sample]) -> crate::Result<()> {
        let meta = self.tensor_meta()?;
        let (compression, tensor_dtype, tensor_rank) = {
            let meta = meta.read();
            let rank = (meta.length > 0).then(|| meta.min_shape.len());
            (meta.sample_compression, meta.dtype, rank)
        };

        let mut effective_dtype = tensor_dtype;
        let mut effective_rank = tensor_rank;
        let mut prepared = Vec::with_capacity(samples.len());
        for sample in samples {
            let sample = self.conform_dtype(sample, effective_dtype)?;
            match effective_rank {
                None => effective_rank = Some(sample.shape().len()),
                Some(rank) if rank != sample.shape().len() => {
                    return Err(TenstoreError::TensorInvalidSampleShape {
                        shape: sample.shape().to_vec(),
                        expected_rank: rank,
                    });
                }
                Some(_) => {}
            }
            if effective_dtype.is_none() {
                effective_dtype = Some(sample.dtype());
            }

            let buffer = sample.encoded_bytes(compression)?.into_owned();
            self.check_sample_size(buffer.len())?;
            prepared.push((buffer, sample.shape().to_vec(), sample.dtype()));
        }

        for (buffer, shape, dtype) in &prepared {
            self.append_bytes(buffer, shape, *dtype)?;
        }
        self.cache.maybe_flush()
    }

    /// Appends every entry along the first axis of a dense array.
    ///
    /// All rows share a shape and dtype, so validation happens once and
    /// each row's bytes are sliced straight out of the array.
    pub fn extend_array(&self, array: &Array) -> crate::Result<()> {
        let meta = self.tensor_meta()?;
        let (compression, tensor_dtype) = {
            let meta = meta.read();
            (meta.sample_compression, meta.dtype)
        };

        if array.shape().is_empty() {
            return Err(TenstoreError::TensorInvalidSampleShape {
                shape: Vec::new(),
                expected_rank: 1,
            });
        }

        if compression != Compression::Uncompressed {
            // image codecs need to see each sample on its own
            let samples = split_first_axis(array)?
                .into_iter()
                .map(Sample::from_array)
                .collect::<Vec<_>>();
            return self.extend(&samples);
        }

        let array = match tensor_dtype {
            Some(dtype) if dtype != array.dtype() => array.astype(dtype)?,
            _ => array.clone(),
        };

        let num_samples = array.shape()[0] as usize;
        let sample_shape = array.shape()[1..].to_vec();
        let sample_num_elements: u64 = sample_shape.iter().product();
        let sample_nbytes = sample_num_elements as usize * array.dtype().itemsize();
        self.check_sample_size(sample_nbytes)?;

        let bytes = array.as_bytes();
        for i in 0..num_samples {
            let buffer = &bytes[i * sample_nbytes..(i + 1) * sample_nbytes];
            self.append_bytes(buffer, &sample_shape, array.dtype())?;
        }
        self.cache.maybe_flush()
    }

    /// Places one already-encoded buffer into a chunk and registers it
    /// everywhere.
    ///
    /// One encoder handle is held across the whole operation: a fresh
    /// chunk's id only exists on that handle until the sample is
    /// registered, so re-resolving the encoder in between could lose it
    /// to an eviction.
    fn append_bytes(&self, buffer: &[u8], shape: &[u64], dtype: Dtype) -> crate::Result<()> {
        let meta_key = tensor_meta_key(&self.key);
        let meta = self.tensor_meta()?;
        {
            let mut meta = meta.write();
            meta.check_compatibility(shape, dtype)?;
            // meta first: erroneous meta information is better than
            // unaccounted-for data
            meta.update(shape, dtype, 1);
        }
        self.cache.put(&meta_key, &meta)?;

        let encoder_key = chunk_id_encoder_key(&self.key);
        let encoder = self.chunk_id_encoder()?;

        if !self.try_appending_to_last_chunk(&encoder, buffer, shape)? {
            self.append_to_new_chunk(&encoder, buffer, shape)?;
        }

        encoder.write().register_samples_to_last_chunk_id(1)?;
        self.cache.put(&encoder_key, &encoder)
    }

    /// Stores `buffer` in the last chunk if that does not cost an extra
    /// chunk overall.
    fn try_appending_to_last_chunk(
        &self,
        encoder: &Arc<RwLock<ChunkIdEncoder>>,
        buffer: &[u8],
        shape: &[u64],
    ) -> crate::Result<bool> {
        let (key, chunk) = match self.last_chunk(encoder)? {
            Some(last) => last,
            None => return Ok(false),
        };

        let incoming_num_bytes = buffer.len();
        let last_chunk_size = chunk.read().num_data_bytes();

        let chunk_ct_content = min_chunk_ct_for_data_size(self.max_chunk_size, incoming_num_bytes);
        let combined_chunk_ct =
            min_chunk_ct_for_data_size(self.max_chunk_size, incoming_num_bytes + last_chunk_size);

        if combined_chunk_ct != chunk_ct_content {
            return Ok(false);
        }

        chunk
            .write()
            .append_sample(buffer, self.max_chunk_size, shape)?;
        self.cache.put(&key, &chunk)?;
        Ok(true)
    }

    fn append_to_new_chunk(
        &self,
        encoder: &Arc<RwLock<ChunkIdEncoder>>,
        buffer: &[u8],
        shape: &[u64],
    ) -> crate::Result<()> {
        let chunk_id = encoder.write().generate_chunk_id();
        let chunk_name = ChunkIdEncoder::name_from_id(chunk_id);
        let key = chunk_key(&self.key, &chunk_name);
        debug!("tensor '{}': creating chunk '{}'", self.key, chunk_name);

        let chunk = Arc::new(RwLock::new(Chunk::new()));
        chunk
            .write()
            .append_sample(buffer, self.max_chunk_size, shape)?;
        self.cache.put(&key, &chunk)
    }

    /// Overwrites the sample at `global_sample_index` in place.
    ///
    /// The incoming sample must encode to exactly the stored shape and
    /// byte length.
    pub fn update(&self, global_sample_index: u64, sample: &Sample) -> crate::Result<()> {
        let meta = self.tensor_meta()?;
        let (compression, tensor_dtype) = {
            let meta = meta.read();
            (meta.sample_compression, meta.dtype)
        };

        let sample = self.conform_dtype(sample, tensor_dtype)?;
        let buffer = sample.encoded_bytes(compression)?;
        self.check_sample_size(buffer.len())?;

        let encoder = self.chunk_id_encoder()?;
        let (chunk_id, local_sample_index) = {
            let encoder = encoder.read();
            (
                encoder.chunk_id(global_sample_index)?,
                encoder.local_sample_index(global_sample_index)?,
            )
        };
        let key = chunk_key(&self.key, &ChunkIdEncoder::name_from_id(chunk_id));
        let chunk = self.cache.get_cachable::<Chunk>(&key)?;
        chunk
            .write()
            .update_sample(local_sample_index, &buffer, sample.shape())?;
        self.cache.put(&key, &chunk)?;
        self.cache.maybe_flush()
    }

    /// Reads the selected samples as one dense array.
    ///
    /// All selected samples must share a shape; otherwise this fails
    /// with [`TenstoreError::DynamicTensor`] and the caller should use
    /// [`arrays`](Self::arrays) instead. A single-index selection
    /// returns the sample itself, without a leading axis.
    pub fn array(&self, index: &Index) -> crate::Result<Array> {
        let samples = self.read_samples(index, true)?;
        if index.is_single() {
            return samples
                .into_iter()
                .next()
                .ok_or(TenstoreError::IndexOutOfBounds {
                    index: 0,
                    num_samples: 0,
                });
        }
        if samples.is_empty() {
            let dtype = self.tensor_meta()?.read().dtype.unwrap_or(Dtype::U8);
            return Array::from_le_bytes(dtype, &[0], Vec::new());
        }
        Array::stack(&samples)
    }

    /// Reads the selected samples as one array per sample, shapes free
    /// to differ.
    pub fn arrays(&self, index: &Index) -> crate::Result<Vec<Array>> {
        self.read_samples(index, false)
    }

    fn read_samples(&self, index: &Index, enforce_uniform: bool) -> crate::Result<Vec<Array>> {
        let num_samples = self.num_samples()?;
        let indices = index.values(num_samples)?;
        if indices.is_empty() {
            return Ok(Vec::new());
        }

        let meta = self.tensor_meta()?;
        let (compression, dtype) = {
            let meta = meta.read();
            (meta.sample_compression, meta.dtype)
        };
        let encoder = self.chunk_id_encoder()?;

        let mut samples = Vec::with_capacity(indices.len());
        let mut last_shape: Option<Vec<u64>> = None;
        for global_sample_index in indices {
            let (chunk_id, local_sample_index) = {
                let encoder = encoder.read();
                (
                    encoder.chunk_id(global_sample_index)?,
                    encoder.local_sample_index(global_sample_index)?,
                )
            };
            let key = chunk_key(&self.key, &ChunkIdEncoder::name_from_id(chunk_id));
            let chunk = self.cache.get_cachable::<Chunk>(&key)?;
            let sample = read_sample_from_chunk(
                &chunk.read(),
                local_sample_index,
                compression,
                dtype,
            )?;

            if enforce_uniform {
                if let Some(last_shape) = &last_shape {
                    if last_shape != sample.shape() {
                        return Err(TenstoreError::DynamicTensor {
                            key: self.key.clone(),
                        });
                    }
                }
                last_shape = Some(sample.shape().to_vec());
            }
            samples.push(sample);
        }
        Ok(samples)
    }
}

fn read_sample_from_chunk(
    chunk: &Chunk,
    local_sample_index: u64,
    compression: Compression,
    dtype: Option<Dtype>,
) -> crate::Result<Array> {
    let shape = chunk.sample_shape(local_sample_index)?;
    let buffer = chunk.sample_bytes(local_sample_index)?;
    if compression != Compression::Uncompressed {
        decompress_array(buffer, &shape)
    } else {
        let dtype = dtype.ok_or_else(|| {
            TenstoreError::CorruptedMeta("tensor holds samples but no dtype".to_string())
        })?;
        Array::from_le_bytes(dtype, &shape, buffer.to_vec())
    }
}

/// Splits an array into one sub-array per entry along its first axis.
fn split_first_axis(array: &Array) -> crate::Result<Vec<Array>> {
    let num_samples = array.shape()[0] as usize;
    let sample_shape = array.shape()[1..].to_vec();
    let sample_num_elements: u64 = sample_shape.iter().product();
    let sample_nbytes = sample_num_elements as usize * array.dtype().itemsize();

    let bytes = array.as_bytes();
    (0..num_samples)
        .map(|i| {
            Array::from_le_bytes(
                array.dtype(),
                &sample_shape,
                bytes[i * sample_nbytes..(i + 1) * sample_nbytes].to_vec(),
            )
        })
        .collect()
}
