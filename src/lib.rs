//! Chunked storage engine for large sequences of tensors
//!
//! Samples of possibly different shapes are packed back to back into
//! fixed-size binary blobs called chunks. Three run-length encoded
//! tables make any sample addressable in logarithmic time: the shapes
//! and byte positions of samples within a chunk live in the chunk's own
//! header, and a per-tensor [`ChunkIdEncoder`] maps global sample
//! indices to chunk ids. Everything durable lives behind an [`LRUCache`]
//! over a [`StorageProvider`].
//!
//! # Writing and reading a tensor
//!
//! ```
//! use std::sync::Arc;
//! use tenstore::{Array, ChunkEngine, Index, LRUCache, MemoryProvider, Sample};
//!
//! # fn main() -> tenstore::Result<()> {
//! let storage = Arc::new(MemoryProvider::new());
//! let cache = Arc::new(LRUCache::new(storage, 64 * 1024 * 1024));
//!
//! let engine = ChunkEngine::builder("measurements").create(cache)?;
//! engine.append(&Sample::from_array(Array::from_vec(
//!     vec![1.0f32, 2.0, 3.0],
//!     &[3],
//! )?))?;
//! engine.append(&Sample::from_array(Array::from_vec(
//!     vec![4.0f32, 5.0, 6.0],
//!     &[3],
//! )?))?;
//!
//! let all = engine.array(&Index::All)?;
//! assert_eq!(all.shape(), &[2, 3]);
//! assert_eq!(all.to_vec::<f32>()?, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
//! # Ok(())
//! # }
//! ```
pub mod array;
pub mod chunk;
pub mod chunk_engine;
pub mod compression;
pub mod constants;
pub mod errors;
pub mod index;
pub mod keys;
pub mod meta;
#[doc(hidden)]
pub mod packers;
pub mod sample;
pub mod storage;

pub use array::{Array, Dtype, Element};
pub use chunk::Chunk;
pub use chunk_engine::{ChunkEngine, ChunkEngineBuilder};
pub use compression::{compress_array, decode_image, decompress_array, Compression};
pub use errors::{Result, TenstoreError};
pub use index::Index;
pub use meta::encode::byte_positions::BytePositionsEncoder;
pub use meta::encode::chunk_id::ChunkIdEncoder;
pub use meta::encode::shape::ShapeEncoder;
pub use meta::TensorMeta;
pub use sample::Sample;
pub use storage::{Cachable, LRUCache, LocalProvider, MemoryProvider, StorageProvider};
