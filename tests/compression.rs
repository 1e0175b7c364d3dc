use std::sync::Arc;

use tenstore::{
    compress_array, decompress_array, Array, ChunkEngine, Compression, Dtype, Index, LRUCache,
    MemoryProvider, Sample, StorageProvider,
};

fn cache() -> Arc<LRUCache> {
    let provider: Arc<dyn StorageProvider> = Arc::new(MemoryProvider::new());
    Arc::new(LRUCache::new(provider, 64 * 1024 * 1024))
}

/// A deterministic test image with structure in every channel.
fn gradient(shape: &[u64]) -> Array {
    let num_elements: u64 = shape.iter().product();
    let values = (0..num_elements).map(|i| (i % 251) as u8).collect();
    Array::from_vec(values, shape).unwrap()
}

#[test]
fn test_png_round_trips_exactly() {
    for shape in [&[100, 100, 3][..], &[28, 28, 1], &[32, 32]] {
        let array = gradient(shape);
        let buffer = compress_array(&array, Compression::Png).unwrap();
        let decoded = decompress_array(&buffer, shape).unwrap();
        assert_eq!(decoded, array);
    }
}

#[test]
fn test_jpeg_round_trips_shape() {
    for shape in [&[100, 100, 3][..], &[28, 28, 1], &[32, 32]] {
        let array = gradient(shape);
        let buffer = compress_array(&array, Compression::Jpeg).unwrap();
        let decoded = decompress_array(&buffer, shape).unwrap();
        // jpeg is lossy: same shape and dtype, values may drift
        assert_eq!(decoded.shape(), array.shape());
        assert_eq!(decoded.dtype(), Dtype::U8);
    }
}

#[test]
fn test_png_tensor_stores_and_reads_losslessly() {
    let engine = ChunkEngine::builder("images")
        .sample_compression(Compression::Png)
        .create(cache())
        .unwrap();

    let images = [gradient(&[64, 64, 3]), gradient(&[32, 48, 3])];
    for image in &images {
        engine.append(&Sample::from_array(image.clone())).unwrap();
    }

    for (i, image) in images.iter().enumerate() {
        assert_eq!(&engine.array(&Index::Single(i as u64)).unwrap(), image);
    }

    // the stored buffers really are png-encoded, not raw bytes
    let chunk = engine.chunk_at(0).unwrap();
    let chunk = chunk.read();
    let stored = chunk.sample_bytes(0).unwrap();
    assert_eq!(&stored[..8], b"\x89PNG\r\n\x1a\n");
}

#[test]
fn test_jpeg_tensor_preserves_shapes() {
    let engine = ChunkEngine::builder("images")
        .sample_compression(Compression::Jpeg)
        .create(cache())
        .unwrap();

    engine
        .append(&Sample::from_array(gradient(&[200, 200, 3])))
        .unwrap();
    let read = engine.array(&Index::Single(0)).unwrap();
    assert_eq!(read.shape(), &[200, 200, 3]);
}

#[test]
fn test_pre_encoded_samples_are_stored_verbatim() {
    let engine = ChunkEngine::builder("images")
        .sample_compression(Compression::Png)
        .create(cache())
        .unwrap();

    let image = gradient(&[16, 16]);
    let png = compress_array(&image, Compression::Png).unwrap();
    engine
        .append(&Sample::from_encoded(png.clone(), Compression::Png).unwrap())
        .unwrap();

    let chunk = engine.chunk_at(0).unwrap();
    let chunk = chunk.read();
    assert_eq!(chunk.sample_bytes(0).unwrap(), png.as_slice());
    assert_eq!(engine.array(&Index::Single(0)).unwrap(), image);
}

#[test]
fn test_compressed_tensors_can_hold_dynamic_shapes() {
    let engine = ChunkEngine::builder("images")
        .sample_compression(Compression::Png)
        .create(cache())
        .unwrap();

    let shapes: [&[u64]; 4] = [&[100, 100, 3], &[100, 50, 3], &[50, 100, 3], &[50, 50, 3]];
    for shape in shapes {
        engine.append(&Sample::from_array(gradient(shape))).unwrap();
    }

    let samples = engine.arrays(&Index::All).unwrap();
    for (sample, shape) in samples.iter().zip(shapes) {
        assert_eq!(sample.shape(), shape);
    }
}

#[test]
fn test_extend_array_encodes_each_entry() {
    let engine = ChunkEngine::builder("images")
        .sample_compression(Compression::Png)
        .create(cache())
        .unwrap();

    let batch = gradient(&[3, 20, 20]);
    engine.extend_array(&batch).unwrap();

    assert_eq!(engine.num_samples().unwrap(), 3);
    let dense = engine.array(&Index::All).unwrap();
    assert_eq!(dense, batch);
}
