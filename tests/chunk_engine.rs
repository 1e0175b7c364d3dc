use std::sync::Arc;

use tenstore::constants::KB;
use tenstore::{
    Array, ChunkEngine, Dtype, Index, LRUCache, LocalProvider, MemoryProvider, Sample,
    StorageProvider, TenstoreError,
};

fn memory_cache() -> (Arc<MemoryProvider>, Arc<LRUCache>) {
    let storage = Arc::new(MemoryProvider::new());
    let provider: Arc<dyn StorageProvider> = storage.clone();
    (storage, Arc::new(LRUCache::new(provider, 64 * 1024 * KB)))
}

fn byte_sample(num_bytes: usize, value: u8) -> Sample {
    Sample::from_array(
        Array::from_vec(vec![value; num_bytes], &[num_bytes as u64]).unwrap(),
    )
}

fn chunk_data_len(engine: &ChunkEngine, chunk_index: usize) -> usize {
    engine.chunk_at(chunk_index).unwrap().read().num_data_bytes()
}

#[test]
fn test_append_and_read_identity() {
    let (_, cache) = memory_cache();
    let engine = ChunkEngine::builder("t").create(cache).unwrap();

    let first = Array::from_vec((0..12u32).collect(), &[3, 4]).unwrap();
    let second = Array::from_vec((100..112u32).collect(), &[3, 4]).unwrap();
    engine.append(&Sample::from_array(first.clone())).unwrap();
    engine.append(&Sample::from_array(second.clone())).unwrap();

    assert_eq!(engine.num_samples().unwrap(), 2);
    assert_eq!(engine.array(&Index::Single(0)).unwrap(), first);
    assert_eq!(engine.array(&Index::Single(1)).unwrap(), second);

    let dense = engine.array(&Index::All).unwrap();
    assert_eq!(dense.shape(), &[2, 3, 4]);
    assert_eq!(
        dense.to_vec::<u32>().unwrap(),
        (0..12).chain(100..112).collect::<Vec<u32>>()
    );
}

#[test]
fn test_packing_follows_the_chunk_count_predicate() {
    // max 32KB, min 16KB; appending [1, 1, 14, 15]KB then [15]KB then
    // [15, 1]KB must pack into exactly two 31KB chunks
    let (_, cache) = memory_cache();
    let engine = ChunkEngine::builder("t")
        .max_chunk_size(32 * KB)
        .create(cache)
        .unwrap();

    engine
        .extend(&[
            byte_sample(KB, 0),
            byte_sample(KB, 1),
            byte_sample(14 * KB, 2),
            byte_sample(15 * KB, 3),
        ])
        .unwrap();
    assert_eq!(engine.num_chunks().unwrap(), 1);
    assert_eq!(chunk_data_len(&engine, 0), 31 * KB);

    engine.append(&byte_sample(15 * KB, 4)).unwrap();
    assert_eq!(engine.num_chunks().unwrap(), 2);

    engine
        .extend(&[byte_sample(15 * KB, 5), byte_sample(KB, 6)])
        .unwrap();

    assert_eq!(engine.num_chunks().unwrap(), 2);
    assert_eq!(chunk_data_len(&engine, 0), 31 * KB);
    assert_eq!(chunk_data_len(&engine, 1), 31 * KB);
    assert_eq!(engine.num_samples().unwrap(), 7);

    // every sample reads back from the right chunk
    assert_eq!(
        engine.array(&Index::Single(3)).unwrap().to_vec::<u8>().unwrap(),
        vec![3; 15 * KB]
    );
    assert_eq!(
        engine.array(&Index::Single(6)).unwrap().to_vec::<u8>().unwrap(),
        vec![6; KB]
    );
}

#[test]
fn test_packing_optimality_for_small_uniform_samples() {
    let (_, cache) = memory_cache();
    let engine = ChunkEngine::builder("t")
        .max_chunk_size(4096)
        .create(cache)
        .unwrap();

    // 1000 samples of 100 bytes each
    let batch = Array::zeros(Dtype::U8, &[1000, 100]);
    engine.extend_array(&batch).unwrap();

    assert_eq!(engine.num_samples().unwrap(), 1000);
    let num_chunks = engine.num_chunks().unwrap();
    assert_eq!(num_chunks, 100_000usize.div_ceil(4096));

    // size discipline: only the last chunk may run below min
    for chunk_index in 0..num_chunks - 1 {
        let len = chunk_data_len(&engine, chunk_index);
        assert!(len >= 2048 && len <= 4096);
    }
}

#[test]
fn test_no_sample_straddles_a_chunk() {
    let (_, cache) = memory_cache();
    let engine = ChunkEngine::builder("t")
        .max_chunk_size(1024)
        .create(cache)
        .unwrap();

    for i in 0..30u8 {
        engine.append(&byte_sample(100, i)).unwrap();
    }

    let mut total = 0usize;
    for chunk_index in 0..engine.num_chunks().unwrap() {
        let chunk = engine.chunk_at(chunk_index).unwrap();
        let chunk = chunk.read();
        // the byte ranges of a chunk's samples tile its data exactly
        let mut end_of_previous = 0;
        for local in 0..chunk.num_samples() {
            let (start, end) = chunk.byte_positions().byte_position(local).unwrap();
            assert_eq!(start, end_of_previous);
            end_of_previous = end;
        }
        assert_eq!(end_of_previous as usize, chunk.num_data_bytes());
        total += chunk.num_data_bytes();
    }
    assert_eq!(total, 3000);
}

#[test]
fn test_dynamic_shapes_need_a_list_read() {
    let (_, cache) = memory_cache();
    let engine = ChunkEngine::builder("t").create(cache).unwrap();

    engine
        .append(&Sample::from_array(
            Array::from_vec(vec![1u8, 2, 3, 4], &[2, 2]).unwrap(),
        ))
        .unwrap();
    engine
        .append(&Sample::from_array(
            Array::from_vec(vec![5u8, 6, 7, 8, 9, 10], &[2, 3]).unwrap(),
        ))
        .unwrap();

    assert!(matches!(
        engine.array(&Index::All),
        Err(TenstoreError::DynamicTensor { .. })
    ));

    let samples = engine.arrays(&Index::All).unwrap();
    assert_eq!(samples.len(), 2);
    assert_eq!(samples[0].shape(), &[2, 2]);
    assert_eq!(samples[1].shape(), &[2, 3]);

    // a single-sample selection is still a dense read
    assert_eq!(engine.array(&Index::Single(1)).unwrap().shape(), &[2, 3]);
}

#[test]
fn test_update_in_place() {
    let (_, cache) = memory_cache();
    let engine = ChunkEngine::builder("t").create(cache).unwrap();

    for i in 0..8u8 {
        engine
            .append(&Sample::from_array(
                Array::from_vec(vec![i; 100], &[10, 10]).unwrap(),
            ))
            .unwrap();
    }
    let before = engine.arrays(&Index::All).unwrap();

    let replacement = Array::from_vec(vec![200u8; 100], &[10, 10]).unwrap();
    engine.update(4, &Sample::from_array(replacement.clone())).unwrap();

    let after = engine.arrays(&Index::All).unwrap();
    for (i, (old, new)) in before.iter().zip(after.iter()).enumerate() {
        if i == 4 {
            assert_eq!(new, &replacement);
        } else {
            // all other samples are byte-identical
            assert_eq!(new, old);
        }
    }

    // a different shape is rejected without touching anything
    assert!(matches!(
        engine.update(
            4,
            &Sample::from_array(Array::from_vec(vec![0u8; 100], &[5, 20]).unwrap())
        ),
        Err(TenstoreError::UpdateShapeNotSupported { .. })
    ));
    assert_eq!(engine.arrays(&Index::All).unwrap(), after);
}

#[test]
fn test_update_back_to_the_same_value_changes_nothing() {
    use tenstore::Cachable;

    let (_, cache) = memory_cache();
    let engine = ChunkEngine::builder("t").create(cache).unwrap();

    engine.extend_array(&Array::zeros(Dtype::U8, &[4, 16])).unwrap();
    let sample = engine.array(&Index::Single(2)).unwrap();
    let before = engine.chunk_at(0).unwrap().read().tobytes().unwrap();

    engine.update(2, &Sample::from_array(sample)).unwrap();
    let after = engine.chunk_at(0).unwrap().read().tobytes().unwrap();
    assert_eq!(after, before);
}

#[test]
fn test_samples_above_min_chunk_size_are_rejected() {
    let (_, cache) = memory_cache();
    let engine = ChunkEngine::builder("t")
        .max_chunk_size(1024)
        .create(cache)
        .unwrap();

    assert!(matches!(
        engine.append(&byte_sample(513, 0)),
        Err(TenstoreError::SampleTooLarge { .. })
    ));
    // nothing was written, not even the meta
    assert_eq!(engine.num_samples().unwrap(), 0);

    engine.append(&byte_sample(512, 0)).unwrap();
    assert_eq!(engine.num_samples().unwrap(), 1);
}

#[test]
fn test_extend_validates_the_whole_batch_first() {
    let (_, cache) = memory_cache();
    let engine = ChunkEngine::builder("t")
        .max_chunk_size(1024)
        .create(cache)
        .unwrap();

    let result = engine.extend(&[byte_sample(100, 0), byte_sample(4096, 1)]);
    assert!(matches!(result, Err(TenstoreError::SampleTooLarge { .. })));
    assert_eq!(engine.num_samples().unwrap(), 0);

    // mixed ranks are caught up front too
    let result = engine.extend(&[
        byte_sample(100, 0),
        Sample::from_array(Array::zeros(Dtype::U8, &[10, 10])),
    ]);
    assert!(matches!(
        result,
        Err(TenstoreError::TensorInvalidSampleShape { .. })
    ));
    assert_eq!(engine.num_samples().unwrap(), 0);
}

#[test]
fn test_rank_and_dtype_mismatches_are_rejected() {
    let (_, cache) = memory_cache();
    let engine = ChunkEngine::builder("t").create(cache).unwrap();

    engine
        .append(&Sample::from_array(Array::zeros(Dtype::I32, &[4, 4])))
        .unwrap();

    assert!(matches!(
        engine.append(&Sample::from_array(Array::zeros(Dtype::I32, &[4, 4, 1]))),
        Err(TenstoreError::TensorInvalidSampleShape { .. })
    ));
    assert_eq!(engine.num_samples().unwrap(), 1);
}

#[test]
fn test_scalars_are_cast_to_the_tensor_dtype() {
    let (_, cache) = memory_cache();
    let engine = ChunkEngine::builder("t")
        .dtype(Dtype::U8)
        .create(cache)
        .unwrap();

    engine.append(&Sample::from_scalar(42i64)).unwrap();
    let read = engine.array(&Index::Single(0)).unwrap();
    assert_eq!(read.dtype(), Dtype::U8);
    assert_eq!(read.to_vec::<u8>().unwrap(), vec![42]);

    // values that do not fit the tensor dtype are rejected up front
    assert!(matches!(
        engine.append(&Sample::from_scalar(300i64)),
        Err(TenstoreError::FailedCast { .. })
    ));
    assert_eq!(engine.num_samples().unwrap(), 1);
}

#[test]
fn test_empty_samples() {
    let (_, cache) = memory_cache();
    let engine = ChunkEngine::builder("t").create(cache).unwrap();

    for _ in 0..3 {
        engine
            .append(&Sample::from_array(
                Array::from_le_bytes(Dtype::U8, &[0], Vec::new()).unwrap(),
            ))
            .unwrap();
    }

    assert_eq!(engine.num_samples().unwrap(), 3);
    let dense = engine.array(&Index::All).unwrap();
    assert_eq!(dense.shape(), &[3, 0]);
}

#[test]
fn test_reopen_from_local_storage() {
    let dir = tempfile::tempdir().unwrap();

    {
        let provider: Arc<dyn StorageProvider> =
            Arc::new(LocalProvider::new(dir.path()).unwrap());
        let cache = Arc::new(LRUCache::new(provider, 1024 * KB));
        let engine = ChunkEngine::builder("images").create(cache).unwrap();
        let batch = Array::from_vec((0..60u8).collect(), &[5, 3, 4]).unwrap();
        engine.extend_array(&batch).unwrap();
    }

    let provider: Arc<dyn StorageProvider> = Arc::new(LocalProvider::new(dir.path()).unwrap());
    let cache = Arc::new(LRUCache::new(provider, 1024 * KB));
    let engine = ChunkEngine::builder("images").open(cache).unwrap();

    assert_eq!(engine.num_samples().unwrap(), 5);
    let dense = engine.array(&Index::All).unwrap();
    assert_eq!(dense.shape(), &[5, 3, 4]);
    assert_eq!(dense.to_vec::<u8>().unwrap(), (0..60).collect::<Vec<u8>>());
}

#[test]
fn test_create_refuses_to_clobber_an_existing_tensor() {
    let (_, cache) = memory_cache();
    ChunkEngine::builder("t").create(cache.clone()).unwrap();
    assert!(matches!(
        ChunkEngine::builder("t").create(cache),
        Err(TenstoreError::TensorAlreadyExists(_))
    ));
}

#[test]
fn test_open_repairs_a_partial_append() {
    let (storage, cache) = memory_cache();
    {
        let engine = ChunkEngine::builder("t").create(cache).unwrap();
        engine.extend_array(&Array::zeros(Dtype::U8, &[2, 8])).unwrap();
    }

    // simulate a crash between the meta update and the chunk write
    let raw = storage.get("t/tensor_meta.json").unwrap().unwrap();
    let mut meta: serde_json::Value = serde_json::from_slice(&raw).unwrap();
    meta["length"] = serde_json::json!(3);
    storage
        .set("t/tensor_meta.json", &serde_json::to_vec(&meta).unwrap())
        .unwrap();

    let provider: Arc<dyn StorageProvider> = storage.clone();
    let cache = Arc::new(LRUCache::new(provider, 1024 * KB));
    let engine = ChunkEngine::builder("t").open(cache).unwrap();
    assert_eq!(engine.num_samples().unwrap(), 2);

    let raw = storage.get("t/tensor_meta.json").unwrap().unwrap();
    let meta: serde_json::Value = serde_json::from_slice(&raw).unwrap();
    assert_eq!(meta["length"], serde_json::json!(2));
}

#[test]
fn test_open_rejects_a_tensor_missing_its_encoder() {
    let (storage, _) = memory_cache();
    storage
        .set(
            "t/tensor_meta.json",
            br#"{"version":"0.1.0","dtype":"u8","sample_compression":"uncompressed","length":5,"min_shape":[8],"max_shape":[8]}"#,
        )
        .unwrap();

    let provider: Arc<dyn StorageProvider> = storage.clone();
    let cache = Arc::new(LRUCache::new(provider, 1024 * KB));
    assert!(matches!(
        ChunkEngine::builder("t").open(cache),
        Err(TenstoreError::CorruptedMeta(_))
    ));
}

#[test]
fn test_chunks_survive_a_tiny_cache() {
    // a cache too small to hold even one chunk must still serve reads
    // correctly by spilling to storage
    let storage = Arc::new(MemoryProvider::new());
    let provider: Arc<dyn StorageProvider> = storage.clone();
    let cache = Arc::new(LRUCache::new(provider, 256));

    let engine = ChunkEngine::builder("t")
        .max_chunk_size(1024)
        .create(cache)
        .unwrap();

    for i in 0..20u8 {
        engine.append(&byte_sample(64, i)).unwrap();
    }

    for i in 0..20u8 {
        let read = engine.array(&Index::Single(u64::from(i))).unwrap();
        assert_eq!(read.to_vec::<u8>().unwrap(), vec![i; 64]);
    }
}

#[test]
fn test_range_reads() {
    let (_, cache) = memory_cache();
    let engine = ChunkEngine::builder("t").create(cache).unwrap();
    engine
        .extend_array(&Array::from_vec((0..40u16).collect(), &[10, 4]).unwrap())
        .unwrap();

    let middle = engine
        .array(&Index::Range { start: 2, stop: 5 })
        .unwrap();
    assert_eq!(middle.shape(), &[3, 4]);
    assert_eq!(
        middle.to_vec::<u16>().unwrap(),
        (8..20).collect::<Vec<u16>>()
    );
}
