//! Performance benchmarks for the board engine.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use moodboard::{
    AssetId, AssetRecord, AssetSource, AssetStore, Board, BoardConfig, EntityData,
    FileAssetStore, FileStoreConfig, GarbageCollector, GcConfig, HistoryManager, ManualClock,
    MemoryAssetStore, MemoryScene, Scene, Timestamp,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn image() -> EntityData {
    EntityData::image(
        AssetSource::StoreKey(AssetId::generate()),
        100.0,
        100.0,
        &Default::default(),
    )
}

/// Benchmark batched adds followed by a full undo/redo sweep
fn bench_history_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("history_cycle");

    for batch in [1usize, 8, 32] {
        group.bench_with_input(BenchmarkId::new("batch", batch), &batch, |b, &batch| {
            b.iter(|| {
                let config = BoardConfig {
                    max_entities: 1024,
                    ..Default::default()
                };
                let mut board = Board::open(
                    MemoryScene::new(),
                    Arc::new(MemoryAssetStore::new()),
                    Arc::new(ManualClock::new(Timestamp(0))),
                    config,
                );
                for _ in 0..20 {
                    let token = board.begin_batch(batch).unwrap();
                    for _ in 0..batch {
                        board.add_entity(image(), Some(token)).unwrap();
                    }
                }
                while board.undo().applied() {}
                while board.redo().applied() {}
                black_box(board.scene().len())
            });
        });
    }

    group.finish();
}

/// Benchmark a full GC pass over stores of varying size
fn bench_gc_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("gc_pass");
    let now = Timestamp(10_000_000_000);
    let old = now.before(Duration::from_secs(3600));

    for records in [100usize, 1_000, 5_000] {
        group.bench_with_input(
            BenchmarkId::new("records", records),
            &records,
            |b, &records| {
                b.iter_with_setup(
                    || {
                        let store = MemoryAssetStore::new();
                        let mut scene = MemoryScene::new();
                        for i in 0..records {
                            let id = AssetId::generate();
                            store
                                .insert_record(AssetRecord {
                                    id,
                                    payload: vec![0u8; 32],
                                    mime_type: "image/png".into(),
                                    created_at: old,
                                })
                                .unwrap();
                            // Keep every tenth record alive.
                            if i % 10 == 0 {
                                let entity = EntityData::image(
                                    AssetSource::StoreKey(id),
                                    1.0,
                                    1.0,
                                    &Default::default(),
                                );
                                let index = scene.len();
                                scene.insert_entity_at(entity, index).unwrap();
                            }
                        }
                        (store, scene)
                    },
                    |(store, scene)| {
                        let history = HistoryManager::default();
                        let mut gc = GarbageCollector::new(GcConfig::default());
                        gc.begin_pass(&store, now).unwrap();
                        black_box(gc.finish_pass(&scene, &history, &store))
                    },
                );
            },
        );
    }

    group.finish();
}

/// Benchmark asset writes and cold reads on the file store
fn bench_file_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_store");

    for size in [1_024usize, 64 * 1_024, 1_024 * 1_024] {
        let payload = vec![7u8; size];
        group.bench_with_input(BenchmarkId::new("put_get", size), &payload, |b, payload| {
            let dir = TempDir::new().unwrap();
            let store = FileAssetStore::create(FileStoreConfig {
                path: dir.path().join("store"),
                asset_cache_size: 1,
                ..Default::default()
            })
            .unwrap();
            b.iter(|| {
                let id = store.put(payload, "image/png").unwrap();
                let record = store.get(&id).unwrap();
                store.delete(&id).unwrap();
                black_box(record)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_history_cycle, bench_gc_pass, bench_file_store);
criterion_main!(benches);
