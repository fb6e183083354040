//! Integration tests for the board engine.

use moodboard::{
    ActionKind, AssetSource, AssetStore, Board, BoardConfig, BoardEvent, EntityData, EntityId,
    EventCategory, EventFilter, FileAssetStore, FileStoreConfig, HistoryOutcome, ManualClock,
    MemoryAssetStore, MemoryScene, Scene, SubscriptionConfig, SubscriptionHandle, Timestamp,
    TransformProps,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const T0: Timestamp = Timestamp(1_700_000_000_000);

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn memory_board() -> (Board<MemoryScene>, ManualClock, Arc<MemoryAssetStore>) {
    let clock = ManualClock::new(T0);
    let store = Arc::new(MemoryAssetStore::with_clock(Arc::new(clock.clone())));
    let board = Board::open(
        MemoryScene::new(),
        store.clone(),
        Arc::new(clock.clone()),
        BoardConfig::default(),
    );
    (board, clock, store)
}

fn test_store(dir: &TempDir) -> FileAssetStore {
    FileAssetStore::open_or_create(FileStoreConfig {
        path: dir.path().join("store"),
        asset_cache_size: 16,
        create_if_missing: true,
        quota_bytes: None,
    })
    .unwrap()
}

fn subscribe(board: &Board<MemoryScene>, categories: &[EventCategory]) -> SubscriptionHandle {
    board.events().subscribe(SubscriptionConfig {
        filter: EventFilter::categories(categories),
        ..Default::default()
    })
}

/// Import a payload and build an image entity referencing it.
fn dropped_image(board: &Board<MemoryScene>, bytes: &[u8]) -> EntityData {
    let key = board.import_asset(bytes, "image/png").unwrap();
    EntityData::image(
        AssetSource::StoreKey(key),
        320.0,
        240.0,
        &board.config().entity_defaults,
    )
}

// --- Batches ---

#[test]
fn test_drop_of_three_images_is_one_undo_step() {
    init_tracing();
    let (mut board, _clock, _store) = memory_board();

    let token = board.begin_batch(3).unwrap();
    let mut ids = Vec::new();
    for i in 0..3u8 {
        let entity = dropped_image(&board, &[i; 16]);
        ids.push(entity.id);
        assert!(board.add_entity(entity, Some(token)).unwrap());
    }

    assert_eq!(board.history().undo_len(), 1);
    assert!(board.history().open_batches().is_empty());

    assert!(board.undo().applied());
    assert!(board.scene().is_empty());

    assert!(board.redo().applied());
    assert_eq!(board.scene().ids(), ids);
}

#[test]
fn test_partial_batch_commits_after_timeout() {
    let (mut board, clock, _store) = memory_board();

    let token = board.begin_batch(3).unwrap();
    let first = dropped_image(&board, b"one");
    board.add_entity(first, Some(token)).unwrap();
    assert_eq!(board.history().undo_len(), 0);

    clock.advance(Duration::from_millis(3_999));
    board.pump();
    assert_eq!(board.history().undo_len(), 0);

    clock.advance(Duration::from_millis(1));
    board.pump();
    assert_eq!(board.history().undo_len(), 1);
    assert!(!board.history().is_batch_open(token));

    // A straggler after the timeout becomes its own entry.
    let late = dropped_image(&board, b"two");
    board.add_entity(late, Some(token)).unwrap();
    assert_eq!(board.history().undo_len(), 2);

    board.undo();
    assert_eq!(board.scene().len(), 1);
}

#[test]
fn test_shutdown_commits_open_batches() {
    let (mut board, _clock, store) = memory_board();

    let token = board.begin_batch(4).unwrap();
    let entity = dropped_image(&board, b"pending");
    board.add_entity(entity, Some(token)).unwrap();

    board.shutdown().unwrap();
    assert_eq!(board.history().undo_len(), 1);
    assert!(board.history().open_batches().is_empty());

    let saved = store.load_snapshot().unwrap().unwrap();
    assert_eq!(saved.version, 2);
    assert!(!board.gc_pending());
}

// --- Capacity ---

#[test]
fn test_ninth_image_is_refused() {
    let (mut board, _clock, _store) = memory_board();
    let notices = subscribe(&board, &[EventCategory::Notices]);

    for i in 0..8u8 {
        let entity = dropped_image(&board, &[i]);
        assert!(board.add_entity(entity, None).unwrap());
    }
    assert_eq!(board.capacity_left(), 0);
    assert!(!board.ensure_can_add(1));

    let ninth = dropped_image(&board, b"nine");
    assert!(!board.add_entity(ninth, None).unwrap());
    assert_eq!(board.scene().len(), 8);
    assert_eq!(board.history().undo_len(), 8);

    let events = notices.drain();
    assert_eq!(
        events,
        vec![
            BoardEvent::CapacityReached { max: 8 },
            BoardEvent::CapacityReached { max: 8 },
        ]
    );
}

#[test]
fn test_non_image_entities_do_not_count() {
    let (mut board, _clock, _store) = memory_board();
    let mut note = dropped_image(&board, b"x");
    note.kind = "note".to_string();
    board.add_entity(note, None).unwrap();
    assert_eq!(board.capacity_left(), 8);
}

// --- Removal & transforms ---

#[test]
fn test_undo_removal_restores_stacking_order() {
    let (mut board, _clock, _store) = memory_board();
    for i in 0..4u8 {
        let entity = dropped_image(&board, &[i]);
        board.add_entity(entity, None).unwrap();
    }
    let original = board.scene().serialize_all();
    let ids = board.scene().ids();

    assert_eq!(board.remove_entities(&[ids[2], ids[0], EntityId::generate()]), 2);
    assert_eq!(board.scene().ids(), vec![ids[1], ids[3]]);

    board.undo();
    assert_eq!(board.scene().serialize_all(), original);
}

#[test]
fn test_transform_gesture() {
    let (mut board, _clock, _store) = memory_board();
    let entity = dropped_image(&board, b"t");
    let id = entity.id;
    board.add_entity(entity, None).unwrap();
    let before = board.entity(&id).unwrap().props;

    // A gesture that changes nothing records nothing.
    assert_eq!(board.begin_transform(&[id]), 1);
    assert!(!board.end_transform());
    assert_eq!(board.history().undo_len(), 1);

    board.begin_transform(&[id]);
    let moved = TransformProps {
        left: 120.0,
        angle: 15.0,
        scale_x: 0.5,
        ..before
    };
    board.scene_mut().apply_properties(&id, &moved);
    assert!(board.end_transform());
    assert_eq!(board.history().undo_len(), 2);

    board.undo();
    assert_eq!(board.entity(&id).unwrap().props, before);
    board.redo();
    assert_eq!(board.entity(&id).unwrap().props, moved);
}

#[test]
fn test_history_events() {
    let (mut board, _clock, _store) = memory_board();
    let history = subscribe(&board, &[EventCategory::History]);

    assert_eq!(board.undo(), HistoryOutcome::NothingToUndo);
    let entity = dropped_image(&board, b"e");
    board.add_entity(entity, None).unwrap();
    board.undo();
    board.redo();
    assert_eq!(board.redo(), HistoryOutcome::NothingToRedo);

    assert_eq!(
        history.drain(),
        vec![
            BoardEvent::NothingToUndo,
            BoardEvent::Undone { kind: ActionKind::Add },
            BoardEvent::Redone { kind: ActionKind::Add },
            BoardEvent::NothingToRedo,
        ]
    );
}

// --- Persistence ---

#[test]
fn test_board_survives_reopen() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let clock = ManualClock::new(T0);

    let (saved_scene, key) = {
        let store = Arc::new(test_store(&dir).with_clock(Arc::new(clock.clone())));
        let mut board = Board::open(
            MemoryScene::new(),
            store,
            Arc::new(clock.clone()),
            BoardConfig::default(),
        );
        board.load().unwrap();

        let key = board.import_asset(b"\x89PNG persisted", "image/png").unwrap();
        let entity = EntityData::image(
            AssetSource::StoreKey(key),
            800.0,
            600.0,
            &board.config().entity_defaults,
        );
        board.add_entity(entity, None).unwrap();

        clock.advance(Duration::from_millis(400));
        board.pump();
        (board.scene().serialize_all(), key)
    };

    let store = Arc::new(test_store(&dir));
    let mut board = Board::open(
        MemoryScene::new(),
        store,
        Arc::new(clock.clone()),
        BoardConfig::default(),
    );
    let report = board.load().unwrap();

    assert_eq!(report.entities, 1);
    assert!(!report.resave_scheduled);
    assert_eq!(board.scene().serialize_all(), saved_scene);
    assert_eq!(board.resolve_asset(&key).unwrap().payload, b"\x89PNG persisted");
    // History does not survive a reload.
    assert!(!board.history().can_undo());
}

#[test]
fn test_load_enforces_image_limit() {
    let (mut board, _clock, store) = memory_board();
    let notices = subscribe(&board, &[EventCategory::Notices]);

    let entities: Vec<EntityData> = (0..10)
        .map(|i| {
            EntityData::image(
                AssetSource::Url(format!("https://example.com/{i}.png")),
                10.0,
                10.0,
                &Default::default(),
            )
        })
        .collect();
    let snapshot = moodboard::BoardSnapshot::from_scene(&moodboard::SceneSnapshot {
        entities: entities.clone(),
    })
    .unwrap();
    store.save_snapshot(&snapshot).unwrap();

    let report = board.load().unwrap();
    assert_eq!(report.auto_removed, 2);
    assert_eq!(report.entities, 8);
    assert!(report.resave_scheduled);

    let kept: Vec<EntityId> = entities[2..].iter().map(|e| e.id).collect();
    assert_eq!(board.scene().ids(), kept);
    assert_eq!(
        notices.drain(),
        vec![BoardEvent::LimitEnforced { removed: 2, max: 8 }]
    );

    let action = board.history().undo_stack().next().unwrap();
    assert_eq!(action.kind(), ActionKind::AutoLimitRemove);
    board.undo();
    assert_eq!(board.scene().len(), 10);
    assert_eq!(board.scene().ids()[0], entities[0].id);
}

#[test]
fn test_legacy_board_is_migrated_and_resaved() {
    let dir = TempDir::new().unwrap();
    let clock = ManualClock::new(T0);
    let store = Arc::new(test_store(&dir));
    store
        .save_snapshot(&moodboard::BoardSnapshot {
            version: 1,
            scene: serde_json::json!({
                "entities": [{
                    "width": 100.0,
                    "height": 50.0,
                    "props": { "left": 10.0, "top": 20.0 },
                    "inline": { "mime_type": "image/jpeg", "data": hex::encode(b"jpeg bytes") }
                }]
            }),
        })
        .unwrap();

    let mut board = Board::open(
        MemoryScene::new(),
        store.clone(),
        Arc::new(clock.clone()),
        BoardConfig::default(),
    );
    let report = board.load().unwrap();
    assert!(report.migrated);
    assert_eq!(report.moved_to_store, 1);
    assert_eq!(report.normalized, 1);
    assert!(report.resave_scheduled);

    let entity = &board.scene().serialize_all().entities[0];
    assert_eq!(entity.origin, moodboard::Origin::Center);
    assert_eq!(entity.props.left, 60.0);
    assert_eq!(entity.props.top, 45.0);
    let key = *entity.asset_key().unwrap();
    assert_eq!(board.resolve_asset(&key).unwrap().mime_type, "image/jpeg");

    clock.advance(Duration::from_millis(400));
    board.pump();
    assert_eq!(store.load_snapshot().unwrap().unwrap().version, 2);
}

// --- Garbage collection through the board ---

#[test]
fn test_save_schedules_gc_that_runs_in_chunks() {
    let clock = ManualClock::new(T0);
    let store = Arc::new(MemoryAssetStore::with_clock(Arc::new(clock.clone())));
    let config = BoardConfig {
        gc_chunk_size: 1,
        ..Default::default()
    };
    let mut board = Board::open(MemoryScene::new(), store.clone(), Arc::new(clock.clone()), config);
    let gc_events = subscribe(&board, &[EventCategory::Gc]);

    // Three orphans, created long before the grace period.
    clock.set(T0.before(Duration::from_secs(3600)));
    for i in 0..3u8 {
        board.import_asset(&[i], "image/png").unwrap();
    }
    clock.set(T0);
    let entity = dropped_image(&board, b"live");
    board.add_entity(entity, None).unwrap();
    assert_eq!(store.len(), 4);

    clock.advance(Duration::from_millis(400));
    board.pump(); // save
    assert!(board.gc_pending());

    clock.advance(Duration::from_millis(1_500));
    board.pump(); // pass starts; first chunk waits for the next pump
    assert!(board.gc().is_running());
    assert_eq!(store.len(), 4);

    let mut pumps = 0;
    while board.gc().is_running() {
        board.pump();
        pumps += 1;
    }
    assert_eq!(pumps, 4);
    assert_eq!(store.len(), 1);

    let events = gc_events.drain();
    assert_eq!(events.len(), 1);
    let BoardEvent::GcCompleted { stats } = &events[0] else {
        panic!("expected GcCompleted, got {:?}", events[0]);
    };
    assert_eq!(stats.deleted, 3);
    assert_eq!(stats.retained_live, 1);
}

#[test]
fn test_gc_throttled_between_saves() {
    let (mut board, clock, _store) = memory_board();
    let entity = dropped_image(&board, b"a");
    board.add_entity(entity, None).unwrap();

    board.save_now().unwrap();
    clock.advance(Duration::from_millis(1_500));
    board.pump();
    while board.gc().is_running() {
        board.pump();
    }
    assert!(!board.gc_pending());

    // Saving again within two minutes does not plan another pass.
    clock.advance(Duration::from_secs(30));
    board.save_now().unwrap();
    assert!(!board.gc_pending());

    clock.advance(Duration::from_secs(90));
    board.save_now().unwrap();
    assert!(board.gc_pending());
}
