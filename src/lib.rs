//! # Moodboard
//!
//! History and persistence engine for an image moodboard: undo/redo with
//! batched multi-item commits, a keyed asset store holding image payloads and
//! the board snapshot, and incremental garbage collection of assets nothing
//! references any more.
//!
//! ## Core Concepts
//!
//! - **Scene**: the host's entity container, reached only through [`Scene`]
//! - **History**: bounded undo/redo stacks; drops and pastes commit as one batch
//! - **Assets**: random-keyed payload records in an [`AssetStore`]
//! - **GC**: throttled, chunked sweeps that respect history and open batches
//!
//! ## Example
//!
//! ```ignore
//! use moodboard::{Board, BoardConfig, EntityData, AssetSource, FileAssetStore, FileStoreConfig};
//!
//! let store = FileAssetStore::open_or_create(FileStoreConfig {
//!     path: "./my-board".into(),
//!     ..Default::default()
//! })?;
//! let mut board = Board::open(scene, Arc::new(store), Arc::new(SystemClock), BoardConfig::default());
//! board.load()?;
//!
//! // Drop two images as one undoable step
//! let token = board.begin_batch(2)?;
//! for bytes in dropped {
//!     let key = board.import_asset(&bytes, "image/png")?;
//!     let entity = EntityData::image(AssetSource::StoreKey(key), 640.0, 480.0, &board.config().entity_defaults);
//!     board.add_entity(entity, Some(token))?;
//! }
//!
//! board.undo();
//! // From the host's event loop:
//! board.pump();
//! ```

pub mod assets;
pub mod board;
pub mod entity;
pub mod error;
pub mod events;
pub mod gc;
pub mod history;
pub mod scene;
pub mod schedule;
pub mod snapshot;
pub mod types;

// Re-exports
pub use assets::{AssetStore, FileAssetStore, FileStoreConfig, MemoryAssetStore};
pub use board::{Board, BoardConfig, LoadReport};
pub use entity::{
    AssetSource, EntityData, EntityDefaults, EntityRecord, Origin, PropsRecord, TransformProps,
    IMAGE_KIND,
};
pub use error::{BoardError, Result};
pub use events::{
    BoardEvent, DropReason, EventBus, EventCategory, EventFilter, SubscriptionConfig,
    SubscriptionHandle, SubscriptionId,
};
pub use gc::{live_references, GarbageCollector, GcConfig, GcProgress, GcStats};
pub use history::{
    capture_removal, Action, ActionKind, BatchStatus, HistoryConfig, HistoryManager,
    HistoryOutcome, RecordOutcome, ReplayReport, TransformTracker,
};
pub use scene::{MemoryScene, Scene, SceneSnapshot};
pub use schedule::{TaskHandle, TaskQueue};
pub use snapshot::{BoardSnapshot, DecodedScene, LegacyEntity, LegacyScene, Migration};
pub use types::*;
