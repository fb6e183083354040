//! Persistent asset storage.
//!
//! Image payloads are stored as records keyed by random ids. The same store
//! also keeps the single board snapshot. Every operation is atomic from the
//! caller's point of view: a record is either fully visible or absent.
//!
//! Two implementations ship with the crate:
//! - [`FileAssetStore`]: a directory of sharded asset files (like Git objects)
//!   plus a snapshot file, guarded by an exclusive lock file.
//! - [`MemoryAssetStore`]: an in-process map, with a switch to simulate an
//!   unavailable store.

mod file;
mod memory;

pub use file::{FileAssetStore, FileStoreConfig};
pub use memory::MemoryAssetStore;

use crate::error::Result;
use crate::snapshot::BoardSnapshot;
use crate::types::{AssetId, AssetInfo, AssetRecord};

/// Storage for image payloads and the board snapshot.
///
/// Failures surface as [`BoardError`](crate::BoardError) values for which
/// `is_storage_failure()` holds; no method panics on an unavailable store.
pub trait AssetStore: Send + Sync {
    /// Store a payload under a fresh id, stamped with the current time.
    fn put(&self, payload: &[u8], mime_type: &str) -> Result<AssetId>;

    /// Fetch a record, `None` if absent.
    fn get(&self, id: &AssetId) -> Result<Option<AssetRecord>>;

    /// Whether a record exists.
    fn contains(&self, id: &AssetId) -> Result<bool>;

    /// Delete a record. Returns false if it did not exist.
    fn delete(&self, id: &AssetId) -> Result<bool>;

    /// Metadata of every record, payloads excluded.
    fn list_all(&self) -> Result<Vec<AssetInfo>>;

    /// Replace the persisted board snapshot.
    fn save_snapshot(&self, snapshot: &BoardSnapshot) -> Result<()>;

    /// The persisted board snapshot, if any.
    fn load_snapshot(&self) -> Result<Option<BoardSnapshot>>;
}
